use std::collections::BTreeMap;

use crate::types::{Millis, Tick};

/// Time-indexed last-traded-price table for one market.
///
/// Rows are the distinct tick timestamps across all runners, ascending.
/// Columns are runner ids, ascending. Each column is forward-filled on its
/// own: a cell holds the runner's most recent price at or before the row's
/// timestamp, and is `None` before the runner's first observation.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    index: Vec<Millis>,
    runners: Vec<String>,
    /// columns[c][row]
    columns: Vec<Vec<Option<f64>>>,
}

impl PriceTable {
    /// Build the table from ticks in any order.
    ///
    /// Several observations for the same runner at the same timestamp are
    /// averaged into one cell.
    pub fn from_ticks(ticks: &[Tick]) -> Self {
        // runner → timestamp → (sum, count); BTreeMap keeps both levels sorted.
        let mut grouped: BTreeMap<&str, BTreeMap<Millis, (f64, u32)>> = BTreeMap::new();
        for t in ticks {
            let cell = grouped
                .entry(t.runner_id.as_str())
                .or_default()
                .entry(t.timestamp)
                .or_insert((0.0, 0));
            cell.0 += t.last_traded_price;
            cell.1 += 1;
        }

        let mut index: Vec<Millis> = ticks.iter().map(|t| t.timestamp).collect();
        index.sort_unstable();
        index.dedup();

        let mut runners = Vec::with_capacity(grouped.len());
        let mut columns = Vec::with_capacity(grouped.len());
        for (runner_id, observations) in grouped {
            let mut column = Vec::with_capacity(index.len());
            let mut obs = observations.into_iter().peekable();
            let mut last: Option<f64> = None;
            for &ts in &index {
                while let Some(&(obs_ts, (sum, count))) = obs.peek() {
                    if obs_ts > ts {
                        break;
                    }
                    last = Some(sum / f64::from(count));
                    obs.next();
                }
                column.push(last);
            }
            runners.push(runner_id.to_string());
            columns.push(column);
        }

        Self { index, runners, columns }
    }

    pub fn timestamps(&self) -> &[Millis] {
        &self.index
    }

    pub fn runner_ids(&self) -> &[String] {
        &self.runners
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Row of the greatest timestamp `<= target`, or None if every row is later.
    pub fn asof_row(&self, target: Millis) -> Option<usize> {
        self.index.partition_point(|ts| *ts <= target).checked_sub(1)
    }

    /// Forward-filled price of `runner_id` at `row`.
    pub fn value(&self, row: usize, runner_id: &str) -> Option<f64> {
        let col = self.runners.binary_search_by(|r| r.as_str().cmp(runner_id)).ok()?;
        self.columns[col].get(row).copied().flatten()
    }

    /// Most recent known price of `runner_id` at or before `target`.
    pub fn price_asof(&self, runner_id: &str, target: Millis) -> Option<f64> {
        self.value(self.asof_row(target)?, runner_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(ts: Millis, runner: &str, price: f64) -> Tick {
        Tick { timestamp: ts, market_id: "1.1".to_string(), runner_id: runner.to_string(), last_traded_price: price }
    }

    #[test]
    fn forward_fill_is_per_column_and_never_backward() {
        let table = PriceTable::from_ticks(&[tick(100, "A", 2.0), tick(200, "B", 5.0), tick(300, "A", 2.2)]);

        assert_eq!(table.timestamps(), &[100, 200, 300]);
        assert_eq!(table.runner_ids(), &["A".to_string(), "B".to_string()]);
        assert_eq!(table.value(0, "A"), Some(2.0));
        assert_eq!(table.value(1, "A"), Some(2.0), "carried forward");
        assert_eq!(table.value(2, "A"), Some(2.2));
        assert_eq!(table.value(0, "B"), None, "no backward fill");
        assert_eq!(table.value(2, "B"), Some(5.0));
    }

    #[test]
    fn out_of_order_ticks_are_sorted() {
        let table = PriceTable::from_ticks(&[tick(300, "A", 3.0), tick(100, "A", 1.0), tick(200, "A", 2.0)]);
        assert_eq!(table.price_asof("A", 250), Some(2.0));
        assert_eq!(table.price_asof("A", 300), Some(3.0));
    }

    #[test]
    fn asof_lookup_boundaries() {
        let table = PriceTable::from_ticks(&[tick(100, "A", 2.0), tick(300, "A", 2.2)]);
        assert_eq!(table.asof_row(99), None);
        assert_eq!(table.asof_row(100), Some(0), "equal timestamp is visible");
        assert_eq!(table.asof_row(299), Some(0));
        assert_eq!(table.asof_row(300), Some(1));
        assert_eq!(table.asof_row(i64::MAX), Some(1));
        assert_eq!(table.price_asof("A", 99), None);
        assert_eq!(table.price_asof("Z", 300), None, "unknown runner");
    }

    #[test]
    fn duplicate_observations_are_averaged() {
        let table = PriceTable::from_ticks(&[tick(100, "A", 2.0), tick(100, "A", 3.0)]);
        assert_eq!(table.timestamps().len(), 1);
        assert!((table.price_asof("A", 100).unwrap() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn empty_table_answers_nothing() {
        let table = PriceTable::from_ticks(&[]);
        assert!(table.is_empty());
        assert_eq!(table.asof_row(1_000), None);
    }
}
