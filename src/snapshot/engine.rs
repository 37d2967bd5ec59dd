use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::snapshot::table::PriceTable;
use crate::types::{LeadPrice, MarketDefinition, Millis, Runner, SnapshotRow, Tick};

const MILLIS_PER_MINUTE: Millis = 60_000;

/// Why a market produced no snapshot rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmptyReason {
    /// The market's entry held no price observations.
    NoTicks,
    /// Every observation is later than every lead-time target.
    NoAlignableObservation,
    /// The catalog lists no runners for the market.
    NoCatalogRunners,
    /// The market is not in the catalog at all.
    NotInCatalog,
}

impl std::fmt::Display for EmptyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EmptyReason::NoTicks => "no_ticks",
            EmptyReason::NoAlignableObservation => "no_alignable_observation",
            EmptyReason::NoCatalogRunners => "no_catalog_runners",
            EmptyReason::NotInCatalog => "not_in_catalog",
        };
        write!(f, "{s}")
    }
}

/// One runner's as-of prices, before the catalog join.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerPrices {
    pub market_id: String,
    pub runner_id: String,
    pub prices: Vec<LeadPrice>,
}

/// Samples each runner's forward-filled price at fixed lead times before the
/// race start. A sample only ever uses observations at or before its target
/// instant.
#[derive(Debug, Clone)]
pub struct SnapshotEngine {
    lead_minutes: Vec<u32>,
}

impl SnapshotEngine {
    /// Lead times are deduplicated and ordered descending.
    pub fn new(mut lead_minutes: Vec<u32>) -> Self {
        lead_minutes.sort_unstable_by(|a, b| b.cmp(a));
        lead_minutes.dedup();
        Self { lead_minutes }
    }

    pub fn lead_minutes(&self) -> &[u32] {
        &self.lead_minutes
    }

    /// `(lead, race_time - lead minutes)` for every configured lead, in millis.
    pub fn targets(&self, race_time: DateTime<Utc>) -> Vec<(u32, Millis)> {
        let start = race_time.timestamp_millis();
        self.lead_minutes
            .iter()
            .map(|&lead| (lead, start - Millis::from(lead) * MILLIS_PER_MINUTE))
            .collect()
    }

    /// As-of prices for every runner that has ticks in this market.
    ///
    /// `ticks` must all belong to one market. Runners whose first tick is
    /// after a target get `None` for that lead.
    pub fn compute(&self, ticks: &[Tick], race_time: DateTime<Utc>) -> Result<Vec<RunnerPrices>, EmptyReason> {
        let Some(first) = ticks.first() else {
            return Err(EmptyReason::NoTicks);
        };
        let table = PriceTable::from_ticks(ticks);

        let rows: Vec<(u32, Option<usize>)> = self
            .targets(race_time)
            .into_iter()
            .map(|(lead, target)| (lead, table.asof_row(target)))
            .collect();
        if rows.iter().all(|(_, row)| row.is_none()) {
            return Err(EmptyReason::NoAlignableObservation);
        }

        Ok(table
            .runner_ids()
            .iter()
            .map(|runner_id| RunnerPrices {
                market_id: first.market_id.clone(),
                runner_id: runner_id.clone(),
                prices: rows
                    .iter()
                    .map(|&(lead, row)| LeadPrice {
                        lead_minutes: lead,
                        price: row.and_then(|r| table.value(r, runner_id)),
                    })
                    .collect(),
            })
            .collect())
    }

    /// Final rows for one market: one per cataloged runner, named from the
    /// catalog. Runners seen only in ticks are dropped; cataloged runners
    /// without ticks get all-null prices.
    pub fn snapshot_market(
        &self,
        def: &MarketDefinition,
        runners: &[Runner],
        ticks: &[Tick],
    ) -> Result<Vec<SnapshotRow>, EmptyReason> {
        if runners.is_empty() {
            return Err(EmptyReason::NoCatalogRunners);
        }
        let computed = self.compute(ticks, def.race_time)?;
        let mut by_runner: HashMap<&str, &RunnerPrices> =
            computed.iter().map(|p| (p.runner_id.as_str(), p)).collect();

        let market_id = normalize_market_id(&def.market_id).to_string();
        let rows: Vec<SnapshotRow> = runners
            .iter()
            .filter(|r| r.market_id == def.market_id)
            .map(|runner| {
                let prices = match by_runner.remove(runner.runner_id.as_str()) {
                    Some(p) => p.prices.clone(),
                    None => self
                        .lead_minutes
                        .iter()
                        .map(|&lead| LeadPrice { lead_minutes: lead, price: None })
                        .collect(),
                };
                SnapshotRow {
                    market_id: market_id.clone(),
                    selection_id: runner.runner_id.clone(),
                    race_time: def.race_time,
                    name: runner.name.clone(),
                    prices,
                }
            })
            .collect();

        if !by_runner.is_empty() {
            debug!(
                market_id = %def.market_id,
                dropped = by_runner.len(),
                "[SNAPSHOT] runners with ticks but no catalog entry dropped",
            );
        }
        if rows.is_empty() {
            return Err(EmptyReason::NoCatalogRunners);
        }
        Ok(rows)
    }
}

/// Strip the structural prefix from a feed market id: `1.123456` → `123456`.
/// Ids without a `.` are returned unchanged.
pub fn normalize_market_id(market_id: &str) -> &str {
    market_id.split_once('.').map_or(market_id, |(_, rest)| rest)
}
