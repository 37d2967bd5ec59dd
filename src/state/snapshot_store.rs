use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::info;

use crate::error::AppError;
use crate::snapshot::EmptyReason;
use crate::state::timings::{TimingSummary, WorkerTimings};
use crate::types::SnapshotRow;

// ---------------------------------------------------------------------------
// MarketOutcome
// ---------------------------------------------------------------------------

/// What processing one market produced.
#[derive(Debug)]
pub enum MarketOutcome {
    Rows(Vec<SnapshotRow>),
    /// Processed cleanly but yielded nothing.
    Empty(EmptyReason),
    /// The market's entry could not be read, or its worker died.
    Skipped(AppError),
}

impl MarketOutcome {
    pub fn rows(&self) -> &[SnapshotRow] {
        match self {
            MarketOutcome::Rows(rows) => rows,
            _ => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// SnapshotStore
// ---------------------------------------------------------------------------

/// Per-market results of a batch, filled in as workers finish.
///
/// A market's entry is written once, after its worker is done with it, so a
/// reader never sees a half-built market.
pub struct SnapshotStore {
    /// catalog market_id → outcome
    outcomes: DashMap<String, MarketOutcome>,
    timings: WorkerTimings,
}

impl SnapshotStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            outcomes: DashMap::new(),
            timings: WorkerTimings::new(),
        })
    }

    pub fn record(&self, market_id: &str, outcome: MarketOutcome, elapsed: Duration) {
        self.timings.record(elapsed);
        self.outcomes.insert(market_id.to_string(), outcome);
    }

    pub fn market_count(&self) -> usize {
        self.outcomes.len()
    }

    pub fn contains(&self, market_id: &str) -> bool {
        self.outcomes.contains_key(market_id)
    }

    /// Rows of one market in catalog runner order. Empty if it produced none.
    pub fn rows_for(&self, market_id: &str) -> Vec<SnapshotRow> {
        self.outcomes
            .get(market_id)
            .map(|o| o.rows().to_vec())
            .unwrap_or_default()
    }

    /// Every row, grouped by market id ascending, catalog order within a market.
    pub fn rows(&self) -> Vec<SnapshotRow> {
        let mut ids: Vec<String> = self.outcomes.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids.iter().flat_map(|id| self.rows_for(id)).collect()
    }

    pub fn report(&self) -> BatchReport {
        let mut report = BatchReport::default();
        for entry in self.outcomes.iter() {
            report.markets += 1;
            match entry.value() {
                MarketOutcome::Rows(rows) => {
                    report.markets_with_rows += 1;
                    report.rows += rows.len();
                }
                MarketOutcome::Empty(reason) => {
                    *report.empty.entry(reason.to_string()).or_default() += 1;
                }
                MarketOutcome::Skipped(_) => report.skipped += 1,
            }
        }
        report.timing = self.timings.summary();
        report
    }
}

// ---------------------------------------------------------------------------
// BatchReport
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub markets: usize,
    pub markets_with_rows: usize,
    pub rows: usize,
    /// reason → market count
    pub empty: BTreeMap<String, usize>,
    pub skipped: usize,
    pub timing: Option<TimingSummary>,
}

impl BatchReport {
    pub fn log_summary(&self) {
        info!(
            markets = self.markets,
            rows = self.rows,
            "[BATCH] {} markets processed: {} with rows, {} skipped",
            self.markets,
            self.markets_with_rows,
            self.skipped,
        );
        if !self.empty.is_empty() {
            let reasons: Vec<String> = self.empty.iter().map(|(k, v)| format!("{k}={v}")).collect();
            info!("[BATCH] empty markets: {}", reasons.join(" "));
        }
        if let Some(t) = self.timing {
            info!("[BATCH] per-market time p50={}us p95={}us p99={}us", t.p50_us, t.p95_us, t.p99_us);
        }
    }
}
