pub mod snapshot_store;
pub mod timings;

pub use snapshot_store::{BatchReport, MarketOutcome, SnapshotStore};
pub use timings::{TimingSummary, WorkerTimings};
