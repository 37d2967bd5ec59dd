pub mod engine;
pub mod table;

pub use engine::{normalize_market_id, EmptyReason, RunnerPrices, SnapshotEngine};
pub use table::PriceTable;
