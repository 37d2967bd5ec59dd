pub mod collector;

pub use collector::{extract_ticks, TimeSeriesCollector};
