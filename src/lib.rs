//! Pre-race price snapshots from archived exchange market streams.
//!
//! A tar archive holds one bzip2 stream per market. The batch catalogs the
//! markets that match a selection, then samples every runner's last traded
//! price at fixed lead times before the scheduled start.

pub mod archive;
pub mod catalog;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod snapshot;
pub mod state;
pub mod stream;
pub mod timeseries;
pub mod types;
