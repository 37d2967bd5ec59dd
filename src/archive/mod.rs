pub mod reader;

#[cfg(test)]
pub mod testing;

pub use reader::{entry_key, market_id_from_member, MarketArchive, TarArchive};
