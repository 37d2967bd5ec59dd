pub mod messages;

pub use messages::{
    parse_records, FeedId, MarketChange, MarketMessage, RawMarketDefinition, RawRunner,
    RawRunnerChange, RecordStream,
};
