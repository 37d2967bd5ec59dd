use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Epoch milliseconds, the resolution of the feed's `pt` field.
pub type Millis = i64;

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// Market kind from `marketType`. Kinds without a named variant keep their
/// feed spelling in `Other`, so they compare only with themselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MarketType {
    Win,
    Place,
    EachWay,
    Forecast,
    Other(String),
}

impl MarketType {
    /// Feed values are taken verbatim.
    pub fn from_feed(s: &str) -> Self {
        match s {
            "WIN" => MarketType::Win,
            "PLACE" => MarketType::Place,
            "EACH_WAY" => MarketType::EachWay,
            "FORECAST" => MarketType::Forecast,
            other => MarketType::Other(other.to_string()),
        }
    }

    /// Configuration values: trimmed, case-insensitive, `[A-Z0-9_]+`.
    pub fn parse_name(s: &str) -> Option<Self> {
        let name = s.trim().to_ascii_uppercase();
        let valid = !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
        valid.then(|| Self::from_feed(&name))
    }

    pub fn as_str(&self) -> &str {
        match self {
            MarketType::Win => "WIN",
            MarketType::Place => "PLACE",
            MarketType::EachWay => "EACH_WAY",
            MarketType::Forecast => "FORECAST",
            MarketType::Other(s) => s,
        }
    }
}

impl std::fmt::Display for MarketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MarketType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketStatus {
    Inactive,
    Open,
    Suspended,
    Closed,
    Unknown,
}

impl MarketStatus {
    pub fn from_feed(s: &str) -> Self {
        match s {
            "INACTIVE" => MarketStatus::Inactive,
            "OPEN" => MarketStatus::Open,
            "SUSPENDED" => MarketStatus::Suspended,
            "CLOSED" => MarketStatus::Closed,
            _ => MarketStatus::Unknown,
        }
    }
}

/// One market's definition, stored without its runner list.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MarketDefinition {
    pub market_id: String,
    pub country_code: String,
    pub market_type: MarketType,
    pub open_time: DateTime<Utc>,
    /// Scheduled race start (`marketTime` in the feed).
    pub race_time: DateTime<Utc>,
    pub status: MarketStatus,
    pub in_play: bool,
    pub betting_type: Option<String>,
    pub event_id: Option<String>,
    pub event_name: Option<String>,
    pub venue: Option<String>,
    pub number_of_active_runners: Option<u32>,
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerStatus {
    Active,
    Winner,
    Loser,
    Placed,
    RemovedVacant,
    Removed,
    Hidden,
    Unknown,
}

impl RunnerStatus {
    pub fn from_feed(s: &str) -> Self {
        match s {
            "ACTIVE" => RunnerStatus::Active,
            "WINNER" => RunnerStatus::Winner,
            "LOSER" => RunnerStatus::Loser,
            "PLACED" => RunnerStatus::Placed,
            "REMOVED_VACANT" => RunnerStatus::RemovedVacant,
            "REMOVED" => RunnerStatus::Removed,
            "HIDDEN" => RunnerStatus::Hidden,
            _ => RunnerStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Runner {
    pub runner_id: String,
    /// Owning market; always equal to the definition's `market_id`.
    pub market_id: String,
    pub name: String,
    pub status: RunnerStatus,
    pub sort_priority: Option<u32>,
}

// ---------------------------------------------------------------------------
// Tick
// ---------------------------------------------------------------------------

/// One last-traded-price observation for a runner.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub timestamp: Millis,
    pub market_id: String,
    pub runner_id: String,
    pub last_traded_price: f64,
}

// ---------------------------------------------------------------------------
// Snapshot output
// ---------------------------------------------------------------------------

/// Price for one lead time. `None` means nothing was known at the target instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeadPrice {
    pub lead_minutes: u32,
    pub price: Option<f64>,
}

/// Output column name for a lead time, e.g. `price_5_mins`.
pub fn price_column(lead_minutes: u32) -> String {
    format!("price_{lead_minutes}_mins")
}

/// One output row: a runner's prices at every configured lead time.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    /// Normalized id (source prefix stripped).
    pub market_id: String,
    pub selection_id: String,
    pub race_time: DateTime<Utc>,
    pub name: String,
    /// Ordered by lead time, descending.
    pub prices: Vec<LeadPrice>,
}

impl SnapshotRow {
    pub fn price_at(&self, lead_minutes: u32) -> Option<f64> {
        self.prices
            .iter()
            .find(|p| p.lead_minutes == lead_minutes)
            .and_then(|p| p.price)
    }
}

impl Serialize for SnapshotRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(4 + self.prices.len()))?;
        map.serialize_entry("market_id", &self.market_id)?;
        map.serialize_entry("selection_id", &self.selection_id)?;
        map.serialize_entry("race_time", &self.race_time)?;
        map.serialize_entry("name", &self.name)?;
        for p in &self.prices {
            map.serialize_entry(&price_column(p.lead_minutes), &p.price)?;
        }
        map.end()
    }
}
