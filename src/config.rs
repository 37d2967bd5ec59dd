use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::types::MarketType;

pub const DEFAULT_COUNTRY_CODE: &str = "US";
pub const DEFAULT_MARKET_TYPE: &str = "WIN";

/// Markets opening at or before this instant are excluded.
pub const DEFAULT_OPEN_AFTER: &str = "2016-01-01T00:00:00Z";

/// Minutes before the scheduled start at which prices are sampled.
pub const DEFAULT_LEAD_MINUTES: &[u32] = &[5, 4, 3, 2, 1];

/// Concurrent per-market workers. 1 runs the batch sequentially.
pub const DEFAULT_WORKERS: usize = 4;

/// Member name prefix/suffix of a market entry inside the archive.
pub const ENTRY_PREFIX: &str = "BASIC-";
pub const ENTRY_SUFFIX: &str = ".bz2";

/// Number of malformed-record warnings emitted before switching to sampling.
pub const MALFORMED_WARN_FIRST: u64 = 10;
pub const MALFORMED_WARN_EVERY: u64 = 1000;

/// Predicate parameters for "matches selection criteria".
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionCriteria {
    /// Exact match on `countryCode`.
    pub country_code: String,
    pub market_type: MarketType,
    /// `openDate` must be strictly after this instant.
    pub open_after: DateTime<Utc>,
}

impl Default for SelectionCriteria {
    fn default() -> Self {
        Self {
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
            market_type: MarketType::Win,
            // Constant is a valid RFC 3339 literal; fall back to the epoch regardless.
            open_after: parse_instant(DEFAULT_OPEN_AFTER).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub archive_path: PathBuf,
    pub log_level: String,
    pub selection: SelectionCriteria,
    /// Lead times in minutes, deduplicated and sorted descending (LEAD_MINUTES)
    pub lead_minutes: Vec<u32>,
    /// When set, only this market id is selected (TARGET_MARKET)
    pub target_market: Option<String>,
    pub workers: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let archive_path = std::env::var("ARCHIVE_PATH")
            .map(PathBuf::from)
            .map_err(|_| AppError::Config("ARCHIVE_PATH must be set".to_string()))?;

        let market_type_name =
            std::env::var("SELECT_MARKET_TYPE").unwrap_or_else(|_| DEFAULT_MARKET_TYPE.to_string());
        let market_type = MarketType::parse_name(&market_type_name).ok_or_else(|| {
            AppError::Config(format!("SELECT_MARKET_TYPE {market_type_name:?} must be a market type name such as WIN or ANTEPOST_WIN"))
        })?;

        let open_after_raw =
            std::env::var("SELECT_OPEN_AFTER").unwrap_or_else(|_| DEFAULT_OPEN_AFTER.to_string());
        let open_after = parse_instant(&open_after_raw).map_err(|_| {
            AppError::Config(format!("SELECT_OPEN_AFTER {open_after_raw:?} must be an RFC 3339 timestamp"))
        })?;

        let lead_minutes = match std::env::var("LEAD_MINUTES") {
            Ok(raw) => parse_lead_minutes(&raw)?,
            Err(_) => DEFAULT_LEAD_MINUTES.to_vec(),
        };

        let workers = std::env::var("WORKERS")
            .unwrap_or_else(|_| DEFAULT_WORKERS.to_string())
            .parse::<usize>()
            .ok()
            .filter(|w| *w > 0)
            .ok_or_else(|| AppError::Config("WORKERS must be a positive integer".to_string()))?;

        Ok(Self {
            archive_path,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            selection: SelectionCriteria {
                country_code: std::env::var("SELECT_COUNTRY")
                    .unwrap_or_else(|_| DEFAULT_COUNTRY_CODE.to_string()),
                market_type,
                open_after,
            },
            lead_minutes,
            target_market: std::env::var("TARGET_MARKET")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            workers,
        })
    }
}

/// Parse a comma-separated list of lead minutes, e.g. `"5,4,3,2,1"`.
/// Result is deduplicated and sorted descending, the output column order.
pub fn parse_lead_minutes(raw: &str) -> Result<Vec<u32>> {
    let mut leads = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let lead = part
            .parse::<u32>()
            .map_err(|_| AppError::Config(format!("LEAD_MINUTES entry {part:?} is not a whole number")))?;
        if lead == 0 {
            return Err(AppError::Config("LEAD_MINUTES entries must be positive".to_string()));
        }
        leads.push(lead);
    }
    if leads.is_empty() {
        return Err(AppError::Config("LEAD_MINUTES must list at least one lead time".to_string()));
    }
    leads.sort_unstable_by(|a, b| b.cmp(a));
    leads.dedup();
    Ok(leads)
}

/// Parse an RFC 3339 / ISO 8601 timestamp (`2016-06-01T17:00:00.000Z`) into UTC.
pub fn parse_instant(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s.trim()).map(|dt| dt.with_timezone(&Utc))
}
