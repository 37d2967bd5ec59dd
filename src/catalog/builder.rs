use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::archive::MarketArchive;
use crate::config::{parse_instant, SelectionCriteria};
use crate::error::{AppError, Result};
use crate::stream::{FeedId, MarketMessage, RawMarketDefinition, RecordStream};
use crate::types::{MarketDefinition, MarketStatus, MarketType, Runner, RunnerStatus};

// ---------------------------------------------------------------------------
// Selection predicate
// ---------------------------------------------------------------------------

/// Which market definitions are admitted into the catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Jurisdiction, market kind and opening-time cutoff.
    Criteria(SelectionCriteria),
    /// Exactly one market id.
    Market(String),
}

enum Rejection {
    Country,
    MarketType,
    OpenTime,
    OtherMarket,
}

impl Selection {
    pub fn matches(&self, def: &MarketDefinition) -> bool {
        self.check(&def.market_id, Some(def)).is_ok()
    }

    /// `def` is None when only the id is known yet; the id test can run
    /// before the definition is converted.
    fn check(&self, market_id: &str, def: Option<&MarketDefinition>) -> std::result::Result<(), Rejection> {
        match self {
            Selection::Market(target) => {
                if market_id == target {
                    Ok(())
                } else {
                    Err(Rejection::OtherMarket)
                }
            }
            Selection::Criteria(criteria) => {
                let Some(def) = def else { return Ok(()) };
                if def.country_code != criteria.country_code {
                    return Err(Rejection::Country);
                }
                if def.market_type != criteria.market_type {
                    return Err(Rejection::MarketType);
                }
                if def.open_time <= criteria.open_after {
                    return Err(Rejection::OpenTime);
                }
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Market definitions and their runners, keyed by market id.
#[derive(Debug, Clone, Default)]
pub struct MarketCatalog {
    markets: HashMap<String, MarketDefinition>,
    runners: HashMap<String, Vec<Runner>>,
}

impl MarketCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a definition and its runners, replacing anything held for the id.
    pub fn insert(&mut self, def: MarketDefinition, runners: Vec<Runner>) {
        self.runners.insert(def.market_id.clone(), runners);
        self.markets.insert(def.market_id.clone(), def);
    }

    /// Apply a catalog built from later records on top of this one.
    pub fn merge(&mut self, later: MarketCatalog) {
        let MarketCatalog { markets, mut runners } = later;
        for (id, def) in markets {
            let market_runners = runners.remove(&id).unwrap_or_default();
            self.runners.insert(id.clone(), market_runners);
            self.markets.insert(id, def);
        }
    }

    pub fn market(&self, market_id: &str) -> Option<&MarketDefinition> {
        self.markets.get(market_id)
    }

    pub fn runners_for(&self, market_id: &str) -> &[Runner] {
        self.runners.get(market_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every runner across all markets, ordered by market id then sort priority.
    pub fn runners(&self) -> Vec<Runner> {
        let mut out: Vec<Runner> = self.runners.values().flatten().cloned().collect();
        out.sort_by(|a, b| {
            a.market_id
                .cmp(&b.market_id)
                .then(a.sort_priority.cmp(&b.sort_priority))
                .then(a.runner_id.cmp(&b.runner_id))
        });
        out
    }

    /// Sorted market ids.
    pub fn market_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.markets.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CatalogStats {
    pub definitions_seen: usize,
    /// Definitions that passed the predicate, updates included.
    pub qualified_updates: usize,
    pub rejected_missing_field: usize,
    pub rejected_invalid_timestamp: usize,
    pub rejected_country: usize,
    pub rejected_market_type: usize,
    pub rejected_open_time: usize,
    pub rejected_other_market: usize,
    /// Archive entries that could not be fetched or decompressed.
    pub entries_skipped: usize,
    pub malformed_records: usize,
}

impl CatalogStats {
    pub fn merge(&mut self, other: &CatalogStats) {
        self.definitions_seen += other.definitions_seen;
        self.qualified_updates += other.qualified_updates;
        self.rejected_missing_field += other.rejected_missing_field;
        self.rejected_invalid_timestamp += other.rejected_invalid_timestamp;
        self.rejected_country += other.rejected_country;
        self.rejected_market_type += other.rejected_market_type;
        self.rejected_open_time += other.rejected_open_time;
        self.rejected_other_market += other.rejected_other_market;
        self.entries_skipped += other.entries_skipped;
        self.malformed_records += other.malformed_records;
    }

    pub fn log_summary(&self, markets: usize) {
        info!(
            markets,
            definitions = self.definitions_seen,
            "[CATALOG] {} markets cataloged from {} definitions ({} qualifying updates)",
            markets,
            self.definitions_seen,
            self.qualified_updates,
        );
        info!(
            "[CATALOG] rejected: missing_field={} bad_timestamp={} country={} market_type={} open_time={} other_market={} | entries_skipped={} malformed_records={}",
            self.rejected_missing_field,
            self.rejected_invalid_timestamp,
            self.rejected_country,
            self.rejected_market_type,
            self.rejected_open_time,
            self.rejected_other_market,
            self.entries_skipped,
            self.malformed_records,
        );
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Accumulates qualifying definitions across a stream of messages.
/// The last qualifying definition seen for a market id wins.
pub struct CatalogBuilder<'s> {
    selection: &'s Selection,
    catalog: MarketCatalog,
    stats: CatalogStats,
}

impl<'s> CatalogBuilder<'s> {
    pub fn new(selection: &'s Selection) -> Self {
        Self { selection, catalog: MarketCatalog::new(), stats: CatalogStats::default() }
    }

    pub fn observe(&mut self, msg: &MarketMessage) {
        for change in &msg.changes {
            let Some(raw_def) = &change.market_definition else { continue };
            self.stats.definitions_seen += 1;

            let Some(market_id) = change.id.as_deref() else {
                self.stats.rejected_missing_field += 1;
                debug!("[CATALOG] definition without market id skipped");
                continue;
            };
            if let Err(r) = self.selection.check(market_id, None) {
                self.count_rejection(r);
                continue;
            }

            let (def, runners) = match split_definition(market_id, raw_def) {
                Ok(parts) => parts,
                Err(e) => {
                    match e {
                        AppError::InvalidTimestamp { .. } => self.stats.rejected_invalid_timestamp += 1,
                        _ => self.stats.rejected_missing_field += 1,
                    }
                    debug!(market_id, "[CATALOG] definition skipped: {e}");
                    continue;
                }
            };

            match self.selection.check(market_id, Some(&def)) {
                Ok(()) => {
                    self.stats.qualified_updates += 1;
                    self.catalog.insert(def, runners);
                }
                Err(r) => self.count_rejection(r),
            }
        }
    }

    fn count_rejection(&mut self, r: Rejection) {
        match r {
            Rejection::Country => self.stats.rejected_country += 1,
            Rejection::MarketType => self.stats.rejected_market_type += 1,
            Rejection::OpenTime => self.stats.rejected_open_time += 1,
            Rejection::OtherMarket => self.stats.rejected_other_market += 1,
        }
    }

    pub fn finish(self) -> (MarketCatalog, CatalogStats) {
        (self.catalog, self.stats)
    }
}

/// Split a raw definition into the definition sans runners and its runners,
/// each runner stamped with the owning market id.
pub fn split_definition(market_id: &str, raw: &RawMarketDefinition) -> Result<(MarketDefinition, Vec<Runner>)> {
    let country_code = raw.country_code.clone().ok_or(AppError::MissingField("countryCode"))?;
    let market_type = raw.market_type.as_deref().ok_or(AppError::MissingField("marketType"))?;
    let open_date = raw.open_date.as_deref().ok_or(AppError::MissingField("openDate"))?;
    let market_time = raw.market_time.as_deref().ok_or(AppError::MissingField("marketTime"))?;
    let raw_runners = raw.runners.as_ref().ok_or(AppError::MissingField("runners"))?;

    let timestamp = |value: &str| {
        parse_instant(value).map_err(|source| AppError::InvalidTimestamp { value: value.to_string(), source })
    };

    let runners = raw_runners
        .iter()
        .map(|r| -> Result<Runner> {
            let runner_id = r.id.clone().map(FeedId::into_string).ok_or(AppError::MissingField("runners.id"))?;
            Ok(Runner {
                runner_id,
                market_id: market_id.to_string(),
                name: r.name.clone().unwrap_or_default(),
                status: r.status.as_deref().map(RunnerStatus::from_feed).unwrap_or(RunnerStatus::Unknown),
                sort_priority: r.sort_priority,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let def = MarketDefinition {
        market_id: market_id.to_string(),
        country_code,
        market_type: MarketType::from_feed(market_type),
        open_time: timestamp(open_date)?,
        race_time: timestamp(market_time)?,
        status: raw.status.as_deref().map(MarketStatus::from_feed).unwrap_or(MarketStatus::Unknown),
        in_play: raw.in_play.unwrap_or(false),
        betting_type: raw.betting_type.clone(),
        event_id: raw.event_id.clone().map(FeedId::into_string),
        event_name: raw.event_name.clone(),
        venue: raw.venue.clone(),
        number_of_active_runners: raw.number_of_active_runners,
    };
    Ok((def, runners))
}

/// Build a catalog from an in-order sequence of messages.
pub fn build_catalog<I>(records: I, selection: &Selection) -> (MarketCatalog, CatalogStats)
where
    I: IntoIterator<Item = MarketMessage>,
{
    let mut builder = CatalogBuilder::new(selection);
    for msg in records {
        builder.observe(&msg);
    }
    builder.finish()
}

/// Catalog one archive entry.
pub fn scan_entry(archive: &dyn MarketArchive, market_id: &str, selection: &Selection) -> Result<(MarketCatalog, CatalogStats)> {
    let bytes = archive.get_entry(market_id)?;
    let mut stream = RecordStream::new(&bytes);
    let (catalog, mut stats) = build_catalog(stream.by_ref(), selection);
    stats.malformed_records += stream.malformed();
    Ok((catalog, stats))
}

/// Fold per-entry results, in archive order, into one catalog.
/// Entries that failed to load are counted and skipped.
pub fn merge_entries<I>(entries: I) -> (MarketCatalog, CatalogStats)
where
    I: IntoIterator<Item = (String, Result<(MarketCatalog, CatalogStats)>)>,
{
    let mut catalog = MarketCatalog::new();
    let mut stats = CatalogStats::default();
    for (market_id, result) in entries {
        match result {
            Ok((partial, partial_stats)) => {
                catalog.merge(partial);
                stats.merge(&partial_stats);
            }
            Err(e) => {
                stats.entries_skipped += 1;
                warn!(market_id = %market_id, "[CATALOG] entry skipped: {e}");
            }
        }
    }
    (catalog, stats)
}

/// Sequential scan over every entry in the archive.
pub fn scan_archive(archive: &dyn MarketArchive, selection: &Selection) -> (MarketCatalog, CatalogStats) {
    let ids = archive.market_ids();
    merge_entries(ids.into_iter().map(|id| {
        let result = scan_entry(archive, &id, selection);
        (id, result)
    }))
}
