//! Batch driver: catalog scan, then one independent task per cataloged market.
//!
//! Markets share nothing but read-only inputs. Each worker owns its decoded
//! entry and price table, and hands a finished outcome to the store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future;
use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::archive::MarketArchive;
use crate::catalog::{merge_entries, scan_entry, CatalogStats, MarketCatalog, Selection};
use crate::error::AppError;
use crate::snapshot::{EmptyReason, SnapshotEngine};
use crate::state::{MarketOutcome, SnapshotStore};
use crate::timeseries::TimeSeriesCollector;

/// Snapshot one cataloged market. Never fails; failures become outcomes.
pub fn process_market(
    archive: &dyn MarketArchive,
    catalog: &MarketCatalog,
    engine: &SnapshotEngine,
    market_id: &str,
) -> MarketOutcome {
    let Some(def) = catalog.market(market_id) else {
        return MarketOutcome::Empty(EmptyReason::NotInCatalog);
    };
    let runners = catalog.runners_for(market_id);
    if runners.is_empty() {
        return MarketOutcome::Empty(EmptyReason::NoCatalogRunners);
    }

    let ticks = match TimeSeriesCollector::new(archive).collect_market(market_id) {
        Ok(t) => t,
        Err(e) => {
            warn!(market_id, "[SNAPSHOT] market skipped: {e}");
            return MarketOutcome::Skipped(e);
        }
    };

    match engine.snapshot_market(def, runners, &ticks) {
        Ok(rows) => MarketOutcome::Rows(rows),
        Err(reason) => {
            debug!(market_id, ticks = ticks.len(), %reason, "[SNAPSHOT] no rows");
            MarketOutcome::Empty(reason)
        }
    }
}

fn timed(
    archive: &dyn MarketArchive,
    catalog: &MarketCatalog,
    engine: &SnapshotEngine,
    market_id: &str,
) -> (MarketOutcome, Duration) {
    let started = Instant::now();
    let outcome = process_market(archive, catalog, engine, market_id);
    (outcome, started.elapsed())
}

/// Process every cataloged market on the calling thread.
pub fn run_sequential(
    archive: &dyn MarketArchive,
    catalog: &MarketCatalog,
    engine: &SnapshotEngine,
) -> Arc<SnapshotStore> {
    let store = SnapshotStore::new();
    for market_id in catalog.market_ids() {
        let (outcome, elapsed) = timed(archive, catalog, engine, &market_id);
        store.record(&market_id, outcome, elapsed);
    }
    store
}

/// Process every cataloged market with up to `workers` blocking tasks in
/// flight. A worker that panics is recorded as skipped; the rest continue.
///
/// The resulting store holds the same outcomes as [`run_sequential`].
pub async fn run_concurrent(
    archive: Arc<dyn MarketArchive>,
    catalog: Arc<MarketCatalog>,
    engine: Arc<SnapshotEngine>,
    workers: usize,
) -> Arc<SnapshotStore> {
    let store = SnapshotStore::new();
    let workers = workers.max(1);
    info!(markets = catalog.len(), workers, "[BATCH] processing markets");

    stream::iter(catalog.market_ids())
        .map(|market_id| {
            let archive = Arc::clone(&archive);
            let catalog = Arc::clone(&catalog);
            let engine = Arc::clone(&engine);
            async move {
                let started = Instant::now();
                let id = market_id.clone();
                let joined = tokio::task::spawn_blocking(move || {
                    timed(archive.as_ref(), &catalog, &engine, &id)
                })
                .await;
                let (outcome, elapsed) = match joined {
                    Ok(done) => done,
                    Err(e) => {
                        warn!(market_id = %market_id, "[BATCH] worker failed: {e}");
                        (MarketOutcome::Skipped(AppError::Worker(e.to_string())), started.elapsed())
                    }
                };
                (market_id, outcome, elapsed)
            }
        })
        .buffer_unordered(workers)
        .for_each(|(market_id, outcome, elapsed)| {
            store.record(&market_id, outcome, elapsed);
            future::ready(())
        })
        .await;

    store
}

/// Catalog every archive entry with up to `workers` entries decoded at once.
///
/// Results are merged in archive order, so a later entry's definition for a
/// market still overrides an earlier one.
pub async fn scan_archive_concurrent(
    archive: Arc<dyn MarketArchive>,
    selection: Arc<Selection>,
    workers: usize,
) -> (MarketCatalog, CatalogStats) {
    let ids = archive.market_ids();
    info!(entries = ids.len(), workers, "[CATALOG] scanning archive");

    let results: Vec<_> = stream::iter(ids)
        .map(|market_id| {
            let archive = Arc::clone(&archive);
            let selection = Arc::clone(&selection);
            async move {
                let id = market_id.clone();
                let joined = tokio::task::spawn_blocking(move || {
                    scan_entry(archive.as_ref(), &id, &selection)
                })
                .await;
                let result = joined.unwrap_or_else(|e| Err(AppError::Worker(e.to_string())));
                (market_id, result)
            }
        })
        .buffered(workers.max(1))
        .collect()
        .await;

    merge_entries(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::testing::{bz2, write_tar_archive, MemoryArchive};
    use crate::archive::{entry_key, TarArchive};
    use crate::catalog::scan_archive;
    use crate::config::SelectionCriteria;
    use crate::error::Result;

    // Race starts 2016-06-01T17:00:00Z.
    const RACE_MS: i64 = 1_464_800_400_000;

    fn minutes_before(m: i64) -> i64 {
        RACE_MS - m * 60_000
    }

    fn definition(market_id: &str, runners: &[(u64, &str)]) -> String {
        let runners: Vec<String> = runners
            .iter()
            .map(|(id, name)| format!(r#"{{"id":{id},"name":"{name}","status":"ACTIVE"}}"#))
            .collect();
        format!(
            r#"{{"pt":{},"mc":[{{"id":"{market_id}","marketDefinition":{{"countryCode":"US","marketType":"WIN","openDate":"2016-06-01T16:00:00.000Z","marketTime":"2016-06-01T17:00:00.000Z","status":"OPEN","runners":[{}]}}}}]}}"#,
            minutes_before(60),
            runners.join(",")
        )
    }

    fn prices(market_id: &str, pt: i64, rc: &[(u64, f64)]) -> String {
        let rc: Vec<String> = rc.iter().map(|(id, ltp)| format!(r#"{{"id":{id},"ltp":{ltp}}}"#)).collect();
        format!(r#"{{"pt":{pt},"mc":[{{"id":"{market_id}","rc":[{}]}}]}}"#, rc.join(","))
    }

    fn healthy_market(id: &str) -> Vec<String> {
        vec![
            definition(id, &[(1, "Alpha"), (2, "Bravo")]),
            prices(id, minutes_before(10), &[(1, 3.0), (2, 5.0)]),
            prices(id, minutes_before(3), &[(1, 2.5)]),
        ]
    }

    fn archive_with(entries: &[(&str, Vec<String>)]) -> MemoryArchive {
        entries.iter().fold(MemoryArchive::new(), |a, (id, lines)| {
            let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
            a.with_entry(id, &lines)
        })
    }

    fn criteria() -> Selection {
        Selection::Criteria(SelectionCriteria::default())
    }

    fn engine() -> SnapshotEngine {
        SnapshotEngine::new(vec![5, 4, 3, 2, 1])
    }

    #[test]
    fn healthy_market_yields_one_row_per_runner() {
        let archive = archive_with(&[("1.100", healthy_market("1.100"))]);
        let (catalog, _) = scan_archive(&archive, &criteria());

        let outcome = process_market(&archive, &catalog, &engine(), "1.100");
        let rows = outcome.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].market_id, "100");
        assert_eq!(rows[0].name, "Alpha");
        assert_eq!(rows[0].price_at(5), Some(3.0));
        assert_eq!(rows[0].price_at(4), Some(3.0));
        assert_eq!(rows[0].price_at(3), Some(2.5));
        assert_eq!(rows[1].price_at(1), Some(5.0));
    }

    #[test]
    fn uncataloged_market_is_reported_not_fetched() {
        let archive = MemoryArchive::new().with_missing("1.9");
        let outcome = process_market(&archive, &MarketCatalog::new(), &engine(), "1.9");
        assert!(matches!(outcome, MarketOutcome::Empty(EmptyReason::NotInCatalog)));
    }

    #[tokio::test]
    async fn bad_market_does_not_disturb_the_others() {
        let mut broken = healthy_market("1.200");
        broken.insert(1, "{not json".to_string());
        broken.push(r#"{"pt":1,"mc":[{"id":"1.200","rc":[{"ltp":2.0}]}]}"#.to_string());
        let entries = [
            ("1.100", healthy_market("1.100")),
            ("1.200", broken),
            ("1.300", healthy_market("1.300")),
        ];

        let clean = archive_with(&[entries[0].clone(), entries[2].clone()]);
        let (clean_catalog, _) = scan_archive(&clean, &criteria());
        let baseline = run_sequential(&clean, &clean_catalog, &engine());

        let mixed = archive_with(&entries);
        let (catalog, _) = scan_archive(&mixed, &criteria());
        let store = run_concurrent(Arc::new(mixed), Arc::new(catalog), Arc::new(engine()), 3).await;

        assert_eq!(store.rows_for("1.100"), baseline.rows_for("1.100"));
        assert_eq!(store.rows_for("1.300"), baseline.rows_for("1.300"));
        assert_eq!(store.rows_for("1.200").len(), 2, "malformed lines only drop themselves");
    }

    #[tokio::test]
    async fn unreadable_market_is_skipped() {
        struct Flaky(MemoryArchive);
        impl MarketArchive for Flaky {
            fn market_ids(&self) -> Vec<String> {
                self.0.market_ids()
            }
            fn get_entry(&self, market_id: &str) -> Result<Vec<u8>> {
                if market_id == "1.200" {
                    return Err(AppError::EntryNotFound(entry_key("", market_id)));
                }
                self.0.get_entry(market_id)
            }
        }

        let inner = archive_with(&[
            ("1.100", healthy_market("1.100")),
            ("1.200", healthy_market("1.200")),
        ]);
        let (catalog, _) = scan_archive(&inner, &criteria());
        assert_eq!(catalog.len(), 2);

        let store = run_concurrent(Arc::new(Flaky(inner)), Arc::new(catalog), Arc::new(engine()), 2).await;
        let report = store.report();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.markets_with_rows, 1);
        assert_eq!(store.rows().len(), 2);
    }

    #[tokio::test]
    async fn panicking_worker_is_recorded_and_batch_continues() {
        struct Exploding(MemoryArchive);
        impl MarketArchive for Exploding {
            fn market_ids(&self) -> Vec<String> {
                self.0.market_ids()
            }
            fn get_entry(&self, market_id: &str) -> Result<Vec<u8>> {
                if market_id == "1.200" {
                    panic!("entry reader blew up");
                }
                self.0.get_entry(market_id)
            }
        }

        let inner = archive_with(&[
            ("1.100", healthy_market("1.100")),
            ("1.200", healthy_market("1.200")),
            ("1.300", healthy_market("1.300")),
        ]);
        let (catalog, _) = scan_archive(&inner, &criteria());

        let store = run_concurrent(Arc::new(Exploding(inner)), Arc::new(catalog), Arc::new(engine()), 2).await;
        assert_eq!(store.market_count(), 3);
        assert_eq!(store.report().skipped, 1);
        assert_eq!(store.rows_for("1.300").len(), 2);
    }

    #[tokio::test]
    async fn concurrent_run_matches_sequential_run() {
        let entries: Vec<(String, Vec<String>)> = (100..120)
            .map(|n| {
                let id = format!("1.{n}");
                let mut lines = healthy_market(&id);
                lines.push(prices(&id, minutes_before(2) + n, &[(1, 1.5 + n as f64 / 100.0)]));
                (id, lines)
            })
            .collect();
        let refs: Vec<(&str, Vec<String>)> = entries.iter().map(|(id, l)| (id.as_str(), l.clone())).collect();
        let archive = archive_with(&refs);
        let (catalog, _) = scan_archive(&archive, &criteria());

        let sequential = run_sequential(&archive, &catalog, &engine());
        let concurrent = run_concurrent(Arc::new(archive), Arc::new(catalog), Arc::new(engine()), 4).await;

        assert_eq!(concurrent.rows(), sequential.rows());
        assert_eq!(concurrent.rows().len(), 40);
        assert_eq!(concurrent.report().markets, sequential.report().markets);
    }

    #[tokio::test]
    async fn concurrent_scan_keeps_archive_order_for_overrides() {
        // Same market defined in two entries: the later entry wins.
        let early = vec![definition("1.500", &[(1, "Early")])];
        let late = vec![definition("1.500", &[(1, "Late")])];
        let archive = archive_with(&[("1.500", early), ("1.501", late)]).with_missing("1.502");

        let (catalog, stats) =
            scan_archive_concurrent(Arc::new(archive), Arc::new(criteria()), 4).await;
        assert_eq!(catalog.runners_for("1.500")[0].name, "Late");
        assert_eq!(stats.entries_skipped, 1);
    }

    #[tokio::test]
    async fn end_to_end_over_a_tar_archive() {
        let dir = tempfile::tempdir().unwrap();
        let member = |id: &str| {
            let body = healthy_market(id).join("\n");
            (format!("2016/BASIC-{id}.bz2"), bz2(body.as_bytes()))
        };
        let (a_name, a_bytes) = member("1.100");
        let (b_name, b_bytes) = member("1.200");
        let path = write_tar_archive(dir.path(), &[(a_name.as_str(), a_bytes), (b_name.as_str(), b_bytes)]);

        let archive: Arc<dyn MarketArchive> = Arc::new(TarArchive::open(&path).unwrap());
        let (catalog, stats) = scan_archive_concurrent(Arc::clone(&archive), Arc::new(criteria()), 2).await;
        assert_eq!(catalog.market_ids(), vec!["1.100", "1.200"]);
        assert_eq!(stats.entries_skipped, 0);

        let store = run_concurrent(archive, Arc::new(catalog), Arc::new(engine()), 2).await;
        let rows = store.rows();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].market_id, "100");
        assert_eq!(rows[2].market_id, "200");
        let json = serde_json::to_value(&rows[0]).unwrap();
        assert_eq!(json["price_5_mins"], 3.0);
        assert_eq!(json["selection_id"], "1");
    }
}
