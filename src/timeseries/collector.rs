use tracing::{debug, warn};

use crate::archive::MarketArchive;
use crate::error::Result;
use crate::stream::{MarketMessage, RecordStream};
use crate::types::Tick;

/// Extract every runner price observation from a market's messages.
///
/// Each tick takes its record's `pt` and the requested `market_id`. Records
/// without `pt` and `rc` items without `id` or `ltp` contribute nothing.
pub fn extract_ticks<I>(market_id: &str, records: I) -> Vec<Tick>
where
    I: IntoIterator<Item = MarketMessage>,
{
    let mut ticks = Vec::new();
    let mut missing_pt = 0usize;
    let mut incomplete_items = 0usize;

    for msg in records {
        let has_prices = msg.changes.iter().any(|c| c.rc.is_some());
        let Some(pt) = msg.pt else {
            if has_prices {
                missing_pt += 1;
            }
            continue;
        };
        for change in msg.changes {
            let Some(rc) = change.rc else { continue };
            for item in rc {
                match (item.id, item.ltp) {
                    (Some(id), Some(ltp)) => ticks.push(Tick {
                        timestamp: pt,
                        market_id: market_id.to_string(),
                        runner_id: id.into_string(),
                        last_traded_price: ltp,
                    }),
                    _ => incomplete_items += 1,
                }
            }
        }
    }

    if missing_pt > 0 || incomplete_items > 0 {
        debug!(
            market_id,
            missing_pt,
            incomplete_items,
            "[COLLECT] dropped price updates with missing fields",
        );
    }
    ticks
}

/// Re-reads cataloged markets from the archive and turns them into ticks.
pub struct TimeSeriesCollector<'a> {
    archive: &'a dyn MarketArchive,
}

impl<'a> TimeSeriesCollector<'a> {
    pub fn new(archive: &'a dyn MarketArchive) -> Self {
        Self { archive }
    }

    /// Ticks for one market. Fails only if the entry cannot be fetched.
    pub fn collect_market(&self, market_id: &str) -> Result<Vec<Tick>> {
        let bytes = self.archive.get_entry(market_id)?;
        let mut stream = RecordStream::new(&bytes);
        let ticks = extract_ticks(market_id, stream.by_ref());
        if stream.malformed() > 0 {
            debug!(market_id, malformed = stream.malformed(), "[COLLECT] skipped malformed records");
        }
        Ok(ticks)
    }

    /// Ticks for every listed market. Markets that cannot be read contribute
    /// nothing and do not stop the others.
    pub fn collect(&self, market_ids: &[String]) -> Vec<Tick> {
        let mut all = Vec::new();
        for market_id in market_ids {
            match self.collect_market(market_id) {
                Ok(mut ticks) => all.append(&mut ticks),
                Err(e) => warn!(market_id = %market_id, "[COLLECT] market skipped: {e}"),
            }
        }
        all
    }
}
