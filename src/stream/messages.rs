use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{MALFORMED_WARN_EVERY, MALFORMED_WARN_FIRST};
use crate::types::Millis;

static MALFORMED_RECORDS: AtomicU64 = AtomicU64::new(0);

/// Identifier that the feed emits either as a JSON number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FeedId {
    Number(u64),
    Text(String),
}

impl FeedId {
    pub fn into_string(self) -> String {
        match self {
            FeedId::Number(n) => n.to_string(),
            FeedId::Text(s) => s,
        }
    }
}

/// A runner entry inside `marketDefinition.runners`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRunner {
    pub id: Option<FeedId>,
    pub name: Option<String>,
    pub status: Option<String>,
    pub sort_priority: Option<u32>,
}

/// `marketDefinition` object. Every field is optional; presence is checked
/// when the definition is converted into a catalog entry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMarketDefinition {
    pub country_code: Option<String>,
    pub market_type: Option<String>,
    pub open_date: Option<String>,
    pub market_time: Option<String>,
    pub status: Option<String>,
    pub in_play: Option<bool>,
    pub betting_type: Option<String>,
    pub event_id: Option<FeedId>,
    pub event_name: Option<String>,
    pub venue: Option<String>,
    pub number_of_active_runners: Option<u32>,
    pub runners: Option<Vec<RawRunner>>,
}

/// One `rc` item: a runner's last traded price.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRunnerChange {
    pub id: Option<FeedId>,
    pub ltp: Option<f64>,
}

/// One `mc` entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketChange {
    pub id: Option<String>,
    #[serde(rename = "marketDefinition")]
    pub market_definition: Option<RawMarketDefinition>,
    pub rc: Option<Vec<RawRunnerChange>>,
}

/// Top-level shape of a line. `mc` entries stay undecoded here so that a
/// single bad entry does not take the whole line down with it.
#[derive(Debug, Deserialize)]
struct RawLine {
    pt: Option<Millis>,
    mc: Vec<serde_json::Value>,
}

/// One parsed line of the record stream.
#[derive(Debug, Clone, Default)]
pub struct MarketMessage {
    /// Record timestamp, epoch milliseconds.
    pub pt: Option<Millis>,
    pub changes: Vec<MarketChange>,
}

/// Lazy iterator over the newline-delimited records of one decompressed entry.
///
/// The stream borrows the bytes and is `Clone`, so it can be restarted from
/// the beginning by cloning before iteration. Lines that are not JSON or lack
/// an `mc` array are skipped and counted; blank lines are ignored.
#[derive(Debug, Clone)]
pub struct RecordStream<'a> {
    data: &'a [u8],
    pos: usize,
    malformed: usize,
    skipped_changes: usize,
}

impl<'a> RecordStream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0, malformed: 0, skipped_changes: 0 }
    }

    /// Lines skipped so far because they did not parse.
    pub fn malformed(&self) -> usize {
        self.malformed
    }

    /// `mc` entries dropped so far because their fields had the wrong shape.
    pub fn skipped_changes(&self) -> usize {
        self.skipped_changes
    }

    fn next_line(&mut self) -> Option<&'a [u8]> {
        if self.pos >= self.data.len() {
            return None;
        }
        let rest = &self.data[self.pos..];
        let (line, advance) = match rest.iter().position(|b| *b == b'\n') {
            Some(nl) => (&rest[..nl], nl + 1),
            None => (rest, rest.len()),
        };
        self.pos += advance;
        Some(line)
    }
}

impl<'a> Iterator for RecordStream<'a> {
    type Item = MarketMessage;

    fn next(&mut self) -> Option<MarketMessage> {
        while let Some(line) = self.next_line() {
            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }
            match parse_line(line) {
                Ok((msg, dropped)) => {
                    self.skipped_changes += dropped;
                    return Some(msg);
                }
                Err(e) => {
                    self.malformed += 1;
                    note_malformed(line, &e);
                }
            }
        }
        None
    }
}

/// Parse every record in `data`, eagerly.
pub fn parse_records(data: &[u8]) -> Vec<MarketMessage> {
    RecordStream::new(data).collect()
}

/// Parse a single line into a message.
/// Returns the message and the number of `mc` entries that had to be dropped.
fn parse_line(line: &[u8]) -> std::result::Result<(MarketMessage, usize), serde_json::Error> {
    let raw: RawLine = serde_json::from_slice(line)?;
    let mut dropped = 0usize;
    let changes = raw
        .mc
        .into_iter()
        .filter_map(|v| match serde_json::from_value::<MarketChange>(v) {
            Ok(change) => Some(change),
            Err(e) => {
                dropped += 1;
                debug!("[STREAM] dropping market change entry: {e}");
                None
            }
        })
        .collect();
    Ok((MarketMessage { pt: raw.pt, changes }, dropped))
}

fn note_malformed(line: &[u8], err: &serde_json::Error) {
    let count = MALFORMED_RECORDS.fetch_add(1, Ordering::Relaxed) + 1;
    if count <= MALFORMED_WARN_FIRST || count % MALFORMED_WARN_EVERY == 0 {
        let sample = String::from_utf8_lossy(&line[..200.min(line.len())]);
        warn!(count, "[STREAM] malformed record skipped ({err}): {sample}");
    }
}
