//! Wall time spent per market, kept as an HDR histogram in microseconds.

use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;

/// Upper bound of a single market's processing time: one hour.
const MAX_TRACKED_US: u64 = 3_600_000_000;

/// Quantiles of per-market processing time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimingSummary {
    pub markets: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
}

pub struct WorkerTimings {
    // None only if the histogram bounds were rejected; samples are then dropped.
    hist: Mutex<Option<Histogram<u64>>>,
}

impl WorkerTimings {
    pub fn new() -> Self {
        Self {
            hist: Mutex::new(Histogram::new_with_bounds(1, MAX_TRACKED_US, 3).ok()),
        }
    }

    /// Sub-microsecond runs count as 1us; anything past the bound saturates.
    pub fn record(&self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX).max(1);
        if let Ok(mut guard) = self.hist.lock() {
            if let Some(h) = guard.as_mut() {
                h.saturating_record(us);
            }
        }
    }

    /// None until at least one market has been recorded.
    pub fn summary(&self) -> Option<TimingSummary> {
        let guard = self.hist.lock().ok()?;
        let h = guard.as_ref().filter(|h| h.len() > 0)?;
        Some(TimingSummary {
            markets: h.len(),
            p50_us: h.value_at_quantile(0.50),
            p95_us: h.value_at_quantile(0.95),
            p99_us: h.value_at_quantile(0.99),
        })
    }
}

impl Default for WorkerTimings {
    fn default() -> Self {
        Self::new()
    }
}
