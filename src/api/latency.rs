//! In-memory latency histogram for upstream listing-page fetches.
//! The harvester records, the API reads.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Page-fetch latency percentiles in milliseconds.
#[derive(Debug, Serialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

/// Shared latency stats. Values stored in microseconds.
pub struct LatencyStats {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

impl LatencyStats {
    /// Tracks 1us to 100s, 3 significant figures.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 100_000_000, 3)
            .expect("valid histogram bounds");
        Self { inner: Mutex::new(histogram) }
    }

    pub fn record(&self, d: Duration) {
        let us = d.as_micros().min(u128::from(u64::MAX)) as u64;
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.record(us.max(1));
        }
    }

    pub fn summary(&self) -> LatencySummary {
        let Ok(h) = self.inner.lock() else {
            return LatencySummary { samples: 0, p50_ms: None, p95_ms: None, p99_ms: None };
        };
        if h.len() == 0 {
            return LatencySummary { samples: 0, p50_ms: None, p95_ms: None, p99_ms: None };
        }
        let to_ms = |us: u64| us as f64 / 1000.0;
        LatencySummary {
            samples: h.len(),
            p50_ms: Some(to_ms(h.value_at_quantile(0.5))),
            p95_ms: Some(to_ms(h.value_at_quantile(0.95))),
            p99_ms: Some(to_ms(h.value_at_quantile(0.99))),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}
