//! Shared health state for the /health endpoint.
//! Updated by the harvest scheduler and ingest path, read by the API.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Default)]
pub struct HealthState {
    /// True while a harvest cycle is in flight.
    harvest_running: AtomicBool,
    /// Nanosecond timestamp of the last completed harvest (0 = none).
    last_harvest_at_ns: AtomicU64,
    /// Lifetime count of non-fatal per-advertiser trend recalculation failures.
    trend_failures: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_harvest_running(&self, v: bool) {
        self.harvest_running.store(v, Ordering::Relaxed);
    }

    pub fn harvest_running(&self) -> bool {
        self.harvest_running.load(Ordering::Relaxed)
    }

    pub fn set_last_harvest_at_ns(&self, ns: u64) {
        self.last_harvest_at_ns.store(ns, Ordering::Relaxed);
    }

    pub fn last_harvest_at_ns(&self) -> u64 {
        self.last_harvest_at_ns.load(Ordering::Relaxed)
    }

    pub fn inc_trend_failures(&self) {
        self.trend_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn trend_failures(&self) -> u64 {
        self.trend_failures.load(Ordering::Relaxed)
    }
}
