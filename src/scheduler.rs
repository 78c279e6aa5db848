//! Supervised background harvest scheduling.
//!
//! A single task owns the harvest lifecycle: it ticks on a short interval,
//! consults the persisted schedule row to decide whether a run is due, and
//! also accepts manual triggers from the HTTP API over a control channel.
//! Schedule state lives in the database, so an operator's configuration
//! survives process restarts.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::{Config, SCHEDULER_TICK_SECS};
use crate::date::today_utc;
use crate::db::Database;
use crate::error::Result;
use crate::harvester::fetch_advertisers;
use crate::ingest::ingest_daily_records;
use crate::trend::TrendMaintainer;
use crate::types::ControlMsg;

pub struct HarvestScheduler {
    cfg: Config,
    db: Database,
    maintainer: TrendMaintainer,
    control_rx: mpsc::Receiver<ControlMsg>,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
}

impl HarvestScheduler {
    pub fn new(
        cfg: Config,
        db: Database,
        control_rx: mpsc::Receiver<ControlMsg>,
        health: Arc<HealthState>,
        latency: Arc<LatencyStats>,
    ) -> Self {
        let maintainer = TrendMaintainer::new(db.clone());
        Self { cfg, db, maintainer, control_rx, health, latency }
    }

    pub async fn run(mut self) {
        let mut ticker = interval(Duration::from_secs(SCHEDULER_TICK_SECS));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.scheduled_run_due().await {
                        Ok(true) => self.run_harvest(today_utc()).await,
                        Ok(false) => {}
                        Err(e) => warn!("schedule check failed: {e}"),
                    }
                }
                Some(msg) = self.control_rx.recv() => {
                    let ControlMsg::RunNow { day } = msg;
                    self.run_harvest(day.unwrap_or_else(today_utc)).await;
                }
            }
        }
    }

    /// A scheduled run is due when the schedule is enabled and the last run
    /// started at least one interval ago (or never ran).
    async fn scheduled_run_due(&self) -> Result<bool> {
        let schedule = self.db.get_schedule().await?;
        if !schedule.enabled {
            return Ok(false);
        }
        let interval_ns = schedule.interval_secs as i64 * 1_000_000_000;
        let due = match self.db.last_harvest_started_at().await? {
            None => true,
            Some(at) => now_ns() - at >= interval_ns,
        };
        Ok(due)
    }

    async fn run_harvest(&self, day: i64) {
        if self.health.harvest_running() {
            warn!("harvest already running, trigger ignored");
            return;
        }
        self.health.set_harvest_running(true);
        let outcome = self.harvest(day).await;
        self.health.set_harvest_running(false);

        if let Err(e) = outcome {
            error!("Harvest failed: {e}");
        }
    }

    async fn harvest(&self, day: i64) -> Result<()> {
        let started = now_ns();
        let run_id = self.db.insert_harvest_run(day, started).await?;
        info!(day, run_id, "Harvest started");

        let (records, stats) = match fetch_advertisers(&self.cfg, &self.latency).await {
            Ok(fetched) => fetched,
            Err(e) => {
                let msg = e.to_string();
                self.db
                    .finish_harvest_run(run_id, now_ns(), 0, 0, 0, 0, "failed", Some(&msg))
                    .await?;
                return Err(e);
            }
        };

        let report =
            ingest_daily_records(&self.db, &self.maintainer, &self.health, &records, day).await;

        let status = if report.errors == 0 { "completed" } else { "partial" };
        self.db
            .finish_harvest_run(
                run_id,
                now_ns(),
                stats.pages_fetched as i64,
                report.success as i64,
                report.errors as i64,
                report.trend_failures as i64,
                status,
                None,
            )
            .await?;
        self.health.set_last_harvest_at_ns(now_ns() as u64);

        info!(
            day,
            run_id,
            advertisers = report.success,
            errors = report.errors,
            trend_failures = report.trend_failures,
            pages = stats.pages_fetched,
            "Harvest {status}: {} advertisers ingested, {} errors, {} trend failures",
            report.success,
            report.errors,
            report.trend_failures,
        );
        Ok(())
    }
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}
