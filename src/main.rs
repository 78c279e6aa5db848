mod api;
mod config;
mod date;
mod db;
mod error;
mod harvester;
mod ingest;
mod scheduler;
mod trend;
mod types;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::{Config, CONTROL_CHANNEL_CAPACITY};
use crate::db::Database;
use crate::error::Result;
use crate::scheduler::HarvestScheduler;
use crate::trend::TrendMaintainer;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let db = Database::connect(&cfg.db_path).await?;
    sqlx::migrate!("./migrations").run(db.pool()).await?;
    db.ensure_schedule(cfg.harvest_interval_secs, now_ns()).await?;
    info!("Database ready at {}", cfg.db_path);

    let advertisers = db.advertiser_count().await?;
    let observations = db.observation_count().await?;
    let schedule = db.get_schedule().await?;
    info!(
        advertisers,
        observations,
        "Store ready: {advertisers} advertisers, {observations} observations; harvest schedule {} (every {}s)",
        if schedule.enabled { "enabled" } else { "disabled" },
        schedule.interval_secs,
    );

    if cfg.auth_token.is_empty() {
        warn!("AFFILIATE_AUTH_TOKEN not set, upstream listing requests will likely be rejected");
    }

    // --- Shared state + control channel ---
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());
    let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);

    // --- Harvest scheduler (background) ---
    let scheduler = HarvestScheduler::new(
        cfg.clone(),
        db.clone(),
        control_rx,
        Arc::clone(&health),
        Arc::clone(&latency),
    );
    tokio::spawn(async move { scheduler.run().await });

    // --- HTTP API server ---
    let api_state = ApiState {
        maintainer: TrendMaintainer::new(db.clone()),
        db,
        health,
        latency,
        control_tx,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}
