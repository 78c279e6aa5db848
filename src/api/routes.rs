use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::{TREND_WINDOWS, TREND_WINDOW_DAYS};
use crate::date::{day_label, format_day, parse_date, today_utc};
use crate::db::models::{AdvertiserTrendRow, HarvestRunRow};
use crate::db::Database;
use crate::error::AppError;
use crate::trend::maintainer::zero_fill;
use crate::trend::TrendMaintainer;
use crate::types::{ControlMsg, ScheduleConfig, TrendCategory, TrendRecord};

#[derive(Clone)]
pub struct ApiState {
    pub db: Database,
    pub maintainer: TrendMaintainer,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
    pub control_tx: mpsc::Sender<ControlMsg>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/advertisers", get(get_advertisers))
        .route("/advertisers/:id/trend", get(get_advertiser_trend))
        .route("/advertisers/:id/history", get(get_advertiser_history))
        .route("/trends", get(get_trend_records_bulk))
        .route("/trends/summary", get(get_trends_summary))
        .route("/trends/backfill", post(post_trends_backfill))
        .route("/harvests/recent", get(get_recent_harvests))
        .route("/harvest", post(post_harvest))
        .route("/stats/latency", get(get_stats_latency))
        .route("/schedule", get(get_schedule).post(post_schedule))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query / request param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct AdvertisersQuery {
    pub window: Option<usize>,
    pub category: Option<String>,
    pub min_avg_epc: Option<f64>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub days: Option<usize>,
    pub date: Option<String>,
}

#[derive(Deserialize)]
pub struct TrendRecordsQuery {
    /// Comma-separated advertiser ids.
    pub ids: String,
}

#[derive(Deserialize)]
pub struct RecentHarvestsQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct HarvestTriggerRequest {
    pub date: Option<String>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Flat per-window trend record as served to reporting consumers.
#[derive(Serialize)]
pub struct TrendRecordResponse {
    pub adv_id: String,
    pub avg_epc_7: f64,
    pub slope_7: f64,
    pub category_7: String,
    pub avg_epc_14: f64,
    pub slope_14: f64,
    pub category_14: String,
    pub avg_epc_30: f64,
    pub slope_30: f64,
    pub category_30: String,
    pub last_calculated_at: i64,
}

impl From<TrendRecord> for TrendRecordResponse {
    fn from(r: TrendRecord) -> Self {
        Self {
            adv_id: r.adv_id,
            avg_epc_7: r.trend_7.avg_epc,
            slope_7: r.trend_7.slope,
            category_7: r.trend_7.category.as_str().to_string(),
            avg_epc_14: r.trend_14.avg_epc,
            slope_14: r.trend_14.slope,
            category_14: r.trend_14.category.as_str().to_string(),
            avg_epc_30: r.trend_30.avg_epc,
            slope_30: r.trend_30.slope,
            category_30: r.trend_30.category.as_str().to_string(),
            last_calculated_at: r.last_calculated_at,
        }
    }
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub adv_id: String,
    pub days: usize,
    pub history: Vec<f64>,
    pub labels: Vec<String>,
    pub trend: String,
}

#[derive(Serialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

#[derive(Serialize)]
pub struct WindowSummary {
    pub window: usize,
    pub categories: Vec<CategoryCount>,
}

#[derive(Serialize)]
pub struct SummaryResponse {
    pub advertisers: i64,
    pub observations: i64,
    pub windows: Vec<WindowSummary>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub harvest_running: bool,
    pub last_harvest_at_ns: u64,
    pub trend_failures: u64,
    pub advertisers: i64,
    pub observations: i64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(
    State(state): State<ApiState>,
) -> Result<Json<HealthResponse>, AppError> {
    Ok(Json(HealthResponse {
        status: "ok",
        harvest_running: state.health.harvest_running(),
        last_harvest_at_ns: state.health.last_harvest_at_ns(),
        trend_failures: state.health.trend_failures(),
        advertisers: state.db.advertiser_count().await?,
        observations: state.db.observation_count().await?,
    }))
}

async fn get_advertisers(
    State(state): State<ApiState>,
    Query(params): Query<AdvertisersQuery>,
) -> Result<Response, AppError> {
    let window = params.window.unwrap_or(30);
    if !TREND_WINDOWS.contains(&window) {
        return Ok(bad_request(format!(
            "window must be one of {TREND_WINDOWS:?}"
        )));
    }

    let category = match params.category.as_deref() {
        None => None,
        Some(s) => match parse_category_param(s) {
            Some(c) => Some(c),
            None => return Ok(bad_request(format!("unknown trend category: {s}"))),
        },
    };

    let rows: Vec<AdvertiserTrendRow> = state
        .db
        .list_advertisers_by_trend(
            window,
            category,
            params.min_avg_epc.unwrap_or(0.0),
            params.limit.unwrap_or(100).clamp(1, 1000),
        )
        .await?;
    Ok(Json(rows).into_response())
}

async fn get_advertiser_trend(
    State(state): State<ApiState>,
    Path(adv_id): Path<String>,
) -> Result<Response, AppError> {
    match state.db.get_trend_record(&adv_id).await? {
        Some(record) => Ok(Json(TrendRecordResponse::from(record)).into_response()),
        None => Ok((StatusCode::NOT_FOUND, "no trend record").into_response()),
    }
}

async fn get_advertiser_history(
    State(state): State<ApiState>,
    Path(adv_id): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Response, AppError> {
    let days = params.days.unwrap_or(30).clamp(1, TREND_WINDOW_DAYS * 3);
    let as_of = match params.date.as_deref() {
        None => today_utc(),
        Some(s) => match parse_date(s) {
            Some(day) => day,
            None => return Ok(bad_request(format!("invalid date: {s}"))),
        },
    };

    let start = as_of - (days as i64 - 1);
    let observations = state.db.get_observations(&adv_id, start, as_of).await?;
    let history = zero_fill(&observations, start, days);
    let labels = (0..days as i64).map(|i| day_label(start + i)).collect();

    let trend = state
        .db
        .get_trend_record(&adv_id)
        .await?
        .as_ref()
        .and_then(|r| r.window(days))
        .map(|w| w.category)
        .unwrap_or(TrendCategory::Unknown);

    Ok(Json(HistoryResponse {
        adv_id,
        days,
        history,
        labels,
        trend: trend.as_str().to_string(),
    })
    .into_response())
}

/// Bulk trend lookup keyed by advertiser id. Ids without a record are
/// absent from the response rather than erroring.
async fn get_trend_records_bulk(
    State(state): State<ApiState>,
    Query(params): Query<TrendRecordsQuery>,
) -> Result<Json<std::collections::HashMap<String, TrendRecordResponse>>, AppError> {
    let ids: Vec<String> = params
        .ids
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    let records = state.db.get_trend_records(&ids).await?;
    Ok(Json(
        records
            .into_iter()
            .map(|(adv_id, record)| (adv_id, TrendRecordResponse::from(record)))
            .collect(),
    ))
}

async fn get_trends_summary(
    State(state): State<ApiState>,
) -> Result<Json<SummaryResponse>, AppError> {
    let mut windows = Vec::with_capacity(TREND_WINDOWS.len());
    for &window in &TREND_WINDOWS {
        let categories = state
            .db
            .trend_category_counts(window)
            .await?
            .into_iter()
            .map(|(category, count)| CategoryCount { category, count })
            .collect();
        windows.push(WindowSummary { window, categories });
    }

    Ok(Json(SummaryResponse {
        advertisers: state.db.advertiser_count().await?,
        observations: state.db.observation_count().await?,
        windows,
    }))
}

async fn post_trends_backfill(
    State(state): State<ApiState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let as_of = state
        .db
        .latest_observation_day()
        .await?
        .unwrap_or_else(today_utc);
    let updated = state.maintainer.backfill(as_of).await?;
    Ok(Json(serde_json::json!({
        "updated": updated,
        "as_of": format_day(as_of),
    })))
}

async fn get_recent_harvests(
    State(state): State<ApiState>,
    Query(params): Query<RecentHarvestsQuery>,
) -> Result<Json<Vec<HarvestRunRow>>, AppError> {
    let limit = params.limit.unwrap_or(20).clamp(1, 200);
    Ok(Json(state.db.recent_harvest_runs(limit).await?))
}

async fn post_harvest(
    State(state): State<ApiState>,
    body: Option<Json<HarvestTriggerRequest>>,
) -> Response {
    let day = match body.as_ref().and_then(|b| b.date.as_deref()) {
        None => None,
        Some(s) => match parse_date(s) {
            Some(day) => Some(day),
            None => return bad_request(format!("invalid date: {s}")),
        },
    };

    match state.control_tx.try_send(ControlMsg::RunNow { day }) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"triggered": true})),
        )
            .into_response(),
        Err(_) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "triggered": false,
                "message": "harvest trigger queue is full",
            })),
        )
            .into_response(),
    }
}

async fn get_stats_latency(State(state): State<ApiState>) -> Response {
    Json(state.latency.summary()).into_response()
}

async fn get_schedule(
    State(state): State<ApiState>,
) -> Result<Json<ScheduleConfig>, AppError> {
    Ok(Json(state.db.get_schedule().await?))
}

async fn post_schedule(
    State(state): State<ApiState>,
    Json(schedule): Json<ScheduleConfig>,
) -> Result<Json<ScheduleConfig>, AppError> {
    state.db.update_schedule(schedule, now_ns()).await?;
    Ok(Json(state.db.get_schedule().await?))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, message).into_response()
}

/// Strict category parse for filter params: unknown strings are a caller
/// error, not an UNKNOWN filter.
fn parse_category_param(s: &str) -> Option<TrendCategory> {
    match s.to_ascii_uppercase().as_str() {
        "UPWARD" => Some(TrendCategory::Upward),
        "DOWNWARD" => Some(TrendCategory::Downward),
        "STABLE" => Some(TrendCategory::Stable),
        "VOLATILE" => Some(TrendCategory::Volatile),
        "UNKNOWN" => Some(TrendCategory::Unknown),
        _ => None,
    }
}

fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}
