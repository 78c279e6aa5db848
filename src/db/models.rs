//! Database row types used by sqlx for typed reads.

use serde::Serialize;

use crate::types::{TrendCategory, TrendRecord, WindowTrend};

#[derive(Debug, sqlx::FromRow)]
pub struct ObservationRow {
    pub day: i64,
    pub epc: f64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct TrendRecordRow {
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

impl TrendRecordRow {
    pub fn into_record(self) -> TrendRecord {
        TrendRecord {
            adv_id: self.adv_id,
            trend_7: WindowTrend {
                slope: self.slope_7,
                avg_epc: self.avg_epc_7,
                category: TrendCategory::parse(&self.category_7),
            },
            trend_14: WindowTrend {
                slope: self.slope_14,
                avg_epc: self.avg_epc_14,
                category: TrendCategory::parse(&self.category_14),
            },
            trend_30: WindowTrend {
                slope: self.slope_30,
                avg_epc: self.avg_epc_30,
                category: TrendCategory::parse(&self.category_30),
            },
            last_calculated_at: self.last_calculated_at,
        }
    }
}

/// Joined advertiser + one trend window, as served by the listing endpoint.
#[derive(Debug, sqlx::FromRow, Serialize)]
pub struct AdvertiserTrendRow {
    pub adv_id: String,
    pub name: String,
    pub category: Option<String>,
    pub avg_epc: Option<f64>,
    pub slope: Option<f64>,
    pub trend_category: Option<String>,
    pub last_calculated_at: Option<i64>,
}

#[derive(Debug, sqlx::FromRow, Serialize)]
pub struct HarvestRunRow {
    pub id: i64,
    pub run_day: i64,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub pages_fetched: i64,
    pub success_count: i64,
    pub error_count: i64,
    pub trend_failures: i64,
    pub status: String,
    pub error_message: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ScheduleRow {
    pub enabled: i64,
    pub interval_secs: i64,
}
