//! SQLite access for the scanner.
//!
//! All queries are runtime-bound (`sqlx::query` / `query_as`) so the crate
//! builds without a live DATABASE_URL. The trend engine only ever reads
//! observations and writes whole trend records; nothing here mutates an
//! observation outside the per-day upsert.

use std::collections::HashMap;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::db::models::{
    AdvertiserTrendRow, HarvestRunRow, ObservationRow, ScheduleRow, TrendRecordRow,
};
use crate::error::Result;
use crate::types::{
    AdvertiserRecord, EpcObservation, ScheduleConfig, TrendCategory, TrendRecord,
};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the SQLite database at `path`.
    pub async fn connect(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{path}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // -----------------------------------------------------------------------
    // Advertisers
    // -----------------------------------------------------------------------

    pub async fn upsert_advertiser(&self, rec: &AdvertiserRecord, now_ns: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO advertisers (
                adv_id, name, merchant_id, category, adv_type,
                mailing_region, approval_type, logo_url, first_seen_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(adv_id) DO UPDATE SET
                name = excluded.name,
                merchant_id = excluded.merchant_id,
                category = excluded.category,
                adv_type = excluded.adv_type,
                mailing_region = excluded.mailing_region,
                approval_type = excluded.approval_type,
                logo_url = excluded.logo_url,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&rec.adv_id)
        .bind(&rec.name)
        .bind(&rec.merchant_id)
        .bind(&rec.category)
        .bind(&rec.adv_type)
        .bind(&rec.mailing_region)
        .bind(&rec.approval_type)
        .bind(&rec.logo_url)
        .bind(now_ns)
        .bind(now_ns)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn all_advertiser_ids(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>("SELECT adv_id FROM advertisers ORDER BY adv_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    pub async fn advertiser_count(&self) -> Result<i64> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM advertisers")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    // -----------------------------------------------------------------------
    // EPC observations
    // -----------------------------------------------------------------------

    /// Record one observation. Re-ingesting the same (advertiser, day)
    /// replaces the prior value.
    pub async fn upsert_observation(
        &self,
        adv_id: &str,
        day: i64,
        epc: f64,
        rate: Option<f64>,
        now_ns: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO epc_observations (adv_id, day, epc, rate, recorded_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(adv_id, day) DO UPDATE SET
                epc = excluded.epc,
                rate = excluded.rate,
                recorded_at = excluded.recorded_at
            "#,
        )
        .bind(adv_id)
        .bind(day)
        .bind(epc)
        .bind(rate)
        .bind(now_ns)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Observations for one advertiser within `[start_day, end_day]`,
    /// ascending by day. Days with no data are simply absent.
    pub async fn get_observations(
        &self,
        adv_id: &str,
        start_day: i64,
        end_day: i64,
    ) -> Result<Vec<EpcObservation>> {
        let rows = sqlx::query_as::<_, ObservationRow>(
            r#"
            SELECT day, epc FROM epc_observations
            WHERE adv_id = ? AND day >= ? AND day <= ?
            ORDER BY day ASC
            "#,
        )
        .bind(adv_id)
        .bind(start_day)
        .bind(end_day)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| EpcObservation { day: r.day, epc: r.epc })
            .collect())
    }

    pub async fn observation_count(&self) -> Result<i64> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM epc_observations")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Most recent day with any observation, if one exists.
    pub async fn latest_observation_day(&self) -> Result<Option<i64>> {
        let day = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(day) FROM epc_observations")
            .fetch_one(&self.pool)
            .await?;
        Ok(day)
    }

    // -----------------------------------------------------------------------
    // Trend records
    // -----------------------------------------------------------------------

    /// Write a whole trend record in one statement. Create-or-overwrite:
    /// all window fields land together or not at all.
    pub async fn upsert_trend_record(&self, record: &TrendRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trend_records (
                adv_id,
                avg_epc_7, slope_7, category_7,
                avg_epc_14, slope_14, category_14,
                avg_epc_30, slope_30, category_30,
                last_calculated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(adv_id) DO UPDATE SET
                avg_epc_7 = excluded.avg_epc_7,
                slope_7 = excluded.slope_7,
                category_7 = excluded.category_7,
                avg_epc_14 = excluded.avg_epc_14,
                slope_14 = excluded.slope_14,
                category_14 = excluded.category_14,
                avg_epc_30 = excluded.avg_epc_30,
                slope_30 = excluded.slope_30,
                category_30 = excluded.category_30,
                last_calculated_at = excluded.last_calculated_at
            "#,
        )
        .bind(&record.adv_id)
        .bind(record.trend_7.avg_epc)
        .bind(record.trend_7.slope)
        .bind(record.trend_7.category.as_str())
        .bind(record.trend_14.avg_epc)
        .bind(record.trend_14.slope)
        .bind(record.trend_14.category.as_str())
        .bind(record.trend_30.avg_epc)
        .bind(record.trend_30.slope)
        .bind(record.trend_30.category.as_str())
        .bind(record.last_calculated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_trend_record(&self, adv_id: &str) -> Result<Option<TrendRecord>> {
        let row = sqlx::query_as::<_, TrendRecordRow>(
            "SELECT * FROM trend_records WHERE adv_id = ?",
        )
        .bind(adv_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(TrendRecordRow::into_record))
    }

    /// Bulk fetch keyed by advertiser id. Missing advertisers are simply
    /// absent from the map.
    pub async fn get_trend_records(
        &self,
        adv_ids: &[String],
    ) -> Result<HashMap<String, TrendRecord>> {
        if adv_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; adv_ids.len()].join(", ");
        let sql =
            format!("SELECT * FROM trend_records WHERE adv_id IN ({placeholders})");

        let mut query = sqlx::query_as::<_, TrendRecordRow>(&sql);
        for id in adv_ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.adv_id.clone(), r.into_record()))
            .collect())
    }

    /// Advertisers joined with one trend window, filtered and ordered by
    /// average EPC descending. The window picks a concrete column set via an
    /// explicit match; there is deliberately no dynamic column-name assembly.
    pub async fn list_advertisers_by_trend(
        &self,
        window: usize,
        category: Option<TrendCategory>,
        min_avg_epc: f64,
        limit: i64,
    ) -> Result<Vec<AdvertiserTrendRow>> {
        let sql = match window {
            7 => {
                r#"
                SELECT a.adv_id, a.name, a.category,
                       t.avg_epc_7 AS avg_epc, t.slope_7 AS slope,
                       t.category_7 AS trend_category, t.last_calculated_at
                FROM advertisers a
                LEFT JOIN trend_records t ON a.adv_id = t.adv_id
                WHERE (? IS NULL OR t.category_7 = ?)
                  AND COALESCE(t.avg_epc_7, 0) >= ?
                ORDER BY t.avg_epc_7 DESC NULLS LAST
                LIMIT ?
                "#
            }
            14 => {
                r#"
                SELECT a.adv_id, a.name, a.category,
                       t.avg_epc_14 AS avg_epc, t.slope_14 AS slope,
                       t.category_14 AS trend_category, t.last_calculated_at
                FROM advertisers a
                LEFT JOIN trend_records t ON a.adv_id = t.adv_id
                WHERE (? IS NULL OR t.category_14 = ?)
                  AND COALESCE(t.avg_epc_14, 0) >= ?
                ORDER BY t.avg_epc_14 DESC NULLS LAST
                LIMIT ?
                "#
            }
            _ => {
                r#"
                SELECT a.adv_id, a.name, a.category,
                       t.avg_epc_30 AS avg_epc, t.slope_30 AS slope,
                       t.category_30 AS trend_category, t.last_calculated_at
                FROM advertisers a
                LEFT JOIN trend_records t ON a.adv_id = t.adv_id
                WHERE (? IS NULL OR t.category_30 = ?)
                  AND COALESCE(t.avg_epc_30, 0) >= ?
                ORDER BY t.avg_epc_30 DESC NULLS LAST
                LIMIT ?
                "#
            }
        };

        let filter = category.map(|c| c.as_str());
        let rows = sqlx::query_as::<_, AdvertiserTrendRow>(sql)
            .bind(filter)
            .bind(filter)
            .bind(min_avg_epc)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Count of trend records per category for one window.
    pub async fn trend_category_counts(&self, window: usize) -> Result<Vec<(String, i64)>> {
        let sql = match window {
            7 => "SELECT category_7, COUNT(*) FROM trend_records GROUP BY category_7",
            14 => "SELECT category_14, COUNT(*) FROM trend_records GROUP BY category_14",
            _ => "SELECT category_30, COUNT(*) FROM trend_records GROUP BY category_30",
        };
        let rows = sqlx::query_as::<_, (String, i64)>(sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Harvest runs
    // -----------------------------------------------------------------------

    pub async fn insert_harvest_run(&self, run_day: i64, started_at_ns: i64) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO harvest_runs (run_day, started_at, status) VALUES (?, ?, 'running')",
        )
        .bind(run_day)
        .bind(started_at_ns)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn finish_harvest_run(
        &self,
        id: i64,
        finished_at_ns: i64,
        pages_fetched: i64,
        success_count: i64,
        error_count: i64,
        trend_failures: i64,
        status: &str,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE harvest_runs SET
                finished_at = ?, pages_fetched = ?, success_count = ?,
                error_count = ?, trend_failures = ?, status = ?, error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(finished_at_ns)
        .bind(pages_fetched)
        .bind(success_count)
        .bind(error_count)
        .bind(trend_failures)
        .bind(status)
        .bind(error_message)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_harvest_runs(&self, limit: i64) -> Result<Vec<HarvestRunRow>> {
        let rows = sqlx::query_as::<_, HarvestRunRow>(
            "SELECT * FROM harvest_runs ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn last_harvest_started_at(&self) -> Result<Option<i64>> {
        let at = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(started_at) FROM harvest_runs")
            .fetch_one(&self.pool)
            .await?;
        Ok(at)
    }

    // -----------------------------------------------------------------------
    // Schedule config
    // -----------------------------------------------------------------------

    /// Insert the default schedule row if none exists yet.
    pub async fn ensure_schedule(&self, default_interval_secs: u64, now_ns: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO schedule_config (id, enabled, interval_secs, updated_at)
            VALUES (1, 1, ?, ?)
            "#,
        )
        .bind(default_interval_secs as i64)
        .bind(now_ns)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_schedule(&self) -> Result<ScheduleConfig> {
        let row = sqlx::query_as::<_, ScheduleRow>(
            "SELECT enabled, interval_secs FROM schedule_config WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(ScheduleConfig {
            enabled: row.enabled != 0,
            interval_secs: row.interval_secs.max(0) as u64,
        })
    }

    pub async fn update_schedule(&self, schedule: ScheduleConfig, now_ns: i64) -> Result<()> {
        sqlx::query(
            "UPDATE schedule_config SET enabled = ?, interval_secs = ?, updated_at = ? WHERE id = 1",
        )
        .bind(i64::from(schedule.enabled))
        .bind(schedule.interval_secs as i64)
        .bind(now_ns)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WindowTrend;

    async fn test_db() -> Database {
        // Single connection: each pooled connection would otherwise get its
        // own private in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        Database::new(pool)
    }

    fn record(adv_id: &str, slope_30: f64) -> TrendRecord {
        let flat = WindowTrend {
            slope: 0.0,
            avg_epc: 1.0,
            category: TrendCategory::Stable,
        };
        TrendRecord {
            adv_id: adv_id.to_string(),
            trend_7: flat,
            trend_14: flat,
            trend_30: WindowTrend {
                slope: slope_30,
                avg_epc: 2.0,
                category: TrendCategory::Upward,
            },
            last_calculated_at: 1,
        }
    }

    #[tokio::test]
    async fn observation_upsert_overwrites_same_day() {
        let db = test_db().await;
        db.upsert_observation("a1", 100, 1.5, None, 1).await.unwrap();
        db.upsert_observation("a1", 100, 2.5, Some(0.1), 2).await.unwrap();

        let obs = db.get_observations("a1", 90, 110).await.unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0], EpcObservation { day: 100, epc: 2.5 });
    }

    #[tokio::test]
    async fn observations_are_range_filtered_and_ascending() {
        let db = test_db().await;
        for day in [105i64, 101, 103, 99, 111] {
            db.upsert_observation("a1", day, day as f64, None, 1)
                .await
                .unwrap();
        }
        db.upsert_observation("other", 103, 9.0, None, 1).await.unwrap();

        let obs = db.get_observations("a1", 100, 110).await.unwrap();
        let days: Vec<i64> = obs.iter().map(|o| o.day).collect();
        assert_eq!(days, vec![101, 103, 105]);
    }

    #[tokio::test]
    async fn trend_record_round_trips_and_overwrites() {
        let db = test_db().await;
        assert!(db.get_trend_record("a1").await.unwrap().is_none());

        db.upsert_trend_record(&record("a1", 0.5)).await.unwrap();
        let first = db.get_trend_record("a1").await.unwrap().unwrap();
        assert_eq!(first.trend_30.slope, 0.5);
        assert_eq!(first.trend_30.category, TrendCategory::Upward);

        db.upsert_trend_record(&record("a1", -0.5)).await.unwrap();
        let second = db.get_trend_record("a1").await.unwrap().unwrap();
        assert_eq!(second.trend_30.slope, -0.5);

        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM trend_records")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(n, 1, "upsert must not duplicate rows");
    }

    #[tokio::test]
    async fn bulk_fetch_maps_by_advertiser() {
        let db = test_db().await;
        db.upsert_trend_record(&record("a1", 0.1)).await.unwrap();
        db.upsert_trend_record(&record("a2", 0.2)).await.unwrap();

        let ids = vec!["a1".to_string(), "a2".to_string(), "missing".to_string()];
        let map = db.get_trend_records(&ids).await.unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["a2"].trend_30.slope, 0.2);
        assert!(!map.contains_key("missing"));
    }

    #[tokio::test]
    async fn schedule_defaults_then_updates() {
        let db = test_db().await;
        db.ensure_schedule(86_400, 1).await.unwrap();
        // A second ensure must not clobber the existing row.
        db.update_schedule(
            ScheduleConfig { enabled: false, interval_secs: 3600 },
            2,
        )
        .await
        .unwrap();
        db.ensure_schedule(86_400, 3).await.unwrap();

        let schedule = db.get_schedule().await.unwrap();
        assert!(!schedule.enabled);
        assert_eq!(schedule.interval_secs, 3600);
    }

    #[tokio::test]
    async fn harvest_run_lifecycle() {
        let db = test_db().await;
        let id = db.insert_harvest_run(200, 10).await.unwrap();
        db.finish_harvest_run(id, 20, 3, 250, 2, 1, "completed", None)
            .await
            .unwrap();

        let runs = db.recent_harvest_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "completed");
        assert_eq!(runs[0].success_count, 250);
        assert_eq!(db.last_harvest_started_at().await.unwrap(), Some(10));
    }
}
