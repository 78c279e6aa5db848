//! Daily snapshot ingest and the per-advertiser trend hook.
//!
//! For each harvested record: upsert the advertiser, upsert the day's EPC
//! observation, and only after both writes have landed fire the trend
//! recalculation. The trend step runs outside the write path and is
//! non-fatal: a failed recalculation leaves the previous trend record in
//! place and never blocks the rest of the batch.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::api::health::HealthState;
use crate::db::Database;
use crate::trend::TrendMaintainer;
use crate::types::AdvertiserRecord;

#[derive(Debug, Default)]
pub struct IngestReport {
    /// Advertisers whose snapshot writes succeeded.
    pub success: usize,
    /// Advertisers skipped because a write failed.
    pub errors: usize,
    /// Successful writes whose trend recalculation failed.
    pub trend_failures: usize,
}

pub async fn ingest_daily_records(
    db: &Database,
    maintainer: &TrendMaintainer,
    health: &HealthState,
    records: &[AdvertiserRecord],
    day: i64,
) -> IngestReport {
    let mut report = IngestReport::default();

    for record in records {
        let now = now_ns();

        if let Err(e) = db.upsert_advertiser(record, now).await {
            warn!(adv_id = %record.adv_id, "advertiser upsert failed: {e}");
            report.errors += 1;
            continue;
        }
        if let Err(e) = db
            .upsert_observation(&record.adv_id, day, record.epc, record.rate, now)
            .await
        {
            warn!(adv_id = %record.adv_id, "observation upsert failed: {e}");
            report.errors += 1;
            continue;
        }
        report.success += 1;

        // Observation is durable; recalculate this advertiser's trend state.
        if let Err(e) = maintainer
            .process_daily_epc_trend(&record.adv_id, record.epc, day)
            .await
        {
            warn!(adv_id = %record.adv_id, "trend recalculation failed: {e}");
            report.trend_failures += 1;
            health.inc_trend_failures();
        }
    }

    report
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TrendCategory;
    use sqlx::sqlite::SqlitePoolOptions;

    fn record(adv_id: &str, epc: f64) -> AdvertiserRecord {
        AdvertiserRecord {
            adv_id: adv_id.to_string(),
            name: format!("Advertiser {adv_id}"),
            merchant_id: None,
            category: Some("retail".to_string()),
            adv_type: None,
            mailing_region: None,
            approval_type: None,
            logo_url: None,
            epc,
            rate: None,
        }
    }

    async fn test_db() -> Database {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        Database::new(pool)
    }

    #[tokio::test]
    async fn ingest_writes_observation_and_trend_record() {
        let db = test_db().await;
        let maintainer = TrendMaintainer::new(db.clone());
        let health = HealthState::new();
        let day = 20_000i64;

        let records = vec![record("a1", 1.5), record("a2", 0.0)];
        let report = ingest_daily_records(&db, &maintainer, &health, &records, day).await;

        assert_eq!(report.success, 2);
        assert_eq!(report.errors, 0);
        assert_eq!(report.trend_failures, 0);

        let obs = db.get_observations("a1", day, day).await.unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].epc, 1.5);

        // One observation in a 30-day window still yields a record; the
        // dense zero-filled series classifies, it never errors.
        let trend = db.get_trend_record("a1").await.unwrap().unwrap();
        assert_ne!(trend.trend_30.category, TrendCategory::Unknown);
    }

    #[tokio::test]
    async fn reingesting_a_day_is_idempotent() {
        let db = test_db().await;
        let maintainer = TrendMaintainer::new(db.clone());
        let health = HealthState::new();
        let day = 20_000i64;
        let records = vec![record("a1", 2.0)];

        ingest_daily_records(&db, &maintainer, &health, &records, day).await;
        let first = db.get_trend_record("a1").await.unwrap().unwrap();

        ingest_daily_records(&db, &maintainer, &health, &records, day).await;
        let second = db.get_trend_record("a1").await.unwrap().unwrap();

        assert_eq!(db.observation_count().await.unwrap(), 1);
        assert_eq!(first.trend_7, second.trend_7);
        assert_eq!(first.trend_14, second.trend_14);
        assert_eq!(first.trend_30, second.trend_30);
    }
}
