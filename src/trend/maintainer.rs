//! Per-advertiser trend state maintenance.
//!
//! Fired once per (advertiser, day) after the daily observation is durably
//! written. Reads the trailing history back out of the store (the store is
//! the source of truth, not the value that triggered the call), zero-fills
//! it to a dense calendar-aligned series, classifies every configured
//! trailing window, and overwrites the advertiser's trend record whole.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::config::{HISTORY_RETRY_BACKOFF_MS, TREND_WINDOWS, TREND_WINDOW_DAYS};
use crate::db::Database;
use crate::error::Result;
use crate::trend::calculator::compute_window_trends;
use crate::types::{EpcObservation, TrendRecord};

#[derive(Clone)]
pub struct TrendMaintainer {
    db: Database,
}

impl TrendMaintainer {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Recompute and upsert the trend record for `adv_id` as of `as_of_day`.
    ///
    /// `new_epc_value` is carried for traceability only; the observation
    /// must already be persisted before this is called. Idempotent: calling
    /// it again over unchanged observations yields the same record.
    pub async fn process_daily_epc_trend(
        &self,
        adv_id: &str,
        new_epc_value: f64,
        as_of_day: i64,
    ) -> Result<()> {
        debug!(
            adv_id = %adv_id,
            new_epc = new_epc_value,
            day = as_of_day,
            "trend recalculation triggered",
        );
        self.recalculate(adv_id, as_of_day).await
    }

    /// Recompute trend records for every known advertiser as of `as_of_day`.
    /// Per-advertiser failures are logged and skipped; returns the number of
    /// records written.
    pub async fn backfill(&self, as_of_day: i64) -> Result<usize> {
        let adv_ids = self.db.all_advertiser_ids().await?;
        let mut updated = 0usize;
        for adv_id in &adv_ids {
            match self.recalculate(adv_id, as_of_day).await {
                Ok(()) => updated += 1,
                Err(e) => warn!(adv_id = %adv_id, "backfill recalculation failed: {e}"),
            }
        }
        Ok(updated)
    }

    async fn recalculate(&self, adv_id: &str, as_of_day: i64) -> Result<()> {
        let start_day = as_of_day - (TREND_WINDOW_DAYS as i64 - 1);
        let history = self.read_history(adv_id, start_day, as_of_day).await?;
        let dense = zero_fill(&history, start_day, TREND_WINDOW_DAYS);

        let trends = compute_window_trends(&dense, &TREND_WINDOWS);
        let record = TrendRecord {
            adv_id: adv_id.to_string(),
            trend_7: trends[0].1,
            trend_14: trends[1].1,
            trend_30: trends[2].1,
            last_calculated_at: now_ns(),
        };

        self.db.upsert_trend_record(&record).await?;

        debug!(
            adv_id = %adv_id,
            observed = history.len(),
            category_7 = %record.trend_7.category,
            category_14 = %record.trend_14.category,
            category_30 = %record.trend_30.category,
            "trend record updated",
        );
        Ok(())
    }

    /// History fetch with bounded retry. Safe to retry because the whole
    /// recalculation is idempotent.
    async fn read_history(
        &self,
        adv_id: &str,
        start_day: i64,
        end_day: i64,
    ) -> Result<Vec<EpcObservation>> {
        let mut attempt = 0usize;
        loop {
            match self.db.get_observations(adv_id, start_day, end_day).await {
                Ok(obs) => return Ok(obs),
                Err(e) if attempt < HISTORY_RETRY_BACKOFF_MS.len() => {
                    let backoff = HISTORY_RETRY_BACKOFF_MS[attempt];
                    warn!(
                        adv_id = %adv_id,
                        attempt = attempt + 1,
                        "history read failed ({e}), retrying in {backoff}ms",
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Expand sparse observations into a dense series of exactly `len` values
/// starting at `start_day`. Days without an observation contribute 0: a
/// window is never shortened by missing data, so day-index alignment for the
/// regression is preserved.
pub fn zero_fill(observations: &[EpcObservation], start_day: i64, len: usize) -> Vec<f64> {
    let mut dense = vec![0.0; len];
    for obs in observations {
        let idx = obs.day - start_day;
        if (0..len as i64).contains(&idx) {
            dense[idx as usize] = obs.epc;
        }
    }
    dense
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trend::calculator::{calculate_trend, trailing};
    use crate::types::TrendCategory;
    use sqlx::sqlite::SqlitePoolOptions;

    const AS_OF: i64 = 20_000;

    async fn test_db() -> Database {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        Database::new(pool)
    }

    async fn insert(db: &Database, adv_id: &str, day: i64, epc: f64) {
        db.upsert_observation(adv_id, day, epc, None, 1).await.unwrap();
    }

    #[test]
    fn zero_fill_keeps_window_length() {
        let obs = vec![
            EpcObservation { day: 102, epc: 1.5 },
            EpcObservation { day: 105, epc: 2.5 },
            EpcObservation { day: 99, epc: 9.0 },  // before the window
            EpcObservation { day: 200, epc: 9.0 }, // after the window
        ];
        let dense = zero_fill(&obs, 100, 7);
        assert_eq!(dense, vec![0.0, 0.0, 1.5, 0.0, 0.0, 2.5, 0.0]);
    }

    #[tokio::test]
    async fn recalculation_is_idempotent() {
        let db = test_db().await;
        let maintainer = TrendMaintainer::new(db.clone());
        for i in 0..10i64 {
            insert(&db, "a1", AS_OF - i, 2.0 + i as f64 * 0.1).await;
        }

        maintainer
            .process_daily_epc_trend("a1", 2.0, AS_OF)
            .await
            .unwrap();
        let first = db.get_trend_record("a1").await.unwrap().unwrap();

        maintainer
            .process_daily_epc_trend("a1", 2.0, AS_OF)
            .await
            .unwrap();
        let second = db.get_trend_record("a1").await.unwrap().unwrap();

        assert_eq!(first.trend_7, second.trend_7);
        assert_eq!(first.trend_14, second.trend_14);
        assert_eq!(first.trend_30, second.trend_30);
    }

    #[tokio::test]
    async fn sparse_history_is_zero_filled_not_shortened() {
        let db = test_db().await;
        let maintainer = TrendMaintainer::new(db.clone());

        // Three observations scattered over the last week; every other day
        // of the 30-day window has no row at all.
        insert(&db, "a1", AS_OF, 4.0).await;
        insert(&db, "a1", AS_OF - 2, 3.0).await;
        insert(&db, "a1", AS_OF - 5, 5.0).await;

        maintainer
            .process_daily_epc_trend("a1", 4.0, AS_OF)
            .await
            .unwrap();
        let record = db.get_trend_record("a1").await.unwrap().unwrap();

        // Expected series: the same dense 30-day window built by hand.
        let mut dense = vec![0.0; 30];
        dense[29] = 4.0;
        dense[27] = 3.0;
        dense[24] = 5.0;
        let expected_7 = calculate_trend(trailing(&dense, 7));
        let expected_30 = calculate_trend(trailing(&dense, 30));

        assert_eq!(record.trend_7, expected_7);
        assert_eq!(record.trend_30, expected_30);
    }

    #[tokio::test]
    async fn short_windows_ignore_changes_to_older_days() {
        let db = test_db().await;
        let maintainer = TrendMaintainer::new(db.clone());
        for i in 0..30i64 {
            insert(&db, "a1", AS_OF - i, 1.0 + (i % 3) as f64 * 0.01).await;
        }

        maintainer
            .process_daily_epc_trend("a1", 1.0, AS_OF)
            .await
            .unwrap();
        let before = db.get_trend_record("a1").await.unwrap().unwrap();

        // 24 days back: inside the 30-day window, outside the 7- and 14-day
        // trailing sub-windows.
        insert(&db, "a1", AS_OF - 24, 50.0).await;
        maintainer
            .process_daily_epc_trend("a1", 1.0, AS_OF)
            .await
            .unwrap();
        let after = db.get_trend_record("a1").await.unwrap().unwrap();

        assert_eq!(before.trend_7, after.trend_7);
        assert_eq!(before.trend_14, after.trend_14);
        assert_ne!(before.trend_30, after.trend_30);
    }

    #[tokio::test]
    async fn advertiser_with_no_history_gets_all_zero_stable_record() {
        let db = test_db().await;
        let maintainer = TrendMaintainer::new(db.clone());

        maintainer
            .process_daily_epc_trend("ghost", 0.0, AS_OF)
            .await
            .unwrap();
        let record = db.get_trend_record("ghost").await.unwrap().unwrap();

        for days in [7, 14, 30] {
            let trend = record.window(days).unwrap();
            assert_eq!(trend.category, TrendCategory::Stable);
            assert_eq!(trend.avg_epc, 0.0);
            assert_eq!(trend.slope, 0.0);
        }
    }

    #[tokio::test]
    async fn backfill_covers_every_advertiser() {
        let db = test_db().await;
        let maintainer = TrendMaintainer::new(db.clone());
        let now_ns = 1i64;
        for adv_id in ["a1", "a2", "a3"] {
            let rec = crate::types::AdvertiserRecord {
                adv_id: adv_id.to_string(),
                name: format!("Advertiser {adv_id}"),
                merchant_id: None,
                category: None,
                adv_type: None,
                mailing_region: None,
                approval_type: None,
                logo_url: None,
                epc: 1.0,
                rate: None,
            };
            db.upsert_advertiser(&rec, now_ns).await.unwrap();
            insert(&db, adv_id, AS_OF, 1.0).await;
        }

        let updated = maintainer.backfill(AS_OF).await.unwrap();
        assert_eq!(updated, 3);
        for adv_id in ["a1", "a2", "a3"] {
            assert!(db.get_trend_record(adv_id).await.unwrap().is_some());
        }
    }
}
