//! Per-tenant, per-channel, per-day counters.
//!
//! Writes are additive upserts; a counter is never overwritten, so the
//! webhook path and the polling path can both bump the same row.

use chrono::{NaiveDate, Utc};
use sqlx::SqliteExecutor;

use crate::db::AppDb;
use crate::error::SyncResult;
use crate::models::{DailyStat, DailyTotals};

/// Counter increments applied in one upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsDelta {
    pub orders_received: u32,
    pub orders_total: f64,
    pub webhooks_received: u32,
    pub inventory_syncs: u32,
    pub sync_errors: u32,
}

impl StatsDelta {
    pub fn order(total: f64) -> Self {
        Self {
            orders_received: 1,
            orders_total: total,
            ..Self::default()
        }
    }

    pub fn webhook() -> Self {
        Self {
            webhooks_received: 1,
            ..Self::default()
        }
    }

    pub fn inventory_webhook() -> Self {
        Self {
            webhooks_received: 1,
            inventory_syncs: 1,
            ..Self::default()
        }
    }

    pub fn sync_error() -> Self {
        Self {
            sync_errors: 1,
            ..Self::default()
        }
    }
}

/// Current UTC calendar day.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Add `delta` to the counters of `(tenant, channel, day)`, creating the row if needed.
pub async fn increment<'e, E>(
    executor: E,
    tenant_id: &str,
    channel_id: &str,
    day: NaiveDate,
    delta: StatsDelta,
) -> SyncResult<()>
where
    E: SqliteExecutor<'e>,
{
    // Counters only move forward.
    let orders_total = if delta.orders_total.is_finite() {
        delta.orders_total.max(0.0)
    } else {
        0.0
    };

    sqlx::query(
        r#"
        INSERT INTO daily_stats (
            tenant_id, channel_id, day,
            orders_received, orders_total, webhooks_received, inventory_syncs, sync_errors
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT (tenant_id, channel_id, day) DO UPDATE SET
            orders_received = orders_received + excluded.orders_received,
            orders_total = orders_total + excluded.orders_total,
            webhooks_received = webhooks_received + excluded.webhooks_received,
            inventory_syncs = inventory_syncs + excluded.inventory_syncs,
            sync_errors = sync_errors + excluded.sync_errors
        "#,
    )
    .bind(tenant_id)
    .bind(channel_id)
    .bind(day)
    .bind(i64::from(delta.orders_received))
    .bind(orders_total)
    .bind(i64::from(delta.webhooks_received))
    .bind(i64::from(delta.inventory_syncs))
    .bind(i64::from(delta.sync_errors))
    .execute(executor)
    .await?;
    Ok(())
}

/// Counters for every channel of a tenant on `day`.
pub async fn channel_stats(pool: &AppDb, tenant_id: &str, day: NaiveDate) -> SyncResult<Vec<DailyStat>> {
    let stats = sqlx::query_as(
        "SELECT * FROM daily_stats WHERE tenant_id = ?1 AND day = ?2 ORDER BY channel_id",
    )
    .bind(tenant_id)
    .bind(day)
    .fetch_all(pool)
    .await?;
    Ok(stats)
}

/// Counters summed across all channels of a tenant on `day`.
pub async fn tenant_totals(pool: &AppDb, tenant_id: &str, day: NaiveDate) -> SyncResult<DailyTotals> {
    let totals = sqlx::query_as(
        r#"
        SELECT
            COALESCE(SUM(orders_received), 0) AS orders_received,
            COALESCE(SUM(orders_total), 0.0) AS orders_total,
            COALESCE(SUM(webhooks_received), 0) AS webhooks_received,
            COALESCE(SUM(inventory_syncs), 0) AS inventory_syncs,
            COALESCE(SUM(sync_errors), 0) AS sync_errors
        FROM daily_stats
        WHERE tenant_id = ?1 AND day = ?2
        "#,
    )
    .bind(tenant_id)
    .bind(day)
    .fetch_one(pool)
    .await?;
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn increments_accumulate() {
        let pool = db::connect_in_memory().await.unwrap();
        let day = today();

        increment(&pool, "t1", "a", day, StatsDelta::order(10.0)).await.unwrap();
        increment(&pool, "t1", "a", day, StatsDelta::order(5.5)).await.unwrap();
        increment(&pool, "t1", "a", day, StatsDelta::webhook()).await.unwrap();
        increment(&pool, "t1", "a", day, StatsDelta::sync_error()).await.unwrap();

        let stats = channel_stats(&pool, "t1", day).await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].orders_received, 2);
        assert_eq!(stats[0].orders_total, 15.5);
        assert_eq!(stats[0].webhooks_received, 1);
        assert_eq!(stats[0].sync_errors, 1);
    }

    #[tokio::test]
    async fn negative_totals_never_decrease_the_sum() {
        let pool = db::connect_in_memory().await.unwrap();
        let day = today();
        increment(&pool, "t1", "a", day, StatsDelta::order(10.0)).await.unwrap();
        increment(&pool, "t1", "a", day, StatsDelta::order(-3.0)).await.unwrap();
        increment(&pool, "t1", "a", day, StatsDelta::order(f64::NAN)).await.unwrap();

        let stats = channel_stats(&pool, "t1", day).await.unwrap();
        assert_eq!(stats[0].orders_received, 3);
        assert_eq!(stats[0].orders_total, 10.0);
    }

    #[tokio::test]
    async fn totals_sum_across_channels_per_tenant_and_day() {
        let pool = db::connect_in_memory().await.unwrap();
        let day = today();
        let yesterday = day.pred_opt().unwrap();

        increment(&pool, "t1", "a", day, StatsDelta::order(1.0)).await.unwrap();
        increment(&pool, "t1", "b", day, StatsDelta::inventory_webhook()).await.unwrap();
        increment(&pool, "t1", "b", yesterday, StatsDelta::order(100.0)).await.unwrap();
        increment(&pool, "t2", "a", day, StatsDelta::order(100.0)).await.unwrap();

        let totals = tenant_totals(&pool, "t1", day).await.unwrap();
        assert_eq!(totals.orders_received, 1);
        assert_eq!(totals.orders_total, 1.0);
        assert_eq!(totals.webhooks_received, 1);
        assert_eq!(totals.inventory_syncs, 1);

        let empty = tenant_totals(&pool, "nobody", day).await.unwrap();
        assert_eq!(empty.orders_received, 0);
        assert_eq!(empty.orders_total, 0.0);
    }
}
