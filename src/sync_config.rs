//! Persistence for per-channel sync policy.

use chrono::Utc;

use crate::db::AppDb;
use crate::error::{SyncError, SyncResult};
use crate::models::{ConfigureSyncRequest, SyncConfig};

/// Longest accepted polling interval: one week.
pub const MAX_INTERVAL_MINUTES: i64 = 7 * 24 * 60;

/// Insert or replace the sync config of a channel.
///
/// The existence check and the write are one statement, so a config can
/// never be written for a channel that a concurrent disconnect removed.
pub async fn upsert(pool: &AppDb, tenant_id: &str, req: &ConfigureSyncRequest) -> SyncResult<SyncConfig> {
    if !(1..=MAX_INTERVAL_MINUTES).contains(&req.interval_minutes) {
        return Err(SyncError::InvalidRequest(format!(
            "interval_minutes must be between 1 and {MAX_INTERVAL_MINUTES}"
        )));
    }

    let config = sqlx::query_as(
        r#"
        INSERT INTO sync_configs (
            tenant_id, channel_id, auto_sync_orders, auto_sync_inventory, auto_sync_products,
            interval_minutes, delivery_mode, active, updated_at
        )
        SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9
        WHERE EXISTS (SELECT 1 FROM channels WHERE tenant_id = ?1 AND channel_id = ?2)
        ON CONFLICT (tenant_id, channel_id) DO UPDATE SET
            auto_sync_orders = excluded.auto_sync_orders,
            auto_sync_inventory = excluded.auto_sync_inventory,
            auto_sync_products = excluded.auto_sync_products,
            interval_minutes = excluded.interval_minutes,
            delivery_mode = excluded.delivery_mode,
            active = excluded.active,
            updated_at = excluded.updated_at
        RETURNING *
        "#,
    )
    .bind(tenant_id)
    .bind(&req.channel_id)
    .bind(req.auto_sync_orders)
    .bind(req.auto_sync_inventory)
    .bind(req.auto_sync_products)
    .bind(req.interval_minutes)
    .bind(req.delivery_mode)
    .bind(req.active)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await?;
    config.ok_or_else(|| SyncError::NotFound(format!("channel {}", req.channel_id)))
}

pub async fn get(pool: &AppDb, tenant_id: &str, channel_id: &str) -> SyncResult<Option<SyncConfig>> {
    let config = sqlx::query_as(
        "SELECT * FROM sync_configs WHERE tenant_id = ?1 AND channel_id = ?2",
    )
    .bind(tenant_id)
    .bind(channel_id)
    .fetch_optional(pool)
    .await?;
    Ok(config)
}

pub async fn list(pool: &AppDb, tenant_id: &str) -> SyncResult<Vec<SyncConfig>> {
    let configs = sqlx::query_as("SELECT * FROM sync_configs WHERE tenant_id = ?1 ORDER BY channel_id")
        .bind(tenant_id)
        .fetch_all(pool)
        .await?;
    Ok(configs)
}

/// Every config, across tenants, that calls for a polling timer.
pub async fn list_polling(pool: &AppDb) -> SyncResult<Vec<SyncConfig>> {
    let configs = sqlx::query_as(
        r#"
        SELECT * FROM sync_configs
        WHERE active = 1 AND auto_sync_orders = 1 AND delivery_mode = 'polling'
        ORDER BY tenant_id, channel_id
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectChannelRequest, DeliveryMode, PlatformKind};
    use crate::{db, registry};
    use serde_json::json;

    async fn pool_with_channel() -> AppDb {
        let pool = db::connect_in_memory().await.unwrap();
        registry::connect(
            &pool,
            "t1",
            &ConnectChannelRequest {
                channel_id: "shop".to_string(),
                platform: PlatformKind::Custom,
                base_url: "https://store.example.com".to_string(),
                credentials: json!({ "api_key": "k" }),
                display_name: None,
                webhook_secret: None,
            },
        )
        .await
        .unwrap();
        pool
    }

    fn request(mode: DeliveryMode, interval: i64) -> ConfigureSyncRequest {
        ConfigureSyncRequest {
            channel_id: "shop".to_string(),
            auto_sync_orders: true,
            auto_sync_inventory: false,
            auto_sync_products: false,
            interval_minutes: interval,
            delivery_mode: mode,
            active: true,
        }
    }

    #[tokio::test]
    async fn upsert_replaces_and_list_polling_filters() {
        let pool = pool_with_channel().await;

        let config = upsert(&pool, "t1", &request(DeliveryMode::Polling, 5)).await.unwrap();
        assert!(config.wants_polling());
        assert_eq!(list_polling(&pool).await.unwrap().len(), 1);

        let config = upsert(&pool, "t1", &request(DeliveryMode::Webhook, 5)).await.unwrap();
        assert!(!config.wants_polling());
        assert!(list_polling(&pool).await.unwrap().is_empty());
        assert_eq!(list(&pool, "t1").await.unwrap().len(), 1);
        assert_eq!(
            get(&pool, "t1", "shop").await.unwrap().map(|c| c.delivery_mode),
            Some(DeliveryMode::Webhook)
        );
    }

    #[tokio::test]
    async fn interval_outside_one_minute_to_one_week_is_rejected() {
        let pool = pool_with_channel().await;
        for interval in [0, -5, MAX_INTERVAL_MINUTES + 1, i64::MAX] {
            let err = upsert(&pool, "t1", &request(DeliveryMode::Polling, interval)).await.unwrap_err();
            assert!(matches!(err, SyncError::InvalidRequest(_)), "{interval}");
        }
        assert!(get(&pool, "t1", "shop").await.unwrap().is_none());

        let config = upsert(&pool, "t1", &request(DeliveryMode::Polling, MAX_INTERVAL_MINUTES))
            .await
            .unwrap();
        assert_eq!(config.interval_minutes, MAX_INTERVAL_MINUTES);
    }

    #[tokio::test]
    async fn no_config_is_written_for_a_missing_channel() {
        let pool = pool_with_channel().await;
        // The channel vanishes between a caller's lookup and its write.
        sqlx::query("DELETE FROM channels WHERE tenant_id = 't1' AND channel_id = 'shop'")
            .execute(&pool)
            .await
            .unwrap();

        let err = upsert(&pool, "t1", &request(DeliveryMode::Polling, 5)).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
        assert!(list(&pool, "t1").await.unwrap().is_empty());
        assert!(list_polling(&pool).await.unwrap().is_empty());
    }
}
