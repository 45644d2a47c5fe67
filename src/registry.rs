//! Channel registry: durable record of connected external stores.
//!
//! Channels are keyed by `(tenant_id, channel_id)`. Reconnecting overwrites
//! credentials and secret but keeps the sync cursor, so history survives a
//! credential rotation.

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{info, warn};

use crate::adapters;
use crate::coordinator::SyncCoordinator;
use crate::db::AppDb;
use crate::error::{SyncError, SyncResult};
use crate::models::{Channel, ChannelStatus, ConnectChannelRequest};

/// Bytes of entropy in a generated webhook secret.
const WEBHOOK_SECRET_BYTES: usize = 32;

const MAX_CHANNEL_ID_LEN: usize = 64;

/// Create or re-activate a channel.
///
/// Returns the stored channel together with the webhook secret in effect.
/// The caller must hand the secret to the merchant exactly once.
pub async fn connect(
    pool: &AppDb,
    tenant_id: &str,
    req: &ConnectChannelRequest,
) -> SyncResult<(Channel, String)> {
    validate_channel_id(&req.channel_id)?;
    let base_url = normalize_base_url(&req.base_url)?;
    adapters::validate_credentials(req.platform, &req.credentials)?;

    let secret = match req.webhook_secret.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => generate_webhook_secret(),
    };
    let display_name = req
        .display_name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| req.channel_id.clone());
    let now = Utc::now();

    let channel: Channel = sqlx::query_as(
        r#"
        INSERT INTO channels (
            tenant_id, channel_id, platform, display_name, base_url,
            credentials, webhook_secret, status, last_error, created_at, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'connected', NULL, ?8, ?8)
        ON CONFLICT (tenant_id, channel_id) DO UPDATE SET
            platform = excluded.platform,
            display_name = excluded.display_name,
            base_url = excluded.base_url,
            credentials = excluded.credentials,
            webhook_secret = excluded.webhook_secret,
            status = 'connected',
            last_error = NULL,
            updated_at = excluded.updated_at
        RETURNING *
        "#,
    )
    .bind(tenant_id)
    .bind(&req.channel_id)
    .bind(req.platform)
    .bind(&display_name)
    .bind(&base_url)
    .bind(&req.credentials)
    .bind(&secret)
    .bind(now)
    .fetch_one(pool)
    .await?;

    info!(
        tenant_id,
        channel_id = %channel.channel_id,
        platform = channel.platform.as_str(),
        "Channel connected"
    );
    Ok((channel, secret))
}

/// Look up a channel, failing with `NotFound` when absent.
pub async fn get(pool: &AppDb, tenant_id: &str, channel_id: &str) -> SyncResult<Channel> {
    find(pool, tenant_id, channel_id)
        .await?
        .ok_or_else(|| SyncError::NotFound(format!("channel {channel_id}")))
}

pub async fn find(pool: &AppDb, tenant_id: &str, channel_id: &str) -> SyncResult<Option<Channel>> {
    let channel = sqlx::query_as("SELECT * FROM channels WHERE tenant_id = ?1 AND channel_id = ?2")
        .bind(tenant_id)
        .bind(channel_id)
        .fetch_optional(pool)
        .await?;
    Ok(channel)
}

pub async fn list(pool: &AppDb, tenant_id: &str) -> SyncResult<Vec<Channel>> {
    let channels = sqlx::query_as("SELECT * FROM channels WHERE tenant_id = ?1 ORDER BY channel_id")
        .bind(tenant_id)
        .fetch_all(pool)
        .await?;
    Ok(channels)
}

/// Disconnect and hard-delete a channel.
///
/// The polling timer is cancelled before the row goes away so no tick can
/// fire against a missing channel. A run already in flight finishes on its
/// own and finds the channel gone.
pub async fn disconnect(
    pool: &AppDb,
    coordinator: &SyncCoordinator,
    tenant_id: &str,
    channel_id: &str,
) -> SyncResult<()> {
    // Fail fast on unknown channels before touching the coordinator.
    get(pool, tenant_id, channel_id).await?;

    coordinator.cancel(tenant_id, channel_id);

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM sync_configs WHERE tenant_id = ?1 AND channel_id = ?2")
        .bind(tenant_id)
        .bind(channel_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM channels WHERE tenant_id = ?1 AND channel_id = ?2")
        .bind(tenant_id)
        .bind(channel_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(tenant_id, channel_id, "Channel disconnected");
    Ok(())
}

/// Move the polling cursor and mark the channel healthy.
///
/// Returns `false` when the channel no longer exists.
pub async fn advance_cursor(
    pool: &AppDb,
    tenant_id: &str,
    channel_id: &str,
    cursor: DateTime<Utc>,
) -> SyncResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE channels
        SET last_sync_at = ?1, status = 'connected', last_error = NULL, updated_at = ?2
        WHERE tenant_id = ?3 AND channel_id = ?4
        "#,
    )
    .bind(cursor)
    .bind(Utc::now())
    .bind(tenant_id)
    .bind(channel_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Record a connection-health outcome. Missing channels are ignored.
pub async fn set_status(
    pool: &AppDb,
    tenant_id: &str,
    channel_id: &str,
    status: ChannelStatus,
    last_error: Option<&str>,
) -> SyncResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE channels SET status = ?1, last_error = ?2, updated_at = ?3
        WHERE tenant_id = ?4 AND channel_id = ?5
        "#,
    )
    .bind(status)
    .bind(last_error)
    .bind(Utc::now())
    .bind(tenant_id)
    .bind(channel_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        warn!(tenant_id, channel_id, "Status update for a channel that no longer exists");
    }
    Ok(())
}

/// Fresh random secret, hex encoded.
pub fn generate_webhook_secret() -> String {
    let mut bytes = [0u8; WEBHOOK_SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn validate_channel_id(channel_id: &str) -> SyncResult<()> {
    let valid = !channel_id.is_empty()
        && channel_id.len() <= MAX_CHANNEL_ID_LEN
        && channel_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SyncError::InvalidRequest(format!(
            "channel_id must be 1-{MAX_CHANNEL_ID_LEN} characters of [A-Za-z0-9_-]"
        )))
    }
}

fn normalize_base_url(raw: &str) -> SyncResult<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
        Ok(trimmed.to_string())
    } else {
        Err(SyncError::InvalidRequest(
            "base_url must be an http(s) URL".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::PlatformKind;
    use chrono::SubsecRound;
    use serde_json::json;

    fn shopify_request(channel_id: &str) -> ConnectChannelRequest {
        ConnectChannelRequest {
            channel_id: channel_id.to_string(),
            platform: PlatformKind::Shopify,
            base_url: "https://shop.example.com/".to_string(),
            credentials: json!({ "access_token": "shpat_123" }),
            display_name: None,
            webhook_secret: None,
        }
    }

    #[test]
    fn generated_secrets_are_long_and_distinct() {
        let a = generate_webhook_secret();
        let b = generate_webhook_secret();
        assert_eq!(a.len(), WEBHOOK_SECRET_BYTES * 2);
        assert_ne!(a, b);
    }

    #[test]
    fn channel_ids_are_url_safe() {
        assert!(validate_channel_id("main-store_1").is_ok());
        assert!(validate_channel_id("").is_err());
        assert!(validate_channel_id("has space").is_err());
        assert!(validate_channel_id("a/b").is_err());
    }

    #[tokio::test]
    async fn connect_then_get_round_trips() {
        let pool = db::connect_in_memory().await.unwrap();
        let (channel, secret) = connect(&pool, "t1", &shopify_request("main")).await.unwrap();

        assert_eq!(channel.base_url, "https://shop.example.com");
        assert_eq!(channel.display_name, "main");
        assert_eq!(channel.status, ChannelStatus::Connected);
        assert_eq!(channel.webhook_secret, secret);

        let fetched = get(&pool, "t1", "main").await.unwrap();
        assert_eq!(fetched.platform, PlatformKind::Shopify);

        // Tenant scoping
        assert!(matches!(get(&pool, "t2", "main").await, Err(SyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn reconnect_keeps_cursor_and_rotates_secret() {
        let pool = db::connect_in_memory().await.unwrap();
        let (_, first_secret) = connect(&pool, "t1", &shopify_request("main")).await.unwrap();

        let cursor = Utc::now().trunc_subsecs(3);
        assert!(advance_cursor(&pool, "t1", "main", cursor).await.unwrap());
        set_status(&pool, "t1", "main", ChannelStatus::Error, Some("boom")).await.unwrap();

        let (channel, second_secret) = connect(&pool, "t1", &shopify_request("main")).await.unwrap();
        assert_ne!(first_secret, second_secret);
        assert_eq!(channel.status, ChannelStatus::Connected);
        assert_eq!(channel.last_error, None);
        assert_eq!(channel.last_sync_at, Some(cursor));
    }

    #[tokio::test]
    async fn supplied_secret_is_kept() {
        let pool = db::connect_in_memory().await.unwrap();
        let mut req = shopify_request("main");
        req.webhook_secret = Some("s3cret".to_string());
        let (_, secret) = connect(&pool, "t1", &req).await.unwrap();
        assert_eq!(secret, "s3cret");
    }

    #[tokio::test]
    async fn connect_rejects_missing_credentials() {
        let pool = db::connect_in_memory().await.unwrap();
        let mut req = shopify_request("main");
        req.credentials = json!({});
        let err = connect(&pool, "t1", &req).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidCredentials(_)));
        assert!(find(&pool, "t1", "main").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn advance_cursor_reports_missing_channel() {
        let pool = db::connect_in_memory().await.unwrap();
        assert!(!advance_cursor(&pool, "t1", "ghost", Utc::now()).await.unwrap());
    }
}
