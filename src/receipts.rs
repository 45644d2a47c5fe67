//! Append-only log of inbound webhook attempts.
//!
//! A receipt is written as `received` and moves exactly once to `processed`
//! or `failed`. The terminal update is guarded in SQL so a finished receipt
//! is never rewritten.

use chrono::Utc;
use tracing::warn;

use crate::db::AppDb;
use crate::error::SyncResult;
use crate::models::{ReceiptStatus, WebhookReceipt};
use crate::store;

pub async fn record(
    pool: &AppDb,
    tenant_id: &str,
    channel_id: &str,
    event_type: &str,
    payload: &[u8],
    signature_valid: bool,
) -> SyncResult<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO webhook_receipts (
            tenant_id, channel_id, event_type, payload, status, signature_valid, received_at
        )
        VALUES (?1, ?2, ?3, ?4, 'received', ?5, ?6)
        RETURNING id
        "#,
    )
    .bind(tenant_id)
    .bind(channel_id)
    .bind(event_type)
    .bind(String::from_utf8_lossy(payload).into_owned())
    .bind(signature_valid)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn mark_processed(pool: &AppDb, receipt_id: i64) -> SyncResult<bool> {
    finish(pool, receipt_id, ReceiptStatus::Processed, None).await
}

pub async fn mark_failed(pool: &AppDb, receipt_id: i64, error: &str) -> SyncResult<bool> {
    finish(pool, receipt_id, ReceiptStatus::Failed, Some(error)).await
}

async fn finish(
    pool: &AppDb,
    receipt_id: i64,
    status: ReceiptStatus,
    error: Option<&str>,
) -> SyncResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE webhook_receipts
        SET status = ?1, error_message = ?2, processed_at = ?3
        WHERE id = ?4 AND status = 'received'
        "#,
    )
    .bind(status)
    .bind(error)
    .bind(Utc::now())
    .bind(receipt_id)
    .execute(pool)
    .await?;

    let updated = result.rows_affected() > 0;
    if !updated {
        warn!("Webhook receipt {} is already terminal, not moving to {:?}", receipt_id, status);
    }
    Ok(updated)
}

/// Most recent receipts of a channel.
pub async fn list(
    pool: &AppDb,
    tenant_id: &str,
    channel_id: &str,
    limit: Option<i64>,
) -> SyncResult<Vec<WebhookReceipt>> {
    let limit = limit
        .unwrap_or(store::DEFAULT_LIST_LIMIT)
        .clamp(1, store::MAX_LIST_LIMIT);
    let receipts = sqlx::query_as(
        r#"
        SELECT * FROM webhook_receipts
        WHERE tenant_id = ?1 AND channel_id = ?2
        ORDER BY id DESC
        LIMIT ?3
        "#,
    )
    .bind(tenant_id)
    .bind(channel_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(receipts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn terminal_status_is_written_once() {
        let pool = db::connect_in_memory().await.unwrap();
        let id = record(&pool, "t1", "shop", "orders/create", b"{}", true).await.unwrap();

        assert!(mark_processed(&pool, id).await.unwrap());
        assert!(!mark_failed(&pool, id, "late failure").await.unwrap());

        let receipts = list(&pool, "t1", "shop", Some(10)).await.unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].status, ReceiptStatus::Processed);
        assert_eq!(receipts[0].error_message, None);
        assert!(receipts[0].processed_at.is_some());
    }

    #[tokio::test]
    async fn failed_receipts_keep_the_reason_and_flag() {
        let pool = db::connect_in_memory().await.unwrap();
        let id = record(&pool, "t1", "shop", "orders/create", b"{\"id\":1}", false)
            .await
            .unwrap();
        mark_failed(&pool, id, "signature invalid").await.unwrap();

        let receipt = &list(&pool, "t1", "shop", Some(10)).await.unwrap()[0];
        assert_eq!(receipt.status, ReceiptStatus::Failed);
        assert!(!receipt.signature_valid);
        assert_eq!(receipt.error_message.as_deref(), Some("signature invalid"));
        assert_eq!(receipt.payload, "{\"id\":1}");
    }
}
