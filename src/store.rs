//! Idempotent order store.
//!
//! Orders are keyed by `(tenant_id, channel_id, external_order_id)`. The
//! table's unique constraint decides which ingestion wins; the loser sees
//! zero affected rows and reports a duplicate. Nothing here locks in
//! application memory, so the webhook and polling paths may ingest the same
//! order concurrently.

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::db::AppDb;
use crate::error::{SyncError, SyncResult};
use crate::models::{CanonicalOrder, OrderOrigin, StoredOrder};
use crate::stats::{self, StatsDelta};

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 500;

/// Result of one ingestion attempt. A duplicate is a success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted { id: String },
    Duplicate,
}

impl IngestOutcome {
    pub fn inserted(&self) -> bool {
        matches!(self, IngestOutcome::Inserted { .. })
    }
}

/// Insert `order` unless the channel already holds its external id.
///
/// A fresh insert bumps the day's `orders_received` and `orders_total` in
/// the same transaction.
pub async fn ingest(
    pool: &AppDb,
    tenant_id: &str,
    channel_id: &str,
    order: &CanonicalOrder,
    origin: OrderOrigin,
) -> SyncResult<IngestOutcome> {
    let id = Uuid::new_v4().to_string();
    let line_items = serde_json::to_value(&order.line_items)
        .map_err(|e| SyncError::MalformedPayload(format!("line items: {e}")))?;
    let now = Utc::now();

    let mut tx = pool.begin().await?;
    let result = sqlx::query(
        r#"
        INSERT INTO channel_orders (
            id, tenant_id, channel_id, external_order_id, order_number,
            customer_email, customer_name, customer_phone, line_items, total,
            status, origin, external_created_at, raw_payload, ingested_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        ON CONFLICT (tenant_id, channel_id, external_order_id) DO NOTHING
        "#,
    )
    .bind(&id)
    .bind(tenant_id)
    .bind(channel_id)
    .bind(&order.external_order_id)
    .bind(&order.order_number)
    .bind(&order.customer_email)
    .bind(&order.customer_name)
    .bind(&order.customer_phone)
    .bind(&line_items)
    .bind(order.total)
    .bind(&order.status)
    .bind(origin)
    .bind(order.external_created_at)
    .bind(&order.raw_payload)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        debug!(
            "Order {} already ingested for {}/{}, ignoring",
            order.external_order_id, tenant_id, channel_id
        );
        return Ok(IngestOutcome::Duplicate);
    }

    stats::increment(
        &mut *tx,
        tenant_id,
        channel_id,
        now.date_naive(),
        StatsDelta::order(order.total),
    )
    .await?;
    tx.commit().await?;

    debug!(
        "Order {} ingested for {}/{} via {:?}",
        order.external_order_id, tenant_id, channel_id, origin
    );
    Ok(IngestOutcome::Inserted { id })
}

/// Most recently ingested orders of a channel.
pub async fn list_orders(
    pool: &AppDb,
    tenant_id: &str,
    channel_id: &str,
    limit: Option<i64>,
) -> SyncResult<Vec<StoredOrder>> {
    let limit = limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let orders = sqlx::query_as(
        r#"
        SELECT * FROM channel_orders
        WHERE tenant_id = ?1 AND channel_id = ?2
        ORDER BY ingested_at DESC
        LIMIT ?3
        "#,
    )
    .bind(tenant_id)
    .bind(channel_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(orders)
}

pub async fn count_orders(pool: &AppDb, tenant_id: &str, channel_id: &str) -> SyncResult<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM channel_orders WHERE tenant_id = ?1 AND channel_id = ?2",
    )
    .bind(tenant_id)
    .bind(channel_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::LineItem;
    use serde_json::json;

    fn order(external_id: &str, total: f64) -> CanonicalOrder {
        CanonicalOrder {
            external_order_id: external_id.to_string(),
            order_number: format!("#{external_id}"),
            customer_email: "buyer@example.com".to_string(),
            customer_name: "Buyer".to_string(),
            customer_phone: String::new(),
            line_items: vec![LineItem {
                name: "Widget".to_string(),
                sku: "W-1".to_string(),
                quantity: 1,
                unit_price: total,
            }],
            total,
            status: "pending".to_string(),
            external_created_at: None,
            raw_payload: json!({ "id": external_id }),
        }
    }

    #[tokio::test]
    async fn second_ingest_is_a_duplicate_from_any_origin() {
        let pool = db::connect_in_memory().await.unwrap();
        let first = ingest(&pool, "t1", "shop", &order("1001", 20.0), OrderOrigin::Webhook)
            .await
            .unwrap();
        assert!(first.inserted());

        for origin in [OrderOrigin::Webhook, OrderOrigin::Polling, OrderOrigin::Manual] {
            let again = ingest(&pool, "t1", "shop", &order("1001", 20.0), origin).await.unwrap();
            assert_eq!(again, IngestOutcome::Duplicate);
        }

        assert_eq!(count_orders(&pool, "t1", "shop").await.unwrap(), 1);
        let stored = list_orders(&pool, "t1", "shop", None).await.unwrap();
        assert_eq!(stored[0].origin, OrderOrigin::Webhook);
        assert_eq!(stored[0].line_items[0]["sku"], "W-1");
    }

    #[tokio::test]
    async fn line_items_are_stored_as_an_array() {
        let pool = db::connect_in_memory().await.unwrap();
        let mut bare = order("7", 0.0);
        bare.line_items.clear();
        ingest(&pool, "t1", "shop", &bare, OrderOrigin::Polling).await.unwrap();
        ingest(&pool, "t1", "shop", &order("8", 3.5), OrderOrigin::Polling).await.unwrap();

        let stored = list_orders(&pool, "t1", "shop", None).await.unwrap();
        for row in &stored {
            assert!(row.line_items.is_array(), "{}", row.external_order_id);
        }
        let full = stored.iter().find(|o| o.external_order_id == "8").unwrap();
        assert_eq!(full.line_items[0]["unit_price"], 3.5);
    }

    #[tokio::test]
    async fn duplicates_do_not_touch_stats() {
        let pool = db::connect_in_memory().await.unwrap();
        ingest(&pool, "t1", "shop", &order("1", 20.0), OrderOrigin::Polling).await.unwrap();
        ingest(&pool, "t1", "shop", &order("1", 20.0), OrderOrigin::Polling).await.unwrap();
        ingest(&pool, "t1", "shop", &order("2", 5.0), OrderOrigin::Polling).await.unwrap();

        let totals = stats::tenant_totals(&pool, "t1", stats::today()).await.unwrap();
        assert_eq!(totals.orders_received, 2);
        assert_eq!(totals.orders_total, 25.0);
    }

    #[tokio::test]
    async fn same_external_id_on_other_channels_is_distinct() {
        let pool = db::connect_in_memory().await.unwrap();
        let a = ingest(&pool, "t1", "a", &order("1", 1.0), OrderOrigin::Polling).await.unwrap();
        let b = ingest(&pool, "t1", "b", &order("1", 1.0), OrderOrigin::Polling).await.unwrap();
        let c = ingest(&pool, "t2", "a", &order("1", 1.0), OrderOrigin::Polling).await.unwrap();
        assert!(a.inserted() && b.inserted() && c.inserted());
    }

    #[tokio::test]
    async fn concurrent_ingests_of_one_order_store_one_row() {
        let pool = db::connect_in_memory().await.unwrap();
        let mut handles = Vec::new();
        for i in 0..8 {
            let pool = pool.clone();
            let origin = if i % 2 == 0 { OrderOrigin::Webhook } else { OrderOrigin::Polling };
            handles.push(tokio::spawn(async move {
                ingest(&pool, "t1", "shop", &order("42", 9.0), origin).await.unwrap()
            }));
        }
        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap().inserted() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(count_orders(&pool, "t1", "shop").await.unwrap(), 1);
    }
}
