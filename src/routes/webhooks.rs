//! Platform-originated webhook routes.
//!
//! POST /webhooks/{tenant_id}/{channel_id}/orders    - Order created/updated
//! POST /webhooks/{tenant_id}/{channel_id}/inventory - Stock level changes
//! POST /webhooks/register                           - URLs to paste into the platform admin
//!
//! The signature is checked against the exact bytes received, before the
//! body is parsed. Every attempt, signed or not, lands in the receipt log.
//! Error bodies stay terse so a caller learns nothing useful for forging.

use axum::body::Bytes;
use axum::extract::Path;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Extension, Json, Router};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::{AppState, TenantId};
use crate::error::{SyncError, SyncResult};
use crate::models::{
    ApiResponse, Channel, InventoryWebhookAck, OrderOrigin, OrderWebhookAck, RegisterWebhooksRequest,
    WebhookUrls,
};
use crate::stats::{self, StatsDelta};
use crate::store::{self, IngestOutcome};
use crate::{receipts, registry, verifier};

const TOPIC_HEADERS: [&str; 3] = ["X-Shopify-Topic", "X-WC-Webhook-Topic", "X-Event-Type"];
const MAX_TOPIC_LEN: usize = 128;

pub fn router() -> Router {
    Router::new()
        .route("/webhooks/register", post(register_webhooks))
        .route(
            "/webhooks/{tenant_id}/{channel_id}/orders",
            post(receive_order_webhook),
        )
        .route(
            "/webhooks/{tenant_id}/{channel_id}/inventory",
            post(receive_inventory_webhook),
        )
}

fn event_type(headers: &HeaderMap, fallback: &str) -> String {
    TOPIC_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| v.chars().take(MAX_TOPIC_LEN).collect())
        .unwrap_or_else(|| fallback.to_string())
}

/// Record the attempt and check its signature.
///
/// Returns the receipt id; a failed check has already been marked on the receipt.
async fn accept(
    state: &AppState,
    channel: &Channel,
    headers: &HeaderMap,
    body: &Bytes,
    default_topic: &str,
) -> SyncResult<i64> {
    let signature = verifier::extract_signature(headers, channel.platform);
    let verified = verifier::check(body, signature, &channel.webhook_secret, channel.platform);

    let receipt_id = receipts::record(
        &state.pool,
        &channel.tenant_id,
        &channel.channel_id,
        &event_type(headers, default_topic),
        body,
        verified.is_ok(),
    )
    .await?;

    if let Err(e) = verified {
        warn!(
            tenant_id = %channel.tenant_id,
            channel_id = %channel.channel_id,
            receipt_id,
            "Rejected webhook: {}",
            e
        );
        receipts::mark_failed(&state.pool, receipt_id, &e.to_string()).await?;
        return Err(e);
    }
    Ok(receipt_id)
}

/// Mark the receipt failed and hand the error back.
async fn reject(state: &AppState, receipt_id: i64, err: SyncError) -> SyncError {
    if let Err(e) = receipts::mark_failed(&state.pool, receipt_id, &err.to_string()).await {
        error!("Failed to mark webhook receipt {} failed: {}", receipt_id, e);
    }
    err
}

fn parse_body(body: &Bytes) -> SyncResult<Value> {
    serde_json::from_slice(body)
        .map_err(|_| SyncError::MalformedPayload("body is not valid JSON".to_string()))
}

/// Ingest one pushed order. Duplicates are acknowledged like new orders.
async fn receive_order_webhook(
    Extension(state): Extension<AppState>,
    Path((tenant_id, channel_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> SyncResult<Json<OrderWebhookAck>> {
    let channel = registry::get(&state.pool, &tenant_id, &channel_id).await?;
    stats::increment(&state.pool, &tenant_id, &channel_id, stats::today(), StatsDelta::webhook()).await?;
    let receipt_id = accept(&state, &channel, &headers, &body, "orders/create").await?;

    let adapter = state.coordinator.adapters().get(channel.platform)?;
    let order = match parse_body(&body).and_then(|payload| adapter.normalize(&payload)) {
        Ok(order) => order,
        Err(e) => return Err(reject(&state, receipt_id, e).await),
    };

    let outcome = match store::ingest(&state.pool, &tenant_id, &channel_id, &order, OrderOrigin::Webhook).await {
        Ok(outcome) => outcome,
        Err(e) => return Err(reject(&state, receipt_id, e).await),
    };
    receipts::mark_processed(&state.pool, receipt_id).await?;

    match outcome {
        IngestOutcome::Inserted { .. } => info!(
            tenant_id = %tenant_id,
            channel_id = %channel_id,
            order_id = %order.external_order_id,
            "Order received via webhook"
        ),
        IngestOutcome::Duplicate => debug!(
            tenant_id = %tenant_id,
            channel_id = %channel_id,
            order_id = %order.external_order_id,
            outcome = "duplicate",
            "Webhook order already ingested"
        ),
    }

    Ok(Json(OrderWebhookAck {
        order_id: order.external_order_id,
        platform: channel.platform,
    }))
}

/// Accept a stock change notification.
async fn receive_inventory_webhook(
    Extension(state): Extension<AppState>,
    Path((tenant_id, channel_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> SyncResult<Json<InventoryWebhookAck>> {
    let channel = registry::get(&state.pool, &tenant_id, &channel_id).await?;
    let result = process_inventory(&state, &channel, &headers, &body).await;

    let delta = if result.is_ok() {
        StatsDelta::inventory_webhook()
    } else {
        StatsDelta::webhook()
    };
    stats::increment(&state.pool, &tenant_id, &channel_id, stats::today(), delta).await?;

    let changes = result?;
    info!(
        tenant_id = %tenant_id,
        channel_id = %channel_id,
        changes,
        "Inventory webhook accepted"
    );
    Ok(Json(InventoryWebhookAck {
        platform: channel.platform,
        changes,
    }))
}

async fn process_inventory(
    state: &AppState,
    channel: &Channel,
    headers: &HeaderMap,
    body: &Bytes,
) -> SyncResult<usize> {
    let receipt_id = accept(state, channel, headers, body, "inventory/update").await?;

    let adapter = state.coordinator.adapters().get(channel.platform)?;
    let changes = match parse_body(body).and_then(|payload| adapter.normalize_inventory(&payload)) {
        Ok(changes) => changes,
        Err(e) => return Err(reject(state, receipt_id, e).await),
    };
    receipts::mark_processed(&state.pool, receipt_id).await?;
    Ok(changes.len())
}

/// Webhook URLs and signing details for a channel. Calls no platform.
async fn register_webhooks(
    Extension(state): Extension<AppState>,
    TenantId(tenant_id): TenantId,
    Json(req): Json<RegisterWebhooksRequest>,
) -> SyncResult<Json<ApiResponse<WebhookUrls>>> {
    let channel = registry::get(&state.pool, &tenant_id, &req.channel_id).await?;

    let urls = WebhookUrls {
        orders_url: state.webhook_url(&tenant_id, &channel.channel_id, "orders"),
        inventory_url: state.webhook_url(&tenant_id, &channel.channel_id, "inventory"),
        signature_header: verifier::signature_header(channel.platform),
        signature_encoding: verifier::signature_encoding(channel.platform),
        channel_id: channel.channel_id,
        platform: channel.platform,
    };
    Ok(Json(ApiResponse {
        message: format!(
            "Configure these URLs in the {} admin, signed with the channel's webhook secret",
            urls.platform.as_str()
        ),
        data: urls,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn topic_comes_from_platform_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(event_type(&headers, "orders/create"), "orders/create");

        headers.insert("x-wc-webhook-topic", HeaderValue::from_static("order.created"));
        assert_eq!(event_type(&headers, "orders/create"), "order.created");

        headers.insert("x-shopify-topic", HeaderValue::from_static("orders/paid"));
        assert_eq!(event_type(&headers, "orders/create"), "orders/paid");
    }
}
