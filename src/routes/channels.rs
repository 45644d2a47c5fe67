//! Channel management routes.
//!
//! POST   /channels/connect                  - Connect (or reconnect) a channel
//! GET    /channels                          - List the tenant's channels
//! GET    /channels/{channel_id}             - Retrieve a channel
//! DELETE /channels/{channel_id}             - Disconnect and remove a channel
//! POST   /channels/{channel_id}/test        - Read-only fetch to validate credentials
//! POST   /channels/{channel_id}/sync-now    - Run one manual sync
//! GET    /channels/{channel_id}/orders      - Most recently ingested orders
//! GET    /channels/{channel_id}/receipts    - Most recent webhook receipts

use axum::body::Bytes;
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use tracing::info;

use super::{AppState, TenantId};
use crate::coordinator::{SyncOutcome, SyncSummary, SyncTrigger};
use crate::error::{SyncError, SyncResult};
use crate::models::{
    ApiResponse, Channel, ConnectChannelRequest, ConnectChannelResponse, ListQuery,
    StoredOrder, SyncNowRequest, TestConnectionResponse, WebhookReceipt,
};
use crate::{receipts, registry, store};

pub fn router() -> Router {
    Router::new()
        .route("/channels", get(list_channels))
        .route("/channels/connect", post(connect_channel))
        .route(
            "/channels/{channel_id}",
            get(get_channel).delete(disconnect_channel),
        )
        .route("/channels/{channel_id}/test", post(test_channel))
        .route("/channels/{channel_id}/sync-now", post(sync_now))
        .route("/channels/{channel_id}/orders", get(list_orders))
        .route("/channels/{channel_id}/receipts", get(list_receipts))
}

/// Connect a channel and hand out its webhook URLs and secret.
///
/// This is the only response that ever carries the secret.
async fn connect_channel(
    Extension(state): Extension<AppState>,
    TenantId(tenant_id): TenantId,
    Json(req): Json<ConnectChannelRequest>,
) -> SyncResult<(StatusCode, Json<ApiResponse<ConnectChannelResponse>>)> {
    let (channel, webhook_secret) = registry::connect(&state.pool, &tenant_id, &req).await?;

    let response = ConnectChannelResponse {
        webhook_url: state.webhook_url(&tenant_id, &channel.channel_id, "orders"),
        inventory_webhook_url: state.webhook_url(&tenant_id, &channel.channel_id, "inventory"),
        webhook_secret,
        channel,
    };
    let message = format!(
        "Channel {} connected to {}. Store the webhook secret now; it is not shown again.",
        response.channel.channel_id,
        response.channel.platform.as_str()
    );

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse {
            data: response,
            message,
        }),
    ))
}

async fn list_channels(
    Extension(state): Extension<AppState>,
    TenantId(tenant_id): TenantId,
) -> SyncResult<Json<ApiResponse<Vec<Channel>>>> {
    let channels = registry::list(&state.pool, &tenant_id).await?;
    let message = format!("{} channel(s)", channels.len());
    Ok(Json(ApiResponse {
        data: channels,
        message,
    }))
}

async fn get_channel(
    Extension(state): Extension<AppState>,
    TenantId(tenant_id): TenantId,
    Path(channel_id): Path<String>,
) -> SyncResult<Json<ApiResponse<Channel>>> {
    let channel = registry::get(&state.pool, &tenant_id, &channel_id).await?;
    Ok(Json(ApiResponse {
        data: channel,
        message: "Channel retrieved".to_string(),
    }))
}

async fn disconnect_channel(
    Extension(state): Extension<AppState>,
    TenantId(tenant_id): TenantId,
    Path(channel_id): Path<String>,
) -> SyncResult<Json<ApiResponse<serde_json::Value>>> {
    registry::disconnect(&state.pool, &state.coordinator, &tenant_id, &channel_id).await?;
    Ok(Json(ApiResponse {
        data: serde_json::json!({ "channel_id": channel_id }),
        message: "Channel disconnected".to_string(),
    }))
}

/// Fetch the last day of orders without ingesting anything.
async fn test_channel(
    Extension(state): Extension<AppState>,
    TenantId(tenant_id): TenantId,
    Path(channel_id): Path<String>,
) -> SyncResult<Json<ApiResponse<TestConnectionResponse>>> {
    let channel = registry::get(&state.pool, &tenant_id, &channel_id).await?;
    let orders_found = state.coordinator.test_connection(&channel).await?;

    Ok(Json(ApiResponse {
        message: format!(
            "Connection to {} OK, {} order(s) found in the last 24 hours",
            channel.platform.as_str(),
            orders_found
        ),
        data: TestConnectionResponse {
            channel_id: channel.channel_id,
            platform: channel.platform,
            orders_found,
        },
    }))
}

/// Run one manual sync. The body is optional: `{"since": "<RFC 3339>"}`.
async fn sync_now(
    Extension(state): Extension<AppState>,
    TenantId(tenant_id): TenantId,
    Path(channel_id): Path<String>,
    body: Bytes,
) -> SyncResult<Json<ApiResponse<SyncSummary>>> {
    let req: SyncNowRequest = if body.iter().all(u8::is_ascii_whitespace) {
        SyncNowRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| SyncError::InvalidRequest(format!("invalid sync-now body: {e}")))?
    };

    let outcome = state
        .coordinator
        .run_sync(&tenant_id, &channel_id, SyncTrigger::Manual, req.since)
        .await?;

    let summary = match outcome {
        SyncOutcome::Completed(summary) => summary,
        SyncOutcome::ChannelGone => {
            return Err(SyncError::NotFound(format!("channel {channel_id}")));
        }
        SyncOutcome::Skipped => return Err(SyncError::SyncInProgress(channel_id)),
    };

    info!(
        tenant_id = %tenant_id,
        channel_id = %channel_id,
        ingested = summary.ingested,
        skipped = summary.skipped,
        "Manual sync finished"
    );
    let mut message = format!(
        "Fetched {} order(s): {} ingested, {} duplicate(s), {} skipped",
        summary.fetched, summary.ingested, summary.duplicates, summary.skipped
    );
    if !summary.skipped_reasons.is_empty() {
        message.push_str(&format!(" ({})", summary.skipped_reasons.join("; ")));
    }
    if summary.truncated {
        message.push_str("; more orders remain, the next run continues");
    }

    Ok(Json(ApiResponse {
        data: summary,
        message,
    }))
}

async fn list_orders(
    Extension(state): Extension<AppState>,
    TenantId(tenant_id): TenantId,
    Path(channel_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> SyncResult<Json<ApiResponse<Vec<StoredOrder>>>> {
    let orders = store::list_orders(&state.pool, &tenant_id, &channel_id, query.limit).await?;
    let message = format!("{} order(s)", orders.len());
    Ok(Json(ApiResponse {
        data: orders,
        message,
    }))
}

async fn list_receipts(
    Extension(state): Extension<AppState>,
    TenantId(tenant_id): TenantId,
    Path(channel_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> SyncResult<Json<ApiResponse<Vec<WebhookReceipt>>>> {
    let receipts = receipts::list(&state.pool, &tenant_id, &channel_id, query.limit).await?;
    let message = format!("{} receipt(s)", receipts.len());
    Ok(Json(ApiResponse {
        data: receipts,
        message,
    }))
}
