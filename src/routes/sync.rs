//! Sync policy and reporting routes.
//!
//! POST /sync/configure - Upsert a channel's sync config and (re)start or stop its timer
//! GET  /sync/status    - Per-channel config, timer state, last run and today's stats
//! GET  /stats/daily    - Tenant counters for one day (`?day=YYYY-MM-DD`, default today)

use axum::extract::Query;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use tracing::info;

use super::{AppState, TenantId};
use crate::error::SyncResult;
use crate::models::{
    ApiResponse, ChannelSyncStatus, ConfigureSyncRequest, ConfigureSyncResponse,
    DailyStatsQuery, DailyStatsResponse, SyncStatusResponse,
};
use crate::{registry, stats, sync_config};

pub fn router() -> Router {
    Router::new()
        .route("/sync/configure", post(configure_sync))
        .route("/sync/status", get(sync_status))
        .route("/stats/daily", get(daily_stats))
}

async fn configure_sync(
    Extension(state): Extension<AppState>,
    TenantId(tenant_id): TenantId,
    Json(req): Json<ConfigureSyncRequest>,
) -> SyncResult<Json<ApiResponse<ConfigureSyncResponse>>> {
    // Fails with NotFound unless the channel is connected.
    let config = sync_config::upsert(&state.pool, &tenant_id, &req).await?;
    state.coordinator.apply_config(&config);
    let polling_scheduled = state
        .coordinator
        .scheduled_interval(&tenant_id, &config.channel_id)
        .is_some();

    info!(
        tenant_id = %tenant_id,
        channel_id = %config.channel_id,
        delivery_mode = ?config.delivery_mode,
        interval_minutes = config.interval_minutes,
        polling_scheduled,
        "Sync configured"
    );
    let message = if polling_scheduled {
        format!("Polling every {} minute(s)", config.interval_minutes)
    } else {
        "Polling disabled".to_string()
    };

    Ok(Json(ApiResponse {
        data: ConfigureSyncResponse {
            config,
            polling_scheduled,
        },
        message,
    }))
}

async fn sync_status(
    Extension(state): Extension<AppState>,
    TenantId(tenant_id): TenantId,
) -> SyncResult<Json<ApiResponse<SyncStatusResponse>>> {
    let day = stats::today();
    let channels = registry::list(&state.pool, &tenant_id).await?;
    let mut configs = sync_config::list(&state.pool, &tenant_id).await?;
    let mut day_stats = stats::channel_stats(&state.pool, &tenant_id, day).await?;
    let totals = stats::tenant_totals(&state.pool, &tenant_id, day).await?;

    let coordinator = &state.coordinator;
    let entries: Vec<ChannelSyncStatus> = channels
        .into_iter()
        .map(|channel| {
            let config = configs
                .iter()
                .position(|c| c.channel_id == channel.channel_id)
                .map(|i| configs.swap_remove(i));
            let today = day_stats
                .iter()
                .position(|s| s.channel_id == channel.channel_id)
                .map(|i| day_stats.swap_remove(i));
            ChannelSyncStatus {
                polling_interval_minutes: coordinator
                    .scheduled_interval(&tenant_id, &channel.channel_id),
                running: coordinator.is_running(&tenant_id, &channel.channel_id),
                last_run: coordinator.last_run(&tenant_id, &channel.channel_id),
                channel_id: channel.channel_id,
                platform: channel.platform,
                status: channel.status,
                last_error: channel.last_error,
                last_sync_at: channel.last_sync_at,
                config,
                today,
            }
        })
        .collect();

    let message = format!("{} channel(s)", entries.len());
    Ok(Json(ApiResponse {
        data: SyncStatusResponse {
            day,
            totals,
            channels: entries,
        },
        message,
    }))
}

async fn daily_stats(
    Extension(state): Extension<AppState>,
    TenantId(tenant_id): TenantId,
    Query(query): Query<DailyStatsQuery>,
) -> SyncResult<Json<ApiResponse<DailyStatsResponse>>> {
    let day = query.day.unwrap_or_else(stats::today);
    let totals = stats::tenant_totals(&state.pool, &tenant_id, day).await?;
    let channels = stats::channel_stats(&state.pool, &tenant_id, day).await?;

    Ok(Json(ApiResponse {
        message: format!("Stats for {day}"),
        data: DailyStatsResponse {
            day,
            totals,
            channels,
        },
    }))
}
