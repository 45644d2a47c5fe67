//! HTTP route modules.
//!
//! - `channels`: connect, inspect, test, sync and disconnect channels
//! - `sync`: sync policy, status and daily stats
//! - `webhooks`: platform-originated order and inventory webhooks
//! - `health`: liveness and database reachability

pub mod channels;
pub mod health;
pub mod sync;
pub mod webhooks;

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::config::Config;
use crate::coordinator::SyncCoordinator;
use crate::db::AppDb;

/// Header carrying the tenant on management routes.
pub const TENANT_HEADER: &str = "X-Tenant-Id";

/// Shared handles injected into every handler through `Extension`.
#[derive(Clone)]
pub struct AppState {
    pub pool: AppDb,
    pub coordinator: Arc<SyncCoordinator>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(pool: AppDb, coordinator: Arc<SyncCoordinator>, config: Config) -> Self {
        Self {
            pool,
            coordinator,
            config: Arc::new(config),
        }
    }

    /// Public URL a platform should deliver `topic` webhooks for a channel to.
    pub fn webhook_url(&self, tenant_id: &str, channel_id: &str, topic: &str) -> String {
        format!(
            "{}/webhooks/{}/{}/{}",
            self.config.public_base_url, tenant_id, channel_id, topic
        )
    }
}

/// Tenant of a management request, from `X-Tenant-Id` or the configured default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantId(pub String);

impl<S> FromRequestParts<S> for TenantId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let tenant = from_header.unwrap_or_else(|| {
            parts
                .extensions
                .get::<AppState>()
                .map(|state| state.config.default_tenant.clone())
                .unwrap_or_else(|| Config::default().default_tenant)
        });
        Ok(TenantId(tenant))
    }
}
