//! Domain models for the channel sync service.
//!
//! Database rows (`sqlx::FromRow`) for channels, ingested orders, sync
//! configuration, webhook receipts and daily stats, plus the request and
//! response bodies of the HTTP surface.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::coordinator::SyncSummary;

// ============================================================================
// Enumerations
// ============================================================================

/// External platform a channel is connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PlatformKind {
    Shopify,
    WooCommerce,
    Custom,
}

impl PlatformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::Shopify => "shopify",
            PlatformKind::WooCommerce => "woocommerce",
            PlatformKind::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ChannelStatus {
    Connected,
    Disconnected,
    Error,
}

/// How an order reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum OrderOrigin {
    Webhook,
    Polling,
    Manual,
}

/// Whether a channel is fed by platform webhooks or by scheduled polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum DeliveryMode {
    Webhook,
    Polling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Received,
    Processed,
    Failed,
}

// ============================================================================
// Database Models (sqlx::FromRow)
// ============================================================================

/// A connected external store.
///
/// Credentials and the webhook secret never leave the service through
/// serialization; the secret is handed out once, by the connect response.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Channel {
    pub tenant_id: String,
    pub channel_id: String,
    pub platform: PlatformKind,
    pub display_name: String,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub credentials: serde_json::Value,
    #[serde(skip_serializing)]
    pub webhook_secret: String,
    pub status: ChannelStatus,
    pub last_error: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single line of a canonical order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub sku: String,
    pub quantity: i64,
    pub unit_price: f64,
}

/// Platform-agnostic order produced by every adapter.
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalOrder {
    pub external_order_id: String,
    pub order_number: String,
    pub customer_email: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub line_items: Vec<LineItem>,
    pub total: f64,
    pub status: String,
    pub external_created_at: Option<DateTime<Utc>>,
    pub raw_payload: serde_json::Value,
}

/// An ingested order as stored.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StoredOrder {
    pub id: String,
    pub tenant_id: String,
    pub channel_id: String,
    pub external_order_id: String,
    pub order_number: String,
    pub customer_email: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub line_items: serde_json::Value,
    pub total: f64,
    pub status: String,
    pub origin: OrderOrigin,
    pub external_created_at: Option<DateTime<Utc>>,
    pub raw_payload: serde_json::Value,
    pub ingested_at: DateTime<Utc>,
}

/// Per-channel automated sync policy.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct SyncConfig {
    pub tenant_id: String,
    pub channel_id: String,
    pub auto_sync_orders: bool,
    pub auto_sync_inventory: bool,
    pub auto_sync_products: bool,
    pub interval_minutes: i64,
    pub delivery_mode: DeliveryMode,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl SyncConfig {
    /// True when this config calls for a polling timer on the channel.
    pub fn wants_polling(&self) -> bool {
        self.active && self.auto_sync_orders && self.delivery_mode == DeliveryMode::Polling
    }
}

/// One inbound webhook attempt.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WebhookReceipt {
    pub id: i64,
    pub tenant_id: String,
    pub channel_id: String,
    pub event_type: String,
    pub payload: String,
    pub status: ReceiptStatus,
    pub signature_valid: bool,
    pub error_message: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Counters for one channel on one calendar day.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DailyStat {
    pub tenant_id: String,
    pub channel_id: String,
    pub day: NaiveDate,
    pub orders_received: i64,
    pub orders_total: f64,
    pub webhooks_received: i64,
    pub inventory_syncs: i64,
    pub sync_errors: i64,
}

/// Counters summed across every channel of a tenant for one day.
#[derive(Debug, Clone, Default, Serialize, sqlx::FromRow)]
pub struct DailyTotals {
    pub orders_received: i64,
    pub orders_total: f64,
    pub webhooks_received: i64,
    pub inventory_syncs: i64,
    pub sync_errors: i64,
}

// ============================================================================
// Request Models (Deserialize from JSON input)
// ============================================================================

/// Request body for connecting (or reconnecting) a channel.
#[derive(Debug, Deserialize)]
pub struct ConnectChannelRequest {
    pub channel_id: String,
    pub platform: PlatformKind,
    pub base_url: String,
    pub credentials: serde_json::Value,
    pub display_name: Option<String>,
    /// Supplied secret; a random one is generated when absent.
    pub webhook_secret: Option<String>,
}

/// Optional body for a manual sync.
#[derive(Debug, Default, Deserialize)]
pub struct SyncNowRequest {
    pub since: Option<DateTime<Utc>>,
}

/// Request body for `POST /sync/configure`.
#[derive(Debug, Deserialize)]
pub struct ConfigureSyncRequest {
    pub channel_id: String,
    #[serde(default)]
    pub auto_sync_orders: bool,
    #[serde(default)]
    pub auto_sync_inventory: bool,
    #[serde(default)]
    pub auto_sync_products: bool,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: i64,
    pub delivery_mode: DeliveryMode,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_interval_minutes() -> i64 {
    15
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct RegisterWebhooksRequest {
    pub channel_id: String,
}

/// `?limit=` for list endpoints.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DailyStatsQuery {
    pub day: Option<NaiveDate>,
}

// ============================================================================
// Response Models
// ============================================================================

/// Generic API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub message: String,
}

/// Response for a connected channel. The secret appears here and nowhere else.
#[derive(Debug, Serialize)]
pub struct ConnectChannelResponse {
    pub channel: Channel,
    pub webhook_url: String,
    pub inventory_webhook_url: String,
    pub webhook_secret: String,
}

#[derive(Debug, Serialize)]
pub struct TestConnectionResponse {
    pub channel_id: String,
    pub platform: PlatformKind,
    pub orders_found: usize,
}

#[derive(Debug, Serialize)]
pub struct WebhookUrls {
    pub channel_id: String,
    pub platform: PlatformKind,
    pub orders_url: String,
    pub inventory_url: String,
    pub signature_header: &'static str,
    pub signature_encoding: &'static str,
}

/// Acknowledgement for an accepted order webhook (also returned for duplicates).
#[derive(Debug, Serialize)]
pub struct OrderWebhookAck {
    pub order_id: String,
    pub platform: PlatformKind,
}

#[derive(Debug, Serialize)]
pub struct InventoryWebhookAck {
    pub platform: PlatformKind,
    pub changes: usize,
}

#[derive(Debug, Serialize)]
pub struct ConfigureSyncResponse {
    pub config: SyncConfig,
    pub polling_scheduled: bool,
}

/// One channel's entry in `GET /sync/status`.
#[derive(Debug, Serialize)]
pub struct ChannelSyncStatus {
    pub channel_id: String,
    pub platform: PlatformKind,
    pub status: ChannelStatus,
    pub last_error: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub config: Option<SyncConfig>,
    pub polling_interval_minutes: Option<i64>,
    pub running: bool,
    pub last_run: Option<SyncSummary>,
    pub today: Option<DailyStat>,
}

#[derive(Debug, Serialize)]
pub struct SyncStatusResponse {
    pub day: NaiveDate,
    pub totals: DailyTotals,
    pub channels: Vec<ChannelSyncStatus>,
}

#[derive(Debug, Serialize)]
pub struct DailyStatsResponse {
    pub day: NaiveDate,
    pub totals: DailyTotals,
    pub channels: Vec<DailyStat>,
}
