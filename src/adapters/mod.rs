//! Platform adapters.
//!
//! Every external platform implements [`PlatformAdapter`]: pull orders
//! created since a cursor, and normalize a platform payload (pushed or
//! pulled) into a [`CanonicalOrder`]. [`AdapterSet`] maps each
//! [`PlatformKind`] to its adapter so callers never branch on the platform.
//!
//! - `shopify`: Admin REST API, access-token header, `Link` pagination
//! - `woocommerce`: WC REST v3, basic auth, `X-WP-TotalPages` pagination
//! - `custom`: configurable path, list field, cursor parameter and auth header

pub mod custom;
pub mod shopify;
pub mod woocommerce;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::{SyncError, SyncResult};
use crate::models::{CanonicalOrder, Channel, LineItem, PlatformKind};

/// Upper bound on pages pulled in a single fetch.
pub const MAX_PAGES: usize = 20;

/// Raw orders from one fetch.
#[derive(Debug, Default)]
pub struct FetchedOrders {
    pub orders: Vec<Value>,
    /// `MAX_PAGES` was reached while the platform still had pages left.
    pub truncated: bool,
}

impl FetchedOrders {
    pub fn complete(orders: Vec<Value>) -> Self {
        Self {
            orders,
            truncated: false,
        }
    }
}

/// A single stock level change carried by an inventory webhook.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventoryChange {
    pub sku: String,
    pub quantity: i64,
}

#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn kind(&self) -> PlatformKind;

    /// Pull raw orders created since `since`, oldest first.
    ///
    /// At most `MAX_PAGES` pages are read; hitting that limit with pages
    /// left is reported through [`FetchedOrders::truncated`].
    async fn fetch_orders_since(
        &self,
        channel: &Channel,
        since: DateTime<Utc>,
    ) -> SyncResult<FetchedOrders>;

    /// Normalize one raw order. Only a missing order id is fatal.
    fn normalize(&self, payload: &Value) -> SyncResult<CanonicalOrder>;

    /// Extract stock changes from an inventory webhook payload.
    fn normalize_inventory(&self, payload: &Value) -> SyncResult<Vec<InventoryChange>> {
        let items = match payload.get("items").and_then(Value::as_array) {
            Some(items) => items.iter().collect::<Vec<_>>(),
            None => vec![payload],
        };
        let changes: Vec<InventoryChange> = items
            .into_iter()
            .filter_map(|item| {
                inventory_change(item, &["sku", "inventory_item_id", "id"], &["quantity", "available"])
            })
            .collect();
        if changes.is_empty() {
            return Err(SyncError::MalformedPayload(
                "no inventory changes in payload".to_string(),
            ));
        }
        Ok(changes)
    }
}

/// Adapter lookup by platform kind.
pub struct AdapterSet {
    adapters: HashMap<PlatformKind, Arc<dyn PlatformAdapter>>,
}

impl AdapterSet {
    /// Register the built-in adapters, all sharing `client`.
    pub fn new(client: reqwest::Client) -> Self {
        let mut set = Self {
            adapters: HashMap::new(),
        };
        set.register(Arc::new(shopify::ShopifyAdapter::new(client.clone())));
        set.register(Arc::new(woocommerce::WooCommerceAdapter::new(client.clone())));
        set.register(Arc::new(custom::CustomAdapter::new(client)));
        set
    }

    /// Built-in adapters over a client with the given request timeout.
    pub fn with_timeout(timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("order-channel-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::new(client))
    }

    /// Replace the adapter for `adapter.kind()`.
    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: PlatformKind) -> SyncResult<Arc<dyn PlatformAdapter>> {
        self.adapters.get(&kind).cloned().ok_or_else(|| {
            SyncError::InvalidRequest(format!("no adapter registered for {}", kind.as_str()))
        })
    }
}

/// Check that a credential blob has the shape `kind` requires.
pub fn validate_credentials(kind: PlatformKind, credentials: &Value) -> SyncResult<()> {
    match kind {
        PlatformKind::Shopify => shopify::ShopifyCredentials::from_value(credentials).map(|_| ()),
        PlatformKind::WooCommerce => {
            woocommerce::WooCommerceCredentials::from_value(credentials).map(|_| ())
        }
        PlatformKind::Custom => custom::CustomCredentials::from_value(credentials).map(|_| ()),
    }
}

// ============================================================================
// Shared response handling
// ============================================================================

/// Turn a non-2xx platform response into an error with a short body excerpt.
pub(crate) async fn ensure_success(resp: reqwest::Response) -> SyncResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(200).collect();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(SyncError::InvalidCredentials(format!(
            "platform rejected credentials ({status})"
        )));
    }
    Err(SyncError::UpstreamUnavailable(format!(
        "platform returned {status}: {excerpt}"
    )))
}

// ============================================================================
// Tolerant field extraction
// ============================================================================

/// Resolve a dotted path (`customer.email`) inside a JSON value.
pub(crate) fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, key| current.get(key))
}

/// First non-empty string (or number rendered as string) among `paths`.
pub(crate) fn first_string(value: &Value, paths: &[&str]) -> Option<String> {
    paths
        .iter()
        .filter_map(|p| lookup(value, p))
        .find_map(scalar_string)
}

/// Like [`first_string`] but defaults to an empty string.
pub(crate) fn string_or_empty(value: &Value, paths: &[&str]) -> String {
    first_string(value, paths).unwrap_or_default()
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a monetary amount that may arrive as a number or numeric string.
///
/// Anything unparsable or non-finite becomes `0.0`.
pub(crate) fn parse_amount(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// First amount found among `paths`, `0.0` when none parse.
pub(crate) fn first_amount(value: &Value, paths: &[&str]) -> f64 {
    paths
        .iter()
        .find_map(|p| lookup(value, p))
        .map(|v| parse_amount(Some(v)))
        .unwrap_or(0.0)
}

pub(crate) fn parse_quantity(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .unwrap_or(1),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(1),
        _ => 1,
    }
}

/// Parse RFC 3339 timestamps, or naive `YYYY-MM-DDTHH:MM:SS` taken as UTC.
pub(crate) fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let raw = value?.as_str()?.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Join first and last name, skipping empty parts.
pub(crate) fn join_name(value: &Value, first: &str, last: &str) -> String {
    [first, last]
        .iter()
        .filter_map(|p| first_string(value, &[p]))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Field names used to read line items on one platform.
pub(crate) struct LineItemFields<'a> {
    pub name: &'a [&'a str],
    pub sku: &'a [&'a str],
    pub quantity: &'a [&'a str],
    pub unit_price: &'a [&'a str],
}

pub(crate) fn parse_line_items(items: Option<&Value>, fields: &LineItemFields<'_>) -> Vec<LineItem> {
    let Some(items) = items.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| LineItem {
            name: string_or_empty(item, fields.name),
            sku: string_or_empty(item, fields.sku),
            quantity: parse_quantity(fields.quantity.iter().find_map(|p| lookup(item, p))),
            unit_price: first_amount(item, fields.unit_price),
        })
        .collect()
}

/// The order id is the one field normalization cannot do without.
pub(crate) fn require_order_id(payload: &Value, paths: &[&str]) -> SyncResult<String> {
    first_string(payload, paths)
        .ok_or_else(|| SyncError::MalformedPayload("order id is missing".to_string()))
}

pub(crate) fn inventory_change(
    item: &Value,
    sku_paths: &[&str],
    quantity_paths: &[&str],
) -> Option<InventoryChange> {
    let sku = first_string(item, sku_paths)?;
    let quantity = quantity_paths.iter().find_map(|p| lookup(item, p))?;
    Some(InventoryChange {
        sku,
        quantity: parse_quantity(Some(quantity)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn amounts_tolerate_strings_and_garbage() {
        assert_eq!(parse_amount(Some(&json!("19.99"))), 19.99);
        assert_eq!(parse_amount(Some(&json!(" 5 "))), 5.0);
        assert_eq!(parse_amount(Some(&json!(42))), 42.0);
        assert_eq!(parse_amount(Some(&json!("abc"))), 0.0);
        assert_eq!(parse_amount(Some(&json!("NaN"))), 0.0);
        assert_eq!(parse_amount(Some(&json!("inf"))), 0.0);
        assert_eq!(parse_amount(Some(&json!(null))), 0.0);
        assert_eq!(parse_amount(None), 0.0);
    }

    #[test]
    fn ids_accept_numbers_and_strings() {
        let payload = json!({ "id": 450789469, "alt": "  ", "name": "x" });
        assert_eq!(first_string(&payload, &["id"]), Some("450789469".to_string()));
        assert_eq!(first_string(&payload, &["alt", "name"]), Some("x".to_string()));
        assert!(require_order_id(&json!({}), &["id"]).is_err());
    }

    #[test]
    fn dotted_paths_resolve() {
        let payload = json!({ "data": { "orders": [1, 2] } });
        assert_eq!(lookup(&payload, "data.orders"), Some(&json!([1, 2])));
        assert_eq!(lookup(&payload, ""), Some(&payload));
        assert_eq!(lookup(&payload, "data.missing"), None);
    }

    #[test]
    fn timestamps_accept_offset_and_naive_forms() {
        let with_offset = parse_timestamp(Some(&json!("2024-03-01T10:00:00-05:00"))).unwrap();
        assert_eq!(with_offset.to_rfc3339(), "2024-03-01T15:00:00+00:00");
        let naive = parse_timestamp(Some(&json!("2024-03-01T10:00:00"))).unwrap();
        assert_eq!(naive.to_rfc3339(), "2024-03-01T10:00:00+00:00");
        assert!(parse_timestamp(Some(&json!("yesterday"))).is_none());
    }

    #[test]
    fn default_inventory_normalization_reads_items_or_single_object() {
        let set = AdapterSet::new(reqwest::Client::new());
        let custom = set.get(PlatformKind::Custom).unwrap();

        let many = json!({ "items": [{ "sku": "A", "quantity": 3 }, { "sku": "B", "quantity": "7" }] });
        let changes = custom.normalize_inventory(&many).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1].quantity, 7);

        let single = json!({ "sku": "A", "quantity": 0 });
        assert_eq!(custom.normalize_inventory(&single).unwrap()[0].quantity, 0);

        assert!(custom.normalize_inventory(&json!({ "hello": 1 })).is_err());
    }

    #[test]
    fn credential_shapes_are_checked_per_platform() {
        assert!(validate_credentials(PlatformKind::Shopify, &json!({ "access_token": "t" })).is_ok());
        assert!(validate_credentials(PlatformKind::Shopify, &json!({ "access_token": "" })).is_err());
        assert!(validate_credentials(
            PlatformKind::WooCommerce,
            &json!({ "consumer_key": "ck", "consumer_secret": "cs" })
        )
        .is_ok());
        assert!(validate_credentials(PlatformKind::WooCommerce, &json!({ "consumer_key": "ck" })).is_err());
        assert!(validate_credentials(PlatformKind::Custom, &json!({ "api_key": "k" })).is_ok());
        assert!(validate_credentials(PlatformKind::Custom, &json!(null)).is_err());
    }
}
