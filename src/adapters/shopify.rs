//! Shopify Admin REST adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, LINK};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{
    ensure_success, first_amount, first_string, inventory_change, join_name, parse_line_items,
    parse_timestamp, require_order_id, string_or_empty, InventoryChange, LineItemFields,
    FetchedOrders, PlatformAdapter, MAX_PAGES,
};
use crate::error::{SyncError, SyncResult};
use crate::models::{CanonicalOrder, Channel, PlatformKind};

const DEFAULT_API_VERSION: &str = "2024-01";
const PAGE_LIMIT: &str = "250";

#[derive(Debug, Deserialize)]
pub struct ShopifyCredentials {
    pub access_token: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

impl ShopifyCredentials {
    pub fn from_value(value: &Value) -> SyncResult<Self> {
        let creds: Self = serde_json::from_value(value.clone())
            .map_err(|e| SyncError::InvalidCredentials(format!("shopify: {e}")))?;
        if creds.access_token.trim().is_empty() {
            return Err(SyncError::InvalidCredentials(
                "shopify: access_token must not be empty".to_string(),
            ));
        }
        Ok(creds)
    }
}

pub struct ShopifyAdapter {
    client: reqwest::Client,
}

impl ShopifyAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PlatformAdapter for ShopifyAdapter {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Shopify
    }

    async fn fetch_orders_since(
        &self,
        channel: &Channel,
        since: DateTime<Utc>,
    ) -> SyncResult<FetchedOrders> {
        let creds = ShopifyCredentials::from_value(&channel.credentials)?;
        let mut url = format!(
            "{}/admin/api/{}/orders.json",
            channel.base_url, creds.api_version
        );
        // Only the first request carries the filter; `Link` URLs embed their own cursor.
        let mut query = Some(vec![
            ("status", "any".to_string()),
            ("created_at_min", since.to_rfc3339()),
            ("order", "created_at asc".to_string()),
            ("limit", PAGE_LIMIT.to_string()),
        ]);
        let mut fetched = FetchedOrders::default();

        for page in 1..=MAX_PAGES {
            let mut request = self
                .client
                .get(&url)
                .header("X-Shopify-Access-Token", &creds.access_token);
            if let Some(q) = query.take() {
                request = request.query(&q);
            }
            let response = ensure_success(request.send().await?).await?;
            let next = next_page_url(response.headers());
            let body: Value = response.json().await?;
            let batch = body
                .get("orders")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    SyncError::UpstreamUnavailable("shopify response has no orders array".to_string())
                })?;
            debug!("Shopify page {} returned {} orders", page, batch.len());
            fetched.orders.extend(batch.iter().cloned());

            let Some(next) = next else {
                break;
            };
            if page == MAX_PAGES {
                fetched.truncated = true;
            }
            url = next;
        }
        Ok(fetched)
    }

    fn normalize(&self, payload: &Value) -> SyncResult<CanonicalOrder> {
        let external_order_id = require_order_id(payload, &["id"])?;
        let mut customer_name = join_name(payload, "customer.first_name", "customer.last_name");
        if customer_name.is_empty() {
            customer_name = string_or_empty(payload, &["billing_address.name", "shipping_address.name"]);
        }

        Ok(CanonicalOrder {
            order_number: first_string(payload, &["name", "order_number"])
                .unwrap_or_else(|| external_order_id.clone()),
            customer_email: string_or_empty(payload, &["email", "contact_email", "customer.email"]),
            customer_name,
            customer_phone: string_or_empty(
                payload,
                &["phone", "customer.phone", "billing_address.phone"],
            ),
            line_items: parse_line_items(
                payload.get("line_items"),
                &LineItemFields {
                    name: &["title", "name"],
                    sku: &["sku"],
                    quantity: &["quantity"],
                    unit_price: &["price"],
                },
            ),
            total: first_amount(payload, &["total_price", "current_total_price"]),
            status: first_string(payload, &["financial_status"])
                .unwrap_or_else(|| "pending".to_string()),
            external_created_at: parse_timestamp(payload.get("created_at")),
            raw_payload: payload.clone(),
            external_order_id,
        })
    }

    fn normalize_inventory(&self, payload: &Value) -> SyncResult<Vec<InventoryChange>> {
        inventory_change(payload, &["inventory_item_id"], &["available"])
            .map(|change| vec![change])
            .ok_or_else(|| {
                SyncError::MalformedPayload("inventory level payload is incomplete".to_string())
            })
    }
}

/// Extract the `rel="next"` target from a `Link` header.
fn next_page_url(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        if !params.contains("rel=\"next\"") {
            return None;
        }
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        Some(target.to_string())
    })
}
