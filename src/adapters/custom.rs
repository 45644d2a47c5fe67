//! Generic REST adapter for merchant-built shops.
//!
//! The credential blob doubles as the field mapping: where the order list
//! lives, which query parameter carries the cursor, and how the API key is
//! presented.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{
    ensure_success, first_amount, first_string, join_name, lookup, parse_line_items,
    parse_timestamp, require_order_id, string_or_empty, FetchedOrders, LineItemFields,
    PlatformAdapter,
};
use crate::error::{SyncError, SyncResult};
use crate::models::{CanonicalOrder, Channel, PlatformKind};

#[derive(Debug, Clone, Deserialize)]
pub struct CustomCredentials {
    pub api_key: String,
    #[serde(default = "default_auth_header")]
    pub auth_header: String,
    /// Prefix placed before the key; empty sends the bare key.
    #[serde(default = "default_auth_scheme")]
    pub auth_scheme: String,
    #[serde(default = "default_orders_path")]
    pub orders_path: String,
    /// Dotted path to the order array in the response; empty means the root.
    #[serde(default = "default_orders_field")]
    pub orders_field: String,
    #[serde(default = "default_since_param")]
    pub since_param: String,
}

fn default_auth_header() -> String {
    "Authorization".to_string()
}

fn default_auth_scheme() -> String {
    "Bearer".to_string()
}

fn default_orders_path() -> String {
    "/orders".to_string()
}

fn default_orders_field() -> String {
    "orders".to_string()
}

fn default_since_param() -> String {
    "since".to_string()
}

impl CustomCredentials {
    pub fn from_value(value: &Value) -> SyncResult<Self> {
        let creds: Self = serde_json::from_value(value.clone())
            .map_err(|e| SyncError::InvalidCredentials(format!("custom: {e}")))?;
        if creds.api_key.trim().is_empty() {
            return Err(SyncError::InvalidCredentials(
                "custom: api_key must not be empty".to_string(),
            ));
        }
        if creds.auth_header.trim().is_empty() || creds.since_param.trim().is_empty() {
            return Err(SyncError::InvalidCredentials(
                "custom: auth_header and since_param must not be empty".to_string(),
            ));
        }
        Ok(creds)
    }

    fn auth_value(&self) -> String {
        if self.auth_scheme.trim().is_empty() {
            self.api_key.clone()
        } else {
            format!("{} {}", self.auth_scheme.trim(), self.api_key)
        }
    }

    fn orders_url(&self, base_url: &str) -> String {
        if self.orders_path.starts_with('/') {
            format!("{}{}", base_url, self.orders_path)
        } else {
            format!("{}/{}", base_url, self.orders_path)
        }
    }
}

pub struct CustomAdapter {
    client: reqwest::Client,
}

impl CustomAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PlatformAdapter for CustomAdapter {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Custom
    }

    async fn fetch_orders_since(
        &self,
        channel: &Channel,
        since: DateTime<Utc>,
    ) -> SyncResult<FetchedOrders> {
        let creds = CustomCredentials::from_value(&channel.credentials)?;
        let response = self
            .client
            .get(creds.orders_url(&channel.base_url))
            .header(creds.auth_header.as_str(), creds.auth_value())
            .query(&[(creds.since_param.as_str(), since.to_rfc3339())])
            .send()
            .await?;
        let body: Value = ensure_success(response).await?.json().await?;

        let orders = lookup(&body, &creds.orders_field)
            .and_then(Value::as_array)
            .ok_or_else(|| {
                SyncError::UpstreamUnavailable(format!(
                    "response has no order array at '{}'",
                    creds.orders_field
                ))
            })?;
        debug!("Custom endpoint returned {} orders", orders.len());
        Ok(FetchedOrders::complete(orders.clone()))
    }

    fn normalize(&self, payload: &Value) -> SyncResult<CanonicalOrder> {
        let external_order_id = require_order_id(payload, &["id", "order_id", "external_id"])?;
        let customer_name = first_string(payload, &["customer_name", "customer.name"])
            .unwrap_or_else(|| join_name(payload, "customer.first_name", "customer.last_name"));
        let items = payload.get("line_items").or_else(|| payload.get("items"));

        Ok(CanonicalOrder {
            order_number: first_string(payload, &["order_number", "number", "name"])
                .unwrap_or_else(|| external_order_id.clone()),
            customer_email: string_or_empty(payload, &["customer_email", "email", "customer.email"]),
            customer_name,
            customer_phone: string_or_empty(payload, &["customer_phone", "phone", "customer.phone"]),
            line_items: parse_line_items(
                items,
                &LineItemFields {
                    name: &["name", "title"],
                    sku: &["sku"],
                    quantity: &["quantity", "qty"],
                    unit_price: &["unit_price", "price"],
                },
            ),
            total: first_amount(payload, &["total", "total_price", "amount"]),
            status: first_string(payload, &["status"]).unwrap_or_else(|| "pending".to_string()),
            external_created_at: parse_timestamp(
                ["created_at", "date_created", "date"]
                    .iter()
                    .find_map(|k| payload.get(*k)),
            ),
            raw_payload: payload.clone(),
            external_order_id,
        })
    }
}
