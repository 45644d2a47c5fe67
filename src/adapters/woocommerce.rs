//! WooCommerce REST v3 adapter.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
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

const PER_PAGE: usize = 100;

#[derive(Debug, Deserialize)]
pub struct WooCommerceCredentials {
    pub consumer_key: String,
    pub consumer_secret: String,
}

impl WooCommerceCredentials {
    pub fn from_value(value: &Value) -> SyncResult<Self> {
        let creds: Self = serde_json::from_value(value.clone())
            .map_err(|e| SyncError::InvalidCredentials(format!("woocommerce: {e}")))?;
        if creds.consumer_key.trim().is_empty() || creds.consumer_secret.trim().is_empty() {
            return Err(SyncError::InvalidCredentials(
                "woocommerce: consumer_key and consumer_secret are required".to_string(),
            ));
        }
        Ok(creds)
    }
}

pub struct WooCommerceAdapter {
    client: reqwest::Client,
}

impl WooCommerceAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PlatformAdapter for WooCommerceAdapter {
    fn kind(&self) -> PlatformKind {
        PlatformKind::WooCommerce
    }

    async fn fetch_orders_since(
        &self,
        channel: &Channel,
        since: DateTime<Utc>,
    ) -> SyncResult<FetchedOrders> {
        let creds = WooCommerceCredentials::from_value(&channel.credentials)?;
        let url = format!("{}/wp-json/wc/v3/orders", channel.base_url);
        let after = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut fetched = FetchedOrders::default();

        for page in 1..=MAX_PAGES {
            let response = self
                .client
                .get(&url)
                .basic_auth(&creds.consumer_key, Some(&creds.consumer_secret))
                .query(&[
                    ("after", after.clone()),
                    ("per_page", PER_PAGE.to_string()),
                    ("page", page.to_string()),
                    ("orderby", "date".to_string()),
                    ("order", "asc".to_string()),
                ])
                .send()
                .await?;
            let response = ensure_success(response).await?;
            let total_pages = response
                .headers()
                .get("x-wp-totalpages")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<usize>().ok());
            let body: Value = response.json().await?;
            let batch = body.as_array().ok_or_else(|| {
                SyncError::UpstreamUnavailable("woocommerce response is not an array".to_string())
            })?;
            debug!("WooCommerce page {} returned {} orders", page, batch.len());
            fetched.orders.extend(batch.iter().cloned());

            let more = match total_pages {
                Some(total) => page < total,
                None => batch.len() == PER_PAGE,
            };
            if !more {
                break;
            }
            if page == MAX_PAGES {
                fetched.truncated = true;
            }
        }
        Ok(fetched)
    }

    fn normalize(&self, payload: &Value) -> SyncResult<CanonicalOrder> {
        let external_order_id = require_order_id(payload, &["id"])?;
        let created = payload
            .get("date_created_gmt")
            .or_else(|| payload.get("date_created"));

        Ok(CanonicalOrder {
            order_number: first_string(payload, &["number"])
                .unwrap_or_else(|| external_order_id.clone()),
            customer_email: string_or_empty(payload, &["billing.email"]),
            customer_name: join_name(payload, "billing.first_name", "billing.last_name"),
            customer_phone: string_or_empty(payload, &["billing.phone"]),
            line_items: parse_line_items(
                payload.get("line_items"),
                &LineItemFields {
                    name: &["name"],
                    sku: &["sku"],
                    quantity: &["quantity"],
                    unit_price: &["price", "subtotal"],
                },
            ),
            total: first_amount(payload, &["total"]),
            status: first_string(payload, &["status"]).unwrap_or_else(|| "pending".to_string()),
            external_created_at: parse_timestamp(created),
            raw_payload: payload.clone(),
            external_order_id,
        })
    }

    /// Product webhooks carry the whole product; only SKU and stock matter here.
    fn normalize_inventory(&self, payload: &Value) -> SyncResult<Vec<InventoryChange>> {
        inventory_change(payload, &["sku", "id"], &["stock_quantity"])
            .map(|change| vec![change])
            .ok_or_else(|| {
                SyncError::MalformedPayload("product payload has no stock_quantity".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChannelStatus;
    use serde_json::json;

    fn adapter() -> WooCommerceAdapter {
        WooCommerceAdapter::new(reqwest::Client::new())
    }

    fn channel(base_url: &str) -> Channel {
        let now = Utc::now();
        Channel {
            tenant_id: "t1".into(),
            channel_id: "woo".into(),
            platform: PlatformKind::WooCommerce,
            display_name: "Woo".into(),
            base_url: base_url.into(),
            credentials: json!({ "consumer_key": "ck", "consumer_secret": "cs" }),
            webhook_secret: "s3cret".into(),
            status: ChannelStatus::Connected,
            last_error: None,
            last_sync_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn normalizes_billing_and_items() {
        let payload = json!({
            "id": 727,
            "number": "727",
            "status": "processing",
            "total": "29.35",
            "date_created_gmt": "2024-03-01T15:00:00",
            "billing": { "first_name": "Ada", "last_name": "Lovelace", "email": "ada@example.com" },
            "line_items": [{ "name": "Notebook", "sku": "", "quantity": 3, "price": 9.45 }]
        });
        let order = adapter().normalize(&payload).unwrap();
        assert_eq!(order.external_order_id, "727");
        assert_eq!(order.customer_name, "Ada Lovelace");
        assert_eq!(order.customer_email, "ada@example.com");
        assert_eq!(order.customer_phone, "");
        assert_eq!(order.total, 29.35);
        assert_eq!(order.status, "processing");
        assert_eq!(order.line_items[0].quantity, 3);
        assert_eq!(order.line_items[0].unit_price, 9.45);
        assert_eq!(
            order.external_created_at.map(|t| t.to_rfc3339()),
            Some("2024-03-01T15:00:00+00:00".to_string())
        );
    }

    #[test]
    fn product_payload_yields_stock_change() {
        let changes = adapter()
            .normalize_inventory(&json!({ "id": 5, "sku": "NB-1", "stock_quantity": 12 }))
            .unwrap();
        assert_eq!(changes, vec![InventoryChange { sku: "NB-1".into(), quantity: 12 }]);
    }

    #[tokio::test]
    async fn fetch_follows_total_pages() {
        let mut server = mockito::Server::new_async().await;
        let page1 = server
            .mock("GET", "/wp-json/wc/v3/orders")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "1".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("x-wp-totalpages", "2")
            .with_body(json!([{ "id": 1 }, { "id": 2 }]).to_string())
            .create_async()
            .await;
        let page2 = server
            .mock("GET", "/wp-json/wc/v3/orders")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("x-wp-totalpages", "2")
            .with_body(json!([{ "id": 3 }]).to_string())
            .create_async()
            .await;

        let fetched = adapter()
            .fetch_orders_since(&channel(&server.url()), Utc::now())
            .await
            .unwrap();
        assert_eq!(fetched.orders.len(), 3);
        assert!(!fetched.truncated);
        page1.assert_async().await;
        page2.assert_async().await;
    }

    async fn paged_server(total_pages: usize) -> (mockito::ServerGuard, mockito::Mock) {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/wp-json/wc/v3/orders")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("x-wp-totalpages", &total_pages.to_string())
            .with_body(json!([{ "id": 1 }, { "id": 2 }]).to_string())
            .expect(total_pages.min(MAX_PAGES))
            .create_async()
            .await;
        (server, mock)
    }

    #[tokio::test]
    async fn exactly_max_pages_is_a_complete_fetch() {
        let (server, mock) = paged_server(MAX_PAGES).await;
        let fetched = adapter()
            .fetch_orders_since(&channel(&server.url()), Utc::now())
            .await
            .unwrap();
        assert_eq!(fetched.orders.len(), MAX_PAGES * 2);
        assert!(!fetched.truncated);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn pages_beyond_the_limit_mark_the_fetch_truncated() {
        let (server, mock) = paged_server(25).await;
        let fetched = adapter()
            .fetch_orders_since(&channel(&server.url()), Utc::now())
            .await
            .unwrap();
        assert_eq!(fetched.orders.len(), MAX_PAGES * 2);
        assert!(fetched.truncated);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_credentials_are_reported_as_such() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/wp-json/wc/v3/orders")
            .match_query(mockito::Matcher::Any)
            .with_status(401)
            .with_body("{\"code\":\"woocommerce_rest_cannot_view\"}")
            .create_async()
            .await;

        let err = adapter()
            .fetch_orders_since(&channel(&server.url()), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidCredentials(_)));
    }
}
