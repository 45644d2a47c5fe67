//! # Order Channel Sync
//!
//! Pulls and receives orders from external storefronts (Shopify,
//! WooCommerce, custom APIs) into one idempotent order store.
//!
//! Exposes the Axum router and modules so integration tests can create
//! an in-process server without binding a socket.

pub mod adapters;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod models;
pub mod receipts;
pub mod registry;
pub mod routes;
pub mod stats;
pub mod store;
pub mod sync_config;
pub mod verifier;

use axum::{Extension, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use routes::AppState;

/// Build the Axum router with all route modules and middleware.
///
/// The caller owns start-up: connecting the pool, restoring polling timers
/// and serving. This function only wires routes to `state`.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .merge(routes::channels::router())
        .merge(routes::sync::router())
        .merge(routes::webhooks::router())
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
