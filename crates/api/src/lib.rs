//! HTTP transport adapter for the bookshop order flow.
//!
//! Accepts chat transport events over HTTP, runs them through the order
//! flow and queues the replies per user, with structured logging (tracing)
//! and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::Book;
use metrics_exporter_prometheus::PrometheusHandle;
use order_flow::{InMemoryMessenger, OrderFlow};
use storage::{BookshopStore, Catalog};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use error::StartupError;
use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: BookshopStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/events", post(routes::events::receive::<S>))
        .route("/users/{id}/outbox", get(routes::outbox::drain::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state around a store, with an in-memory outbox.
pub fn create_state<S: BookshopStore + 'static>(store: S) -> Arc<AppState<S>> {
    Arc::new(AppState {
        flow: OrderFlow::new(store, InMemoryMessenger::new()),
    })
}

/// Loads a JSON array of books into the catalog. Returns how many were loaded.
#[tracing::instrument(skip(store))]
pub async fn seed_catalog<S: Catalog>(store: &S, path: &Path) -> Result<usize, StartupError> {
    let raw = tokio::fs::read_to_string(path).await?;
    let books: Vec<Book> = serde_json::from_str(&raw)?;
    let count = books.len();
    for book in books {
        store.upsert_book(book).await?;
    }
    tracing::info!(count, "catalog loaded");
    Ok(count)
}
