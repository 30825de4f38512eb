//! HTTP route handlers.

pub mod events;
pub mod health;
pub mod metrics;
pub mod outbox;

use order_flow::{InMemoryMessenger, OrderFlow};
use storage::BookshopStore;

/// Shared application state accessible from all handlers.
pub struct AppState<S: BookshopStore> {
    pub flow: OrderFlow<S, InMemoryMessenger>,
}
