//! Order flow error types.

use common::UserId;
use domain::{ConversationError, Money, ParseError, VendorCode};
use storage::StorageError;
use thiserror::Error;

/// Errors raised while sending messages to a user.
#[derive(Debug, Clone, Error)]
pub enum MessagingError {
    /// The transport could not deliver the message.
    #[error("Delivery to user {user_id} failed: {reason}")]
    Delivery { user_id: UserId, reason: String },

    /// The referenced message does not exist in the user's chat.
    #[error("Unknown message {0}")]
    UnknownMessage(common::MessageRef),
}

/// Errors that can occur while handling an inbound event.
///
/// Everything except `Storage`, `Messaging` and `CompensationFailed` is an
/// expected outcome: the orchestrator tells the user and carries on.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The user never sent `/start`.
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// A book referenced by the flow is no longer in the catalog.
    #[error("Book no longer available: {0}")]
    BookUnavailable(VendorCode),

    /// The cart has no line for that book.
    #[error("Cart line not found: {0}")]
    CartLineNotFound(VendorCode),

    /// Pay was requested with nothing in the cart.
    #[error("Cart is empty")]
    EmptyCart,

    /// Stock dropped below the requested quantity before the reservation.
    #[error("Insufficient stock for {vendor_code}: requested {requested}, available {available}")]
    InsufficientStock {
        vendor_code: VendorCode,
        requested: u32,
        available: u32,
    },

    /// The balance does not cover the cart total.
    #[error("Insufficient balance: balance {balance}, total {total}")]
    InsufficientBalance { balance: Money, total: Money },

    /// A top-up would take the balance past what can be represented.
    #[error("Balance limit exceeded: balance {balance}, top-up {amount}")]
    BalanceLimitExceeded { balance: Money, amount: Money },

    /// The event does not fit the conversation.
    #[error(transparent)]
    Conversation(#[from] ConversationError),

    /// The user typed something that could not be understood.
    #[error(transparent)]
    InvalidInput(#[from] ParseError),

    /// The store failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A reply could not be sent.
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    /// Undoing a half-finished operation failed; manual reconciliation needed.
    #[error("Compensation step '{step}' failed: {reason}")]
    CompensationFailed { step: &'static str, reason: String },
}

impl FlowError {
    /// Returns true for outcomes that are reported to the user instead of
    /// propagated.
    pub fn is_expected(&self) -> bool {
        !matches!(
            self,
            FlowError::Storage(_) | FlowError::Messaging(_) | FlowError::CompensationFailed { .. }
        )
    }
}

/// Convenience type alias for order flow results.
pub type Result<T> = std::result::Result<T, FlowError>;
