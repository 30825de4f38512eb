use domain::Money;
use thiserror::Error;

/// Errors that can occur when talking to the store.
///
/// Expected business outcomes (not found, insufficient stock or balance)
/// are not errors; they come back as outcome enums.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be turned back into a domain value.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Reservation quantities must be positive and fit the stock column.
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(u32),

    /// Ledger amounts must be non-negative.
    #[error("Invalid amount: {0}")]
    InvalidAmount(Money),

    /// An amount or total does not fit the money representation.
    #[error("Amount overflow: {0}")]
    Overflow(String),

    /// The store refused the operation.
    #[error("Store unavailable during {0}")]
    Unavailable(&'static str),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StorageError>;
