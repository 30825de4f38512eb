//! Domain error types.

use thiserror::Error;

use crate::conversation::Phase;
use crate::value_objects::VendorCode;

/// Errors raised by conversation state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationError {
    /// The current phase does not accept the requested action.
    #[error("Cannot {action} in {phase} phase")]
    StateMismatch { phase: Phase, action: &'static str },

    /// Search text was blank.
    #[error("Search text is empty")]
    EmptyQuery,

    /// The selected book has no stock left.
    #[error("Book {vendor_code} is out of stock")]
    OutOfStock { vendor_code: VendorCode },

    /// A quantity request named a different book than the one selected.
    #[error("Book {requested} was requested but {pending} is selected")]
    BookMismatch {
        pending: VendorCode,
        requested: VendorCode,
    },
}

/// Errors raised while decoding transport strings into domain values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Amount is not a non-negative decimal with at most two fraction digits.
    #[error("Invalid amount: {0:?}")]
    InvalidAmount(String),

    /// Command name is not one the bookshop understands.
    #[error("Unknown command: {0:?}")]
    UnknownCommand(String),

    /// Callback payload does not carry a known tag.
    #[error("Unknown callback payload: {0:?}")]
    UnknownCallback(String),

    /// Stored phase name is not recognised.
    #[error("Unknown conversation phase: {0:?}")]
    UnknownPhase(String),
}
