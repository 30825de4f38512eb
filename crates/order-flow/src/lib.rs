//! Order flow for the bookshop.
//!
//! This crate turns inbound user events into conversation transitions and
//! store operations:
//! 1. Search the catalog by title, author prefix or vendor code
//! 2. Pick a quantity and reserve it into the cart
//! 3. Pay for the cart from the user's balance
//!
//! Two-step operations compensate their first step when the second fails.

pub mod error;
pub mod messaging;
pub mod orchestrator;
pub mod replies;
pub mod sequencer;

pub use error::{FlowError, MessagingError, Result};
pub use messaging::{Button, Delivered, InMemoryMessenger, Keyboard, MessagingPort, Outbound};
pub use orchestrator::{Disposition, OrderFlow};
pub use sequencer::{UserSequencer, UserTurn};
