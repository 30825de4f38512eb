//! Domain layer of the bookshop order flow.
//!
//! This crate holds the data model and the rules that do not need storage:
//! - Value objects (`Money`, `VendorCode`) and records (`Book`, `User`, `CartItem`)
//! - The per-user conversation state machine (`Phase`, `ConversationState`)
//! - Quantity picker arithmetic (`QuantityStep`)
//! - Inbound transport events, decoded once from their string tags

pub mod book;
pub mod cart;
pub mod conversation;
pub mod error;
pub mod event;
pub mod quantity;
pub mod user;
pub mod value_objects;

pub use book::{Book, SearchCategory};
pub use cart::{CartItem, cart_total};
pub use conversation::{ConversationState, Phase};
pub use error::{ConversationError, ParseError};
pub use event::{CallbackAction, Command, InboundEvent};
pub use quantity::QuantityStep;
pub use user::User;
pub use value_objects::{Money, VendorCode};
