//! Identity types shared by every layer of the bookshop.

pub mod types;

pub use types::{MessageRef, RequestId, UserId};
