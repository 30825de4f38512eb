//! Shop user accounts.

use common::UserId;
use serde::{Deserialize, Serialize};

use crate::value_objects::Money;

/// A shop user. Balance is only ever changed through the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub balance: Money,
    /// Opaque transport handle of the user's chat.
    pub chat_ref: i64,
}

impl User {
    /// Creates a user with an empty balance.
    pub fn new(id: UserId, chat_ref: i64) -> Self {
        Self {
            id,
            balance: Money::zero(),
            chat_ref,
        }
    }
}
