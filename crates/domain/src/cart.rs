//! Cart lines.

use chrono::{DateTime, Utc};
use common::UserId;
use serde::{Deserialize, Serialize};

use crate::value_objects::{Money, VendorCode};

/// A reserved quantity of one book belonging to one user.
///
/// `unit_price` is the catalog price captured when the stock was reserved;
/// later catalog price changes do not affect it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub user_id: UserId,
    pub vendor_code: VendorCode,
    /// Title captured with the reservation, for listing.
    pub title: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub reserved_at: DateTime<Utc>,
}

impl CartItem {
    /// Creates a cart line reserved now.
    pub fn new(
        user_id: UserId,
        vendor_code: impl Into<VendorCode>,
        title: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            user_id,
            vendor_code: vendor_code.into(),
            title: title.into(),
            quantity,
            unit_price,
            reserved_at: Utc::now(),
        }
    }

    /// Returns `quantity * unit_price`, or `None` if it overflows.
    pub fn total_price(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// Sums the line totals of a cart. `None` if any step overflows.
pub fn cart_total(items: &[CartItem]) -> Option<Money> {
    items
        .iter()
        .try_fold(Money::zero(), |total, item| total.checked_add(item.total_price()?))
}
