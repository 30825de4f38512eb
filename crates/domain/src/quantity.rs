//! Quantity picker arithmetic.

use serde::{Deserialize, Serialize};

/// One press of a quantity picker button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuantityStep {
    PlusOne,
    PlusFive,
    MinusOne,
    MinusFive,
}

impl QuantityStep {
    /// Signed change this step applies.
    pub fn delta(&self) -> i64 {
        match self {
            QuantityStep::PlusOne => 1,
            QuantityStep::PlusFive => 5,
            QuantityStep::MinusOne => -1,
            QuantityStep::MinusFive => -5,
        }
    }

    /// Applies the step to `current`, saturating into `[1, max]`.
    ///
    /// A `max` of zero still yields 1; callers refuse out-of-stock books
    /// before a picker is ever shown.
    pub fn apply(&self, current: u32, max: u32) -> u32 {
        clamp_quantity(i64::from(current) + self.delta(), max)
    }

    pub fn label(&self) -> &'static str {
        match self {
            QuantityStep::PlusOne => "+1",
            QuantityStep::PlusFive => "+5",
            QuantityStep::MinusOne => "-1",
            QuantityStep::MinusFive => "-5",
        }
    }
}

/// Clamps a candidate quantity into `[1, max]`.
pub fn clamp_quantity(candidate: i64, max: u32) -> u32 {
    let upper = i64::from(max.max(1));
    // in [1, u32::MAX] after the clamp
    candidate.clamp(1, upper) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_move_within_bounds() {
        assert_eq!(QuantityStep::PlusOne.apply(1, 10), 2);
        assert_eq!(QuantityStep::PlusFive.apply(1, 10), 6);
        assert_eq!(QuantityStep::MinusOne.apply(6, 10), 5);
        assert_eq!(QuantityStep::MinusFive.apply(6, 10), 1);
    }

    #[test]
    fn test_increment_past_stock_is_a_no_op_at_the_bound() {
        assert_eq!(QuantityStep::PlusOne.apply(3, 3), 3);
        assert_eq!(QuantityStep::PlusFive.apply(3, 3), 3);
    }

    #[test]
    fn test_decrement_below_one_is_a_no_op_at_the_bound() {
        assert_eq!(QuantityStep::MinusOne.apply(1, 3), 1);
        assert_eq!(QuantityStep::MinusFive.apply(1, 3), 1);
    }

    #[test]
    fn test_large_steps_saturate() {
        assert_eq!(QuantityStep::PlusFive.apply(3, 5), 5);
        assert_eq!(QuantityStep::MinusFive.apply(4, 10), 1);
    }

    #[test]
    fn test_clamp_pulls_down_when_stock_shrinks() {
        assert_eq!(clamp_quantity(8, 2), 2);
        assert_eq!(clamp_quantity(0, 0), 1);
    }
}
