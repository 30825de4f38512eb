//! Value objects shared across the bookshop domain.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Unique external identifier of a book record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VendorCode(String);

impl VendorCode {
    /// Creates a vendor code from a string.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Returns the vendor code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VendorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VendorCode {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VendorCode {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for VendorCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Money amount represented in cents to avoid floating point issues.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Money {
    cents: i64,
}

impl Money {
    /// Creates a new Money amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Creates a new Money amount from whole units.
    pub fn from_units(units: i64) -> Self {
        Self {
            cents: units * 100,
        }
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns the whole-unit portion.
    pub fn units(&self) -> i64 {
        self.cents / 100
    }

    /// Returns the cents portion (remainder after whole units).
    pub fn cents_part(&self) -> i64 {
        self.cents.abs() % 100
    }

    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    pub fn is_zero(&self) -> bool {
        self.cents == 0
    }

    pub fn is_negative(&self) -> bool {
        self.cents < 0
    }

    /// Subtracts `other`, returning `None` if the result would be negative.
    pub fn checked_sub(&self, other: Money) -> Option<Money> {
        let cents = self.cents.checked_sub(other.cents)?;
        (cents >= 0).then_some(Money { cents })
    }

    /// Adds `other`, returning `None` on overflow.
    pub fn checked_add(&self, other: Money) -> Option<Money> {
        self.cents.checked_add(other.cents).map(Money::from_cents)
    }

    /// Multiplies by a quantity, returning `None` on overflow.
    pub fn checked_mul(&self, quantity: u32) -> Option<Money> {
        self.cents
            .checked_mul(i64::from(quantity))
            .map(Money::from_cents)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.cents < 0 {
            write!(f, "-{}.{:02}", self.units().abs(), self.cents_part())
        } else {
            write!(f, "{}.{:02}", self.units(), self.cents_part())
        }
    }
}

/// Parses user-entered amounts such as `150`, `12.5` or `12,50`.
impl FromStr for Money {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidAmount(s.to_string());
        let normalized = s.trim().replace(',', ".");
        let (whole, fraction) = normalized
            .split_once('.')
            .unwrap_or((normalized.as_str(), ""));

        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if whole.is_empty() || !all_digits(whole) || fraction.len() > 2 || !all_digits(fraction) {
            return Err(invalid());
        }

        let units: i64 = whole.parse().map_err(|_| invalid())?;
        let cents_part: i64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => fraction.parse().map_err(|_| invalid())?,
        };

        units
            .checked_mul(100)
            .and_then(|cents| cents.checked_add(cents_part))
            .map(Money::from_cents)
            .ok_or_else(invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_code_string_conversion() {
        let code = VendorCode::new("ABC123");
        assert_eq!(code.as_str(), "ABC123");

        let code2: VendorCode = "XYZ".into();
        assert_eq!(code2.to_string(), "XYZ");
    }

    #[test]
    fn test_money_from_cents() {
        let money = Money::from_cents(1234);
        assert_eq!(money.cents(), 1234);
        assert_eq!(money.units(), 12);
        assert_eq!(money.cents_part(), 34);
    }

    #[test]
    fn test_money_display() {
        assert_eq!(Money::from_cents(1234).to_string(), "12.34");
        assert_eq!(Money::from_units(150).to_string(), "150.00");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-1234).to_string(), "-12.34");
    }

    #[test]
    fn test_money_parse_accepts_user_amounts() {
        assert_eq!("150".parse::<Money>().unwrap(), Money::from_units(150));
        assert_eq!("12.5".parse::<Money>().unwrap(), Money::from_cents(1250));
        assert_eq!(" 12,05 ".parse::<Money>().unwrap(), Money::from_cents(1205));
        assert_eq!("0".parse::<Money>().unwrap(), Money::zero());
    }

    #[test]
    fn test_money_parse_rejects_garbage() {
        for input in ["", "abc", "-5", "1.234", "1.2.3", ".50", "12e3"] {
            assert!(
                matches!(input.parse::<Money>(), Err(ParseError::InvalidAmount(_))),
                "{input:?} should not parse"
            );
        }
    }

    #[test]
    fn test_money_checked_sub_never_goes_negative() {
        let balance = Money::from_units(100);
        assert_eq!(
            balance.checked_sub(Money::from_units(30)),
            Some(Money::from_units(70))
        );
        assert_eq!(balance.checked_sub(Money::from_units(100)), Some(Money::zero()));
        assert_eq!(balance.checked_sub(Money::from_units(120)), None);
    }

    #[test]
    fn test_money_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(500);

        assert_eq!(a.checked_add(b), Some(Money::from_cents(1500)));
        assert_eq!(a.checked_mul(3), Some(Money::from_cents(3000)));
        assert_eq!(a.checked_mul(0), Some(Money::zero()));
    }

    #[test]
    fn test_money_arithmetic_overflow_is_none() {
        let near_max = "92233720368547758".parse::<Money>().unwrap();
        assert_eq!(near_max.checked_add(near_max), None);
        assert_eq!(Money::from_cents(i64::MAX).checked_add(Money::from_cents(1)), None);
        assert_eq!(Money::from_cents(i64::MAX / 2 + 1).checked_mul(2), None);
    }
}
