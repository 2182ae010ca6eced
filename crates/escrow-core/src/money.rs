//! # Fixed-Point Money
//!
//! `Amount` is a non-negative decimal with at most two fractional digits,
//! stored at scale 2. It serializes as a string (`"4000.00"`). Deserialization
//! accepts strings and integers; JSON floats are rejected so that no amount
//! ever passes through binary floating point.
//!
//! Currency conversion is out of scope: amounts of different currencies are
//! never combined, and every escrow carries exactly one `Currency`.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EscrowError;

/// Fractional digits carried by every amount.
pub const AMOUNT_SCALE: u32 = 2;

/// A non-negative monetary amount with two fractional digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(Decimal);

impl Amount {
    /// The zero amount.
    pub const ZERO: Amount = Amount(Decimal::from_parts(0, 0, 0, false, AMOUNT_SCALE));

    /// Validate and wrap a decimal.
    ///
    /// # Errors
    ///
    /// Returns `EscrowError::Validation` if the value is negative or carries
    /// more than two significant fractional digits.
    pub fn new(value: Decimal) -> Result<Self, EscrowError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(EscrowError::Validation(format!(
                "amount must not be negative: {value}"
            )));
        }
        if value.normalize().scale() > AMOUNT_SCALE {
            return Err(EscrowError::Validation(format!(
                "amount has more than {AMOUNT_SCALE} decimal places: {value}"
            )));
        }
        let mut scaled = value.abs();
        scaled.rescale(AMOUNT_SCALE);
        Ok(Self(scaled))
    }

    /// Parse a decimal string such as `"10000"` or `"4000.50"`.
    pub fn parse(s: &str) -> Result<Self, EscrowError> {
        let value: Decimal = s
            .trim()
            .parse()
            .map_err(|e| EscrowError::Validation(format!("invalid amount {s:?}: {e}")))?;
        Self::new(value)
    }

    /// Whole units, e.g. `Amount::from_units(10_000)`.
    pub fn from_units(units: u64) -> Self {
        let mut d = Decimal::from(units);
        d.rescale(AMOUNT_SCALE);
        Self(d)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        !self.0.is_zero()
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Self)
    }

    /// Subtract, returning `None` if the result would be negative.
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        if other.0 > self.0 {
            return None;
        }
        self.0.checked_sub(other.0).map(Self)
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Units(u64),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Amount::parse(&s).map_err(serde::de::Error::custom),
            Raw::Units(u) => Ok(Amount::from_units(u)),
        }
    }
}

/// ISO 4217-style currency code: three uppercase ASCII letters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Validate a currency code. Lowercase input is upper-cased.
    pub fn new(code: &str) -> Result<Self, EscrowError> {
        let code = code.trim().to_ascii_uppercase();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(EscrowError::Validation(format!(
                "currency must be a three-letter code, got {code:?}"
            )));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = EscrowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(c: Currency) -> Self {
        c.0
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
