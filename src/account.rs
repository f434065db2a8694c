use std::{fmt, str::FromStr};

use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Ledger-native amount in base units. There is no floating point anywhere on
/// the dispatch path; coin-denominated values only exist at the edges
/// (configuration, CSV input, balance printing).
pub type Amount = u128;

pub const ADDRESS_LEN: usize = 20;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_LEN]);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("Address must be {expected} hex digits, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("Address contains non-hex characters")]
    InvalidHex,
}

impl Address {
    pub const fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Derives the ledger address of an Ed25519 public key: the trailing
    /// 20 bytes of its SHA-256 digest.
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let digest = Sha256::digest(public_key);
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes.copy_from_slice(&digest[digest.len() - ADDRESS_LEN..]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.len() != ADDRESS_LEN * 2 {
            return Err(AddressError::InvalidLength {
                expected: ADDRESS_LEN * 2,
                actual: digits.len(),
            });
        }
        let mut bytes = [0u8; ADDRESS_LEN];
        hex::decode_to_slice(digits, &mut bytes).map_err(|_| AddressError::InvalidHex)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("Amount must not be negative")]
    Negative,
    #[error("Amount {0} has more precision than the ledger's base unit")]
    TooPrecise(Decimal),
    #[error("Amount {0} does not fit into base units")]
    Overflow(Decimal),
}

/// Converts a coin-denominated amount (e.g. `1.5`) into base units, given
/// how many decimals one coin has. Conversion is exact or it fails.
pub fn to_base_units(coins: Decimal, decimals: u32) -> Result<Amount, AmountError> {
    if coins.is_sign_negative() && !coins.is_zero() {
        return Err(AmountError::Negative);
    }
    let mut scaled = coins;
    for _ in 0..decimals {
        scaled = scaled
            .checked_mul(Decimal::TEN)
            .ok_or(AmountError::Overflow(coins))?;
    }
    if !scaled.fract().is_zero() {
        return Err(AmountError::TooPrecise(coins));
    }
    scaled.trunc().to_u128().ok_or(AmountError::Overflow(coins))
}

/// Inverse of [`to_base_units`]. Returns `None` when the amount is too large
/// to be represented as a [`Decimal`] at the given scale.
pub fn to_coins(amount: Amount, decimals: u32) -> Option<Decimal> {
    let amount = i128::try_from(amount).ok()?;
    Decimal::try_from_i128_with_scale(amount, decimals)
        .ok()
        .map(|d| d.normalize())
}

#[cfg(test)]
mod tests {
    use rust_decimal::prelude::FromPrimitive;

    use super::*;

    #[test]
    fn parse_and_print_address() {
        let addr: Address = "0x00112233445566778899AABBCCDDEEFF00112233".parse().unwrap();
        assert_eq!(addr.to_string(), "0x00112233445566778899aabbccddeeff00112233");

        // prefix is optional
        let same: Address = "00112233445566778899aabbccddeeff00112233".parse().unwrap();
        assert_eq!(addr, same);

        assert_eq!(
            "0x1234".parse::<Address>().unwrap_err(),
            AddressError::InvalidLength {
                expected: 40,
                actual: 4
            }
        );
        assert_eq!(
            "0xzz112233445566778899aabbccddeeff00112233"
                .parse::<Address>()
                .unwrap_err(),
            AddressError::InvalidHex
        );
    }

    #[test]
    fn derive_address_from_public_key() {
        let a = Address::from_public_key(&[1u8; 32]);
        let b = Address::from_public_key(&[2u8; 32]);
        assert_ne!(a, b);
        assert_eq!(a, Address::from_public_key(&[1u8; 32]));
        assert!(!a.is_zero());
    }

    #[test]
    fn convert_coins_to_base_units() {
        assert_eq!(
            to_base_units(Decimal::from_u32(16888).unwrap(), 18).unwrap(),
            16_888_000_000_000_000_000_000
        );
        assert_eq!(to_base_units(Decimal::new(15, 1), 2).unwrap(), 150);
        assert_eq!(to_base_units(Decimal::ZERO, 18).unwrap(), 0);

        assert_eq!(
            to_base_units(Decimal::new(-1, 0), 18).unwrap_err(),
            AmountError::Negative
        );
        assert_eq!(
            to_base_units(Decimal::new(1, 3), 2).unwrap_err(),
            AmountError::TooPrecise(Decimal::new(1, 3))
        );
        assert!(matches!(
            to_base_units(Decimal::MAX, 18).unwrap_err(),
            AmountError::Overflow(_)
        ));
    }

    #[test]
    fn convert_base_units_to_coins() {
        assert_eq!(to_coins(150, 2), Some(Decimal::new(15, 1)));
        assert_eq!(to_coins(1_000_000_000_000_000_000, 18), Some(Decimal::ONE));
        assert_eq!(to_coins(u128::MAX, 18), None);
    }
}
