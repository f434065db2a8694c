use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::account::{Address, AddressError, Amount};

/// A caller's ask: move `amount` base units from the managed account to
/// `destination`. The destination is kept as the caller sent it; it is only
/// parsed during [`TransferRequest::validate`].
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub destination: String,
    pub amount: Amount,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Malformed destination `{destination}`: {source}")]
    MalformedDestination {
        destination: String,
        source: AddressError,
    },
    #[error("Destination must not be the zero address")]
    ZeroDestination,
    #[error("Amount must be greater than zero")]
    ZeroAmount,
}

/// Request that passed validation; the only shape the engine builds
/// transactions from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidTransfer {
    pub destination: Address,
    pub amount: Amount,
}

impl TransferRequest {
    pub fn new(destination: impl Into<String>, amount: Amount) -> Self {
        Self {
            destination: destination.into(),
            amount,
            requested_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<ValidTransfer, RequestError> {
        let destination: Address =
            self.destination
                .parse()
                .map_err(|source| RequestError::MalformedDestination {
                    destination: self.destination.clone(),
                    source,
                })?;
        if destination.is_zero() {
            return Err(RequestError::ZeroDestination);
        }
        if self.amount == 0 {
            return Err(RequestError::ZeroAmount);
        }
        Ok(ValidTransfer {
            destination,
            amount: self.amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEST: &str = "0x00112233445566778899aabbccddeeff00112233";

    #[test]
    fn validate_requests() {
        let ok = TransferRequest::new(DEST, 10).validate().unwrap();
        assert_eq!(ok.amount, 10);
        assert_eq!(ok.destination.to_string(), DEST);

        let err = TransferRequest::new(DEST, 0).validate().unwrap_err();
        assert_eq!(err, RequestError::ZeroAmount);

        let err = TransferRequest::new("not-an-address", 10)
            .validate()
            .unwrap_err();
        assert!(matches!(err, RequestError::MalformedDestination { .. }));
        assert_eq!(
            err.to_string(),
            "Malformed destination `not-an-address`: Address must be 40 hex digits, got 14"
        );

        let err = TransferRequest::new(format!("0x{}", "0".repeat(40)), 10)
            .validate()
            .unwrap_err();
        assert_eq!(err, RequestError::ZeroDestination);
    }
}
