use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    account::{Address, Amount},
    sequencer::Sequence,
    transaction::SignedTransaction,
};

pub mod in_memory;
pub mod json_rpc;

/// Transport or protocol failure talking to the ledger, as opposed to the
/// ledger deciding against a transaction (see [`Rejection`]).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The request never reached the ledger.
    #[error("Ledger unreachable: {0}")]
    Unreachable(String),
    /// The request may have reached the ledger but no answer came back.
    #[error("Ledger call interrupted: {0}")]
    Interrupted(String),
    #[error("Ledger does not know account {0}")]
    UnknownAccount(Address),
    #[error("Malformed ledger response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// The sequence number was already used on the ledger.
    StaleSequence,
    InsufficientFunds,
    Malformed,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub reason: String,
}

impl Rejection {
    pub fn new(kind: RejectionKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// The ledger took the transaction. Says nothing about finality.
    Accepted,
    Rejected(Rejection),
}

/// Remote ledger as seen by the dispatcher. Implementations hold no
/// dispatch state and never retry on their own.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Sequence number the ledger expects next from `account`, i.e. the
    /// count of transactions it has accepted from it.
    async fn current_sequence(&self, account: &Address) -> Result<Sequence, LedgerError>;

    async fn submit(&self, tx: &SignedTransaction) -> Result<SubmissionOutcome, LedgerError>;

    async fn balance(&self, account: &Address) -> Result<Amount, LedgerError>;
}
