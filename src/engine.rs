use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    account::{Address, Amount},
    ledger::{LedgerError, LedgerGateway, Rejection, RejectionKind, SubmissionOutcome},
    request::{RequestError, TransferRequest},
    sequencer::{NonceSequencer, Sequence, SequenceState, SequencerError},
    transaction::{GasPolicy, SignedTransaction, TransactionHandle, UnsignedTransaction},
    vault::{SigningVault, VaultError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    pub chain_id: u64,
    pub gas: GasPolicy,
    /// Consecutive indeterminate submissions after which the next dispatch
    /// reconciles before allocating. Zero disables the check.
    pub max_indeterminate_streak: u32,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            chain_id: 1,
            gas: GasPolicy::default(),
            max_indeterminate_streak: 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] RequestError),
    #[error("Signing failed: {0}")]
    SigningFailed(#[source] VaultError),
    #[error("Rejected by ledger: {0}")]
    Rejected(Rejection),
    #[error("Outcome of transaction {sequence} is unknown: {reason}")]
    Indeterminate {
        sequence: Sequence,
        reason: LedgerError,
    },
    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(#[source] LedgerError),
    #[error("Ledger does not know the source account {0}")]
    UnknownAccount(Address),
    #[error(transparent)]
    Sequencer(#[from] SequencerError),
}

impl DispatchError {
    /// Stable short name of the failure, for front ends that map errors to
    /// their own status codes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::SigningFailed(_) => "signing_failed",
            Self::Rejected(_) => "rejected",
            Self::Indeterminate { .. } => "indeterminate",
            Self::LedgerUnavailable(_) => "ledger_unavailable",
            Self::UnknownAccount(_) => "unknown_account",
            Self::Sequencer(SequencerError::NotReconciled) => "not_reconciled",
            Self::Sequencer(SequencerError::Exhausted) => "sequence_exhausted",
        }
    }

    /// Whether retrying the same request later can succeed without the
    /// caller changing anything. Indeterminate is excluded: the transfer may
    /// already have happened.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SigningFailed(_)
                | Self::LedgerUnavailable(_)
                | Self::Sequencer(SequencerError::NotReconciled)
        )
    }
}

impl From<LedgerError> for DispatchError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UnknownAccount(account) => Self::UnknownAccount(account),
            other => Self::LedgerUnavailable(other),
        }
    }
}

/// Runs transfers from the managed account: sequence allocation, signing
/// and submission, with the sequence number rolled back or kept depending
/// on what the ledger said.
pub struct DispatchEngine<L, V> {
    ledger: Arc<L>,
    vault: Arc<V>,
    sequencer: NonceSequencer,
    policy: DispatchPolicy,
    indeterminate_streak: AtomicU32,
}

impl<L, V> DispatchEngine<L, V>
where
    L: LedgerGateway,
    V: SigningVault,
{
    pub fn new(ledger: Arc<L>, vault: Arc<V>, policy: DispatchPolicy) -> Self {
        let sequencer = NonceSequencer::new(vault.address());
        Self {
            ledger,
            vault,
            sequencer,
            policy,
            indeterminate_streak: AtomicU32::new(0),
        }
    }

    pub fn source_address(&self) -> Address {
        self.sequencer.account()
    }

    pub fn sequencer(&self) -> &NonceSequencer {
        &self.sequencer
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    pub fn indeterminate_streak(&self) -> u32 {
        self.indeterminate_streak.load(Ordering::Acquire)
    }

    /// Too many unknown outcomes in a row; local sequence bookkeeping is not
    /// trusted until the next successful reconcile.
    pub fn is_degraded(&self) -> bool {
        let limit = self.policy.max_indeterminate_streak;
        limit > 0 && self.indeterminate_streak() >= limit
    }

    /// Syncs the sequencer with the ledger and clears the indeterminate streak.
    pub async fn reconcile(&self) -> Result<SequenceState, DispatchError> {
        let state = self.sequencer.reconcile(self.ledger.as_ref()).await?;
        self.indeterminate_streak.store(0, Ordering::Release);
        Ok(state)
    }

    pub async fn balance(&self, address: &Address) -> Result<Amount, DispatchError> {
        Ok(self.ledger.balance(address).await?)
    }

    /// Reconciles on first use and in degraded mode only. The sequencer's
    /// `needs_reconcile` flag is advisory; callers that want eager
    /// reconciliation read it and call [`Self::reconcile`].
    async fn ensure_reconciled(&self) -> Result<(), DispatchError> {
        if !self.sequencer.is_reconciled() {
            self.reconcile().await?;
        } else if self.is_degraded() {
            warn!(
                streak = self.indeterminate_streak(),
                "too many indeterminate submissions, reconciling before dispatch"
            );
            self.reconcile().await?;
        }
        Ok(())
    }

    pub async fn dispatch(
        &self,
        request: TransferRequest,
    ) -> Result<TransactionHandle, DispatchError> {
        let transfer = request.validate()?;
        self.ensure_reconciled().await?;

        let mut lease = self.sequencer.lease()?;
        let sequence = lease.sequence();
        debug!(
            sequence,
            destination = %transfer.destination,
            amount = %transfer.amount,
            "sequence allocated"
        );

        let unsigned = UnsignedTransaction {
            chain_id: self.policy.chain_id,
            sequence,
            destination: transfer.destination,
            amount: transfer.amount,
            gas: self.policy.gas,
        };
        let signature = match self.vault.sign(&unsigned) {
            Ok(signature) => signature,
            Err(err) => {
                warn!(sequence, %err, "signing failed");
                lease.release();
                return Err(DispatchError::SigningFailed(err));
            }
        };
        let signed = SignedTransaction {
            unsigned,
            signer: self.vault.public_key(),
            signature,
        };
        let tx_hash = signed.hash();

        lease.begin_submission();
        match self.ledger.submit(&signed).await {
            Ok(SubmissionOutcome::Accepted) => {
                lease.commit();
                self.indeterminate_streak.store(0, Ordering::Release);
                info!(sequence, %tx_hash, "transaction accepted");
                Ok(TransactionHandle {
                    sequence,
                    tx_hash,
                    submitted_at: Utc::now(),
                })
            }
            Ok(SubmissionOutcome::Rejected(rejection)) => {
                warn!(sequence, %rejection, "transaction rejected");
                lease.release();
                if rejection.kind == RejectionKind::StaleSequence {
                    // the ledger is ahead of us
                    if let Err(err) = self.reconcile().await {
                        warn!(%err, "reconcile after stale sequence failed");
                        self.sequencer.mark_needs_reconcile();
                    }
                }
                Err(DispatchError::Rejected(rejection))
            }
            Err(err @ LedgerError::Unreachable(_)) => {
                warn!(sequence, %err, "ledger unreachable, transaction not sent");
                lease.release();
                Err(DispatchError::LedgerUnavailable(err))
            }
            Err(reason) => {
                lease.retain();
                let streak = self.indeterminate_streak.fetch_add(1, Ordering::AcqRel) + 1;
                warn!(sequence, %reason, streak, "submission outcome unknown");
                Err(DispatchError::Indeterminate { sequence, reason })
            }
        }
    }
}
