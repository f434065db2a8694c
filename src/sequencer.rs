use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    account::Address,
    ledger::{LedgerError, LedgerGateway},
};

/// Per-account transaction sequence number (nonce).
pub type Sequence = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceState {
    pub next_sequence: Sequence,
    pub last_reconciled_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequencerError {
    #[error("Sequencer has not been reconciled with the ledger yet")]
    NotReconciled,
    #[error("No sequence numbers left for the account")]
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The number was the most recent allocation and will be handed out again.
    Reclaimed,
    /// Newer numbers were allocated since; this one is skipped for good.
    Gap,
    /// The number was never allocated, or the ledger has already moved
    /// past it.
    Ignored,
}

#[derive(Debug, Default)]
struct Inner {
    state: Option<SequenceState>,
    /// Sequence the ledger reported at the last reconcile. Nothing below it
    /// can be handed out again.
    ledger_floor: Sequence,
    needs_reconcile: bool,
    gaps: u64,
}

/// Hands out sequence numbers for the managed account.
///
/// All mutation happens under one lock whose critical sections are a few
/// integer operations; ledger I/O always runs outside of it.
#[derive(Debug)]
pub struct NonceSequencer {
    account: Address,
    inner: Mutex<Inner>,
}

impl NonceSequencer {
    pub fn new(account: Address) -> Self {
        Self {
            account,
            inner: Mutex::default(),
        }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    /// Pulls the ledger's accepted sequence and merges it into local state.
    /// `next_sequence` only ever moves forward: numbers that were submitted
    /// but are not yet visible on the ledger must not be handed out again.
    pub async fn reconcile<L>(&self, ledger: &L) -> Result<SequenceState, LedgerError>
    where
        L: LedgerGateway + ?Sized,
    {
        let observed = ledger.current_sequence(&self.account).await?;
        let mut inner = self.inner.lock();
        let previous = inner.state.map(|s| s.next_sequence);
        let next_sequence = previous.map_or(observed, |local| local.max(observed));
        let state = SequenceState {
            next_sequence,
            last_reconciled_at: Utc::now(),
        };
        inner.state = Some(state);
        inner.ledger_floor = inner.ledger_floor.max(observed);
        inner.needs_reconcile = false;
        drop(inner);

        match previous {
            Some(local) if local > observed => info!(
                account = %self.account,
                local,
                observed,
                "reconciled, {} transaction(s) not yet visible on ledger",
                local - observed
            ),
            _ => info!(account = %self.account, ?previous, observed, "reconciled"),
        }
        Ok(state)
    }

    /// Returns the next sequence number and advances past it.
    pub fn allocate(&self) -> Result<Sequence, SequencerError> {
        let mut inner = self.inner.lock();
        let state = inner.state.as_mut().ok_or(SequencerError::NotReconciled)?;
        let sequence = state.next_sequence;
        state.next_sequence = sequence.checked_add(1).ok_or(SequencerError::Exhausted)?;
        Ok(sequence)
    }

    /// Gives back a number that was never submitted. Only the most recent
    /// allocation can be rolled back; anything older became a gap, because
    /// rolling it back would hand out numbers that are already in use.
    /// Numbers the ledger has already consumed are never rolled back.
    pub fn release(&self, sequence: Sequence) -> ReleaseOutcome {
        let mut inner = self.inner.lock();
        let floor = inner.ledger_floor;
        let Some(state) = inner.state.as_mut() else {
            return ReleaseOutcome::Ignored;
        };
        if sequence >= state.next_sequence {
            return ReleaseOutcome::Ignored;
        }
        if sequence < floor {
            drop(inner);
            debug!(sequence, floor, "released number already consumed on ledger");
            return ReleaseOutcome::Ignored;
        }
        if sequence + 1 == state.next_sequence {
            state.next_sequence = sequence;
            drop(inner);
            debug!(sequence, "released sequence number");
            return ReleaseOutcome::Reclaimed;
        }
        inner.gaps += 1;
        inner.needs_reconcile = true;
        drop(inner);
        warn!(sequence, "sequence number released out of order, leaving a gap");
        ReleaseOutcome::Gap
    }

    /// Allocates a number wrapped in a guard that settles it on drop.
    pub fn lease(&self) -> Result<SequenceLease<'_>, SequencerError> {
        let sequence = self.allocate()?;
        Ok(SequenceLease {
            sequencer: self,
            sequence,
            stage: LeaseStage::Allocated,
        })
    }

    pub fn state(&self) -> Option<SequenceState> {
        self.inner.lock().state
    }

    pub fn next_sequence(&self) -> Option<Sequence> {
        self.state().map(|s| s.next_sequence)
    }

    pub fn is_reconciled(&self) -> bool {
        self.inner.lock().state.is_some()
    }

    pub fn needs_reconcile(&self) -> bool {
        self.inner.lock().needs_reconcile
    }

    pub fn mark_needs_reconcile(&self) {
        self.inner.lock().needs_reconcile = true;
    }

    pub fn gap_count(&self) -> u64 {
        self.inner.lock().gaps
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaseStage {
    Allocated,
    Submitting,
    Settled,
}

/// An allocated sequence number that has to be settled.
///
/// Dropping an unsettled lease releases the number if it was never handed
/// to the ledger, and otherwise keeps it and flags the sequencer for
/// reconciliation, since the ledger may have seen it.
#[derive(Debug)]
pub struct SequenceLease<'a> {
    sequencer: &'a NonceSequencer,
    sequence: Sequence,
    stage: LeaseStage,
}

impl SequenceLease<'_> {
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Marks the point after which the ledger may know about the number.
    pub fn begin_submission(&mut self) {
        self.stage = LeaseStage::Submitting;
    }

    /// The ledger accepted the transaction.
    pub fn commit(mut self) {
        self.stage = LeaseStage::Settled;
    }

    /// The transaction definitely did not reach the ledger, or the ledger
    /// refused it.
    pub fn release(mut self) -> ReleaseOutcome {
        self.stage = LeaseStage::Settled;
        self.sequencer.release(self.sequence)
    }

    /// Outcome unknown: keep the number consumed and ask for reconciliation.
    pub fn retain(mut self) {
        self.stage = LeaseStage::Settled;
        self.sequencer.mark_needs_reconcile();
    }
}

impl Drop for SequenceLease<'_> {
    fn drop(&mut self) {
        match self.stage {
            LeaseStage::Settled => {}
            LeaseStage::Allocated => {
                warn!(sequence = self.sequence, "lease dropped before submission");
                self.sequencer.release(self.sequence);
            }
            LeaseStage::Submitting => {
                warn!(sequence = self.sequence, "lease dropped during submission");
                self.sequencer.mark_needs_reconcile();
            }
        }
    }
}
