use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use ed25519_dalek::{Verifier, VerifyingKey};
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    account::{Address, Amount},
    sequencer::Sequence,
    transaction::SignedTransaction,
};

use super::{LedgerError, LedgerGateway, Rejection, RejectionKind, SubmissionOutcome};

/// Failure to play on the next `submit` call.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Refuse the connection; the transaction is not seen.
    Unreachable,
    /// Drop the connection before the ledger looks at the transaction.
    InterruptedBeforeApply,
    /// Process the transaction, then drop the connection.
    InterruptedAfterApply,
    Reject(Rejection),
}

#[derive(Debug, Default, Clone, Copy)]
struct LedgerAccount {
    sequence: Sequence,
    balance: Amount,
}

#[derive(Default)]
struct State {
    accounts: HashMap<Address, LedgerAccount>,
    queued: HashMap<Address, BTreeMap<Sequence, SignedTransaction>>,
    applied: Vec<SignedTransaction>,
    faults: VecDeque<Fault>,
    offline: bool,
}

/// Ledger kept in process memory. Orders transactions per sender by
/// sequence number: the next expected one is applied, later ones wait for
/// the gap to close, earlier ones are rejected as stale.
pub struct InMemoryLedger {
    chain_id: u64,
    state: Mutex<State>,
}

impl InMemoryLedger {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            state: Mutex::default(),
        }
    }

    /// Creates or overwrites an account.
    pub fn open_account(&self, address: Address, sequence: Sequence, balance: Amount) {
        self.state
            .lock()
            .accounts
            .insert(address, LedgerAccount { sequence, balance });
    }

    pub fn inject(&self, fault: Fault) {
        self.state.lock().faults.push_back(fault);
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Transactions applied so far, in application order.
    pub fn applied(&self) -> Vec<SignedTransaction> {
        self.state.lock().applied.clone()
    }

    pub fn queued_count(&self) -> usize {
        self.state.lock().queued.values().map(BTreeMap::len).sum()
    }

    pub fn sequence_of(&self, address: &Address) -> Option<Sequence> {
        self.state.lock().accounts.get(address).map(|acc| acc.sequence)
    }

    pub fn balance_of(&self, address: &Address) -> Amount {
        self.state
            .lock()
            .accounts
            .get(address)
            .map(|acc| acc.balance)
            .unwrap_or_default()
    }

    fn check(&self, tx: &SignedTransaction) -> Result<(), Rejection> {
        if tx.unsigned.chain_id != self.chain_id {
            return Err(Rejection::new(
                RejectionKind::Malformed,
                format!("wrong chain id {}", tx.unsigned.chain_id),
            ));
        }
        let key = VerifyingKey::from_bytes(&tx.signer)
            .map_err(|_| Rejection::new(RejectionKind::Malformed, "bad signer key"))?;
        key.verify(&tx.unsigned.canonical_bytes(), &tx.signature)
            .map_err(|_| Rejection::new(RejectionKind::Malformed, "bad signature"))
    }
}

fn cost(tx: &SignedTransaction) -> Option<Amount> {
    tx.unsigned.gas.max_fee()?.checked_add(tx.unsigned.amount)
}

impl State {
    fn accept(&mut self, tx: SignedTransaction) -> SubmissionOutcome {
        let sender = tx.sender();
        let Some(account) = self.accounts.get(&sender).copied() else {
            return SubmissionOutcome::Rejected(Rejection::new(
                RejectionKind::Other,
                format!("unknown sender {sender}"),
            ));
        };
        let seq = tx.sequence();
        if seq < account.sequence {
            return SubmissionOutcome::Rejected(Rejection::new(
                RejectionKind::StaleSequence,
                format!("sequence {seq} already used, next is {}", account.sequence),
            ));
        }
        if cost(&tx).is_none_or(|cost| cost > account.balance) {
            return SubmissionOutcome::Rejected(Rejection::new(
                RejectionKind::InsufficientFunds,
                format!("balance {} too low", account.balance),
            ));
        }
        let queue = self.queued.entry(sender).or_default();
        if queue.contains_key(&seq) {
            return SubmissionOutcome::Rejected(Rejection::new(
                RejectionKind::Other,
                format!("sequence {seq} already queued"),
            ));
        }
        queue.insert(seq, tx);
        self.drain(sender);
        SubmissionOutcome::Accepted
    }

    fn drain(&mut self, sender: Address) {
        loop {
            let Some(account) = self.accounts.get(&sender).copied() else {
                return;
            };
            let Some(queue) = self.queued.get_mut(&sender) else {
                return;
            };
            let Some(tx) = queue.remove(&account.sequence) else {
                return;
            };
            // funds may have moved since the transaction was queued
            let Some(cost) = cost(&tx).filter(|cost| *cost <= account.balance) else {
                debug!(sequence = tx.sequence(), "dropping queued transaction, insufficient funds");
                return;
            };
            if let Some(acc) = self.accounts.get_mut(&sender) {
                acc.balance -= cost;
                acc.sequence += 1;
            }
            let dest = self.accounts.entry(tx.unsigned.destination).or_default();
            dest.balance = dest.balance.saturating_add(tx.unsigned.amount);
            debug!(sequence = tx.sequence(), "applied transaction");
            self.applied.push(tx);
        }
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    async fn current_sequence(&self, account: &Address) -> Result<Sequence, LedgerError> {
        let state = self.state.lock();
        if state.offline {
            return Err(LedgerError::Unreachable("ledger offline".into()));
        }
        state
            .accounts
            .get(account)
            .map(|acc| acc.sequence)
            .ok_or(LedgerError::UnknownAccount(*account))
    }

    async fn submit(&self, tx: &SignedTransaction) -> Result<SubmissionOutcome, LedgerError> {
        let mut state = self.state.lock();
        if state.offline {
            return Err(LedgerError::Unreachable("ledger offline".into()));
        }
        let mut interrupt_after = false;
        match state.faults.pop_front() {
            None => {}
            Some(Fault::Unreachable) => {
                return Err(LedgerError::Unreachable("connection refused".into()));
            }
            Some(Fault::InterruptedBeforeApply) => {
                return Err(LedgerError::Interrupted("connection reset".into()));
            }
            Some(Fault::InterruptedAfterApply) => interrupt_after = true,
            Some(Fault::Reject(rejection)) => return Ok(SubmissionOutcome::Rejected(rejection)),
        }
        let outcome = match self.check(tx) {
            Ok(()) => state.accept(tx.clone()),
            Err(rejection) => SubmissionOutcome::Rejected(rejection),
        };
        if interrupt_after {
            return Err(LedgerError::Interrupted("response lost".into()));
        }
        Ok(outcome)
    }

    async fn balance(&self, account: &Address) -> Result<Amount, LedgerError> {
        let state = self.state.lock();
        if state.offline {
            return Err(LedgerError::Unreachable("ledger offline".into()));
        }
        Ok(state
            .accounts
            .get(account)
            .map(|acc| acc.balance)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signer, SigningKey};

    use crate::transaction::{GasPolicy, UnsignedTransaction};

    use super::*;

    const CHAIN: u64 = 9;

    fn key() -> SigningKey {
        SigningKey::from_bytes(&[4u8; 32])
    }

    fn sender() -> Address {
        Address::from_public_key(&key().verifying_key().to_bytes())
    }

    fn dest() -> Address {
        Address::from_bytes([0xdd; 20])
    }

    fn signed(sequence: Sequence, amount: Amount) -> SignedTransaction {
        let unsigned = UnsignedTransaction {
            chain_id: CHAIN,
            sequence,
            destination: dest(),
            amount,
            gas: GasPolicy { limit: 1, price: 1 },
        };
        SignedTransaction {
            unsigned,
            signer: key().verifying_key().to_bytes(),
            signature: key().sign(&unsigned.canonical_bytes()),
        }
    }

    #[tokio::test]
    async fn apply_in_sequence_order() {
        let ledger = InMemoryLedger::new(CHAIN);
        ledger.open_account(sender(), 3, 1_000);

        // future sequence waits for the gap
        assert_eq!(
            ledger.submit(&signed(4, 10)).await.unwrap(),
            SubmissionOutcome::Accepted
        );
        assert_eq!(ledger.current_sequence(&sender()).await.unwrap(), 3);
        assert_eq!(ledger.queued_count(), 1);

        assert_eq!(
            ledger.submit(&signed(3, 10)).await.unwrap(),
            SubmissionOutcome::Accepted
        );
        assert_eq!(ledger.current_sequence(&sender()).await.unwrap(), 5);
        assert_eq!(ledger.queued_count(), 0);
        assert_eq!(ledger.balance(&dest()).await.unwrap(), 20);
        // two transfers of 10 plus a fee of 1 each
        assert_eq!(ledger.balance(&sender()).await.unwrap(), 1_000 - 22);

        let applied: Vec<_> = ledger.applied().iter().map(|tx| tx.sequence()).collect();
        assert_eq!(applied, vec![3, 4]);

        let outcome = ledger.submit(&signed(4, 10)).await.unwrap();
        assert!(matches!(
            outcome,
            SubmissionOutcome::Rejected(Rejection {
                kind: RejectionKind::StaleSequence,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn reject_bad_transactions() {
        let ledger = InMemoryLedger::new(CHAIN);
        ledger.open_account(sender(), 0, 5);

        let outcome = ledger.submit(&signed(0, 10)).await.unwrap();
        assert!(matches!(
            outcome,
            SubmissionOutcome::Rejected(Rejection {
                kind: RejectionKind::InsufficientFunds,
                ..
            })
        ));

        let mut forged = signed(0, 1);
        forged.unsigned.amount = 2;
        let outcome = ledger.submit(&forged).await.unwrap();
        assert_eq!(
            outcome,
            SubmissionOutcome::Rejected(Rejection::new(RejectionKind::Malformed, "bad signature"))
        );
        assert!(ledger.applied().is_empty());
        assert_eq!(
            ledger.current_sequence(&dest()).await.unwrap_err(),
            LedgerError::UnknownAccount(dest())
        );
    }

    #[tokio::test]
    async fn play_injected_faults() {
        let ledger = InMemoryLedger::new(CHAIN);
        ledger.open_account(sender(), 0, 1_000);

        ledger.inject(Fault::Unreachable);
        ledger.inject(Fault::InterruptedAfterApply);
        assert!(matches!(
            ledger.submit(&signed(0, 1)).await,
            Err(LedgerError::Unreachable(_))
        ));
        assert!(matches!(
            ledger.submit(&signed(0, 1)).await,
            Err(LedgerError::Interrupted(_))
        ));
        // the interrupted submission still went through
        assert_eq!(ledger.sequence_of(&sender()), Some(1));

        ledger.set_offline(true);
        assert!(matches!(
            ledger.balance(&sender()).await,
            Err(LedgerError::Unreachable(_))
        ));
    }
}
