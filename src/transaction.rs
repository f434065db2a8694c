use std::fmt;

use chrono::{DateTime, Utc};
use ed25519_dalek::{SIGNATURE_LENGTH, Signature};
use sha2::{Digest, Sha256};

use crate::{
    account::{ADDRESS_LEN, Address, Amount},
    sequencer::Sequence,
};

/// Fixed gas limit/price applied to every transfer. No market-rate lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPolicy {
    pub limit: u64,
    pub price: Amount,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            limit: 21_000,
            price: 1,
        }
    }
}

impl GasPolicy {
    /// Upper bound on what the sender pays for gas.
    pub fn max_fee(&self) -> Option<Amount> {
        Amount::from(self.limit).checked_mul(self.price)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub chain_id: u64,
    pub sequence: Sequence,
    pub destination: Address,
    pub amount: Amount,
    pub gas: GasPolicy,
}

pub const CANONICAL_LEN: usize = 8 + 8 + ADDRESS_LEN + 16 + 8 + 16;
pub const PUBLIC_KEY_LEN: usize = 32;
pub const ENCODED_LEN: usize = CANONICAL_LEN + PUBLIC_KEY_LEN + SIGNATURE_LENGTH;

impl UnsignedTransaction {
    /// Bytes covered by the signature. Big-endian, fixed width:
    /// chain id, sequence, destination, amount, gas limit, gas price.
    pub fn canonical_bytes(&self) -> [u8; CANONICAL_LEN] {
        let mut out = [0u8; CANONICAL_LEN];
        out[0..8].copy_from_slice(&self.chain_id.to_be_bytes());
        out[8..16].copy_from_slice(&self.sequence.to_be_bytes());
        out[16..16 + ADDRESS_LEN].copy_from_slice(self.destination.as_bytes());
        out[16 + ADDRESS_LEN..32 + ADDRESS_LEN].copy_from_slice(&self.amount.to_be_bytes());
        out[32 + ADDRESS_LEN..40 + ADDRESS_LEN].copy_from_slice(&self.gas.limit.to_be_bytes());
        out[40 + ADDRESS_LEN..].copy_from_slice(&self.gas.price.to_be_bytes());
        out
    }

    fn from_canonical(bytes: &[u8; CANONICAL_LEN]) -> Self {
        Self {
            chain_id: u64::from_be_bytes(field(bytes, 0)),
            sequence: u64::from_be_bytes(field(bytes, 8)),
            destination: Address::from_bytes(field(bytes, 16)),
            amount: u128::from_be_bytes(field(bytes, 16 + ADDRESS_LEN)),
            gas: GasPolicy {
                limit: u64::from_be_bytes(field(bytes, 32 + ADDRESS_LEN)),
                price: u128::from_be_bytes(field(bytes, 40 + ADDRESS_LEN)),
            },
        }
    }
}

fn field<const N: usize>(bytes: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[at..at + N]);
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub unsigned: UnsignedTransaction,
    pub signer: [u8; PUBLIC_KEY_LEN],
    pub signature: Signature,
}

impl SignedTransaction {
    pub fn sequence(&self) -> Sequence {
        self.unsigned.sequence
    }

    pub fn sender(&self) -> Address {
        Address::from_public_key(&self.signer)
    }

    /// Wire form: canonical bytes, signer public key, signature.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ENCODED_LEN);
        out.extend_from_slice(&self.unsigned.canonical_bytes());
        out.extend_from_slice(&self.signer);
        out.extend_from_slice(&self.signature.to_bytes());
        out
    }

    /// Parses the wire form. Does not verify the signature.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != ENCODED_LEN {
            return None;
        }
        let (canonical, rest) = bytes.split_at(CANONICAL_LEN);
        let (signer, signature) = rest.split_at(PUBLIC_KEY_LEN);
        Some(Self {
            unsigned: UnsignedTransaction::from_canonical(canonical.try_into().ok()?),
            signer: signer.try_into().ok()?,
            signature: Signature::from_slice(signature).ok()?,
        })
    }

    pub fn hash(&self) -> TxHash {
        TxHash(Sha256::digest(self.encode()).into())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash(pub [u8; 32]);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({self})")
    }
}

/// Returned for an accepted submission. Correlates the sequence number with
/// the transaction identity so callers can track it on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionHandle {
    pub sequence: Sequence,
    pub tx_hash: TxHash,
    pub submitted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signer, SigningKey, Verifier};

    use super::*;

    fn sample() -> UnsignedTransaction {
        UnsignedTransaction {
            chain_id: 7,
            sequence: 42,
            destination: Address::from_bytes([0xab; ADDRESS_LEN]),
            amount: 1_000,
            gas: GasPolicy::default(),
        }
    }

    #[test]
    fn canonical_layout_is_fixed() {
        let bytes = sample().canonical_bytes();
        assert_eq!(bytes.len(), CANONICAL_LEN);
        assert_eq!(&bytes[..8], &7u64.to_be_bytes());
        assert_eq!(&bytes[8..16], &42u64.to_be_bytes());
        assert_eq!(&bytes[16..36], &[0xab; ADDRESS_LEN]);
        assert_eq!(UnsignedTransaction::from_canonical(&bytes), sample());
    }

    #[test]
    fn signed_transaction_wire_form() {
        let key = SigningKey::from_bytes(&[3u8; 32]);
        let unsigned = sample();
        let signed = SignedTransaction {
            unsigned,
            signer: key.verifying_key().to_bytes(),
            signature: key.sign(&unsigned.canonical_bytes()),
        };
        let decoded = SignedTransaction::decode(&signed.encode()).unwrap();
        assert_eq!(decoded, signed);
        assert_eq!(decoded.hash(), signed.hash());
        assert!(
            key.verifying_key()
                .verify(&decoded.unsigned.canonical_bytes(), &decoded.signature)
                .is_ok()
        );
        assert_eq!(decoded.sender(), Address::from_public_key(&signed.signer));

        assert!(SignedTransaction::decode(&[0u8; 3]).is_none());
    }

    #[test]
    fn gas_fee_bound() {
        assert_eq!(GasPolicy::default().max_fee(), Some(21_000));
        let huge = GasPolicy {
            limit: u64::MAX,
            price: u128::MAX,
        };
        assert_eq!(huge.max_fee(), None);
    }
}
