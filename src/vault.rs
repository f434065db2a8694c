#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use ed25519_dalek::{SECRET_KEY_LENGTH, Signature, Signer, SigningKey, VerifyingKey};
use parking_lot::RwLock;
use rand::rngs::OsRng;
use thiserror::Error;

use crate::{account::Address, transaction::UnsignedTransaction};

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Signing key is locked")]
    VaultLocked,
    #[error("Refusing to sign malformed transaction: {0}")]
    InvalidTransaction(&'static str),
    #[error("Key does not belong to account {expected}")]
    KeyMismatch { expected: Address },
    #[error("Key file is malformed: {0}")]
    MalformedKeyFile(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Owner read/write only.
#[cfg(unix)]
const KEY_FILE_MODE: u32 = 0o600;

/// Signing capability for the single managed account. The private key never
/// leaves an implementation of this trait.
pub trait SigningVault: Send + Sync {
    fn address(&self) -> Address;

    fn public_key(&self) -> [u8; 32];

    fn sign(&self, tx: &UnsignedTransaction) -> Result<Signature, VaultError>;
}

/// Ed25519 key held in process memory. Can be locked, which drops the key
/// material while keeping the public identity.
pub struct LocalVault {
    verifying_key: VerifyingKey,
    signing_key: RwLock<Option<SigningKey>>,
}

impl LocalVault {
    pub fn new(signing_key: SigningKey) -> Self {
        Self {
            verifying_key: signing_key.verifying_key(),
            signing_key: RwLock::new(Some(signing_key)),
        }
    }

    pub fn generate() -> Self {
        Self::new(SigningKey::generate(&mut OsRng))
    }

    /// Loads a key file containing the hex encoded 32-byte secret.
    pub fn from_key_file(path: impl AsRef<Path>) -> Result<Self, VaultError> {
        let content = fs::read_to_string(path)?;
        let mut secret = [0u8; SECRET_KEY_LENGTH];
        hex::decode_to_slice(content.trim(), &mut secret)
            .map_err(|err| VaultError::MalformedKeyFile(err.to_string()))?;
        Ok(Self::new(SigningKey::from_bytes(&secret)))
    }

    /// Writes the hex encoded secret, creating parent directories. On unix
    /// the file is readable by its owner only, also when it already existed.
    /// Fails with [`VaultError::VaultLocked`] when the key was already dropped.
    pub fn write_key_file(&self, path: impl AsRef<Path>) -> Result<(), VaultError> {
        let guard = self.signing_key.read();
        let key = guard.as_ref().ok_or(VaultError::VaultLocked)?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(KEY_FILE_MODE);
        let mut file = options.open(path)?;
        #[cfg(unix)]
        file.set_permissions(fs::Permissions::from_mode(KEY_FILE_MODE))?;
        file.write_all(hex::encode(key.to_bytes()).as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    pub fn lock(&self) {
        *self.signing_key.write() = None;
    }

    pub fn unlock(&self, signing_key: SigningKey) -> Result<(), VaultError> {
        if signing_key.verifying_key() != self.verifying_key {
            return Err(VaultError::KeyMismatch {
                expected: self.address(),
            });
        }
        *self.signing_key.write() = Some(signing_key);
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.signing_key.read().is_none()
    }
}

impl SigningVault for LocalVault {
    fn address(&self) -> Address {
        Address::from_public_key(&self.public_key())
    }

    fn public_key(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    fn sign(&self, tx: &UnsignedTransaction) -> Result<Signature, VaultError> {
        if tx.gas.limit == 0 {
            return Err(VaultError::InvalidTransaction("gas limit is zero"));
        }
        if tx.amount == 0 {
            return Err(VaultError::InvalidTransaction("amount is zero"));
        }
        let guard = self.signing_key.read();
        let key = guard.as_ref().ok_or(VaultError::VaultLocked)?;
        Ok(key.sign(&tx.canonical_bytes()))
    }
}
