//! Dispatcher configuration, read from a TOML file. Every field has a
//! default, so an empty file (or no file) is a valid configuration.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    account::{Amount, AmountError, to_base_units},
    engine::DispatchPolicy,
    transaction::GasPolicy,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read `{path}`: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid {field}: {source}")]
    Amount {
        field: &'static str,
        source: AmountError,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Ledger node JSON-RPC endpoint
    pub rpc_url: String,
    /// Hex encoded Ed25519 secret of the source account
    pub key_file: PathBuf,
    pub rpc_timeout_secs: u64,
    pub gas: GasConfig,
    pub dispatch: DispatchConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8601".to_string(),
            key_file: PathBuf::from("/tmp/ethwallet/signing.key"),
            rpc_timeout_secs: 10,
            gas: GasConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GasConfig {
    pub limit: u64,
    /// Price per gas unit, in base units
    pub price: Decimal,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            limit: 21_000,
            price: Decimal::ONE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub chain_id: u64,
    /// Amount sent when a request does not name one, in whole coins
    pub default_amount: Decimal,
    /// Base units per coin, as a power of ten
    pub unit_decimals: u32,
    pub max_indeterminate_streak: u32,
    /// Upper bound on dispatches in flight for batch runs
    pub max_concurrency: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            default_amount: Decimal::from(16888),
            unit_decimals: 18,
            max_indeterminate_streak: 3,
            max_concurrency: 16,
        }
    }
}

impl DispatcherConfig {
    /// Reads `path` when given, otherwise returns the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn policy(&self) -> Result<DispatchPolicy, ConfigError> {
        let price = to_base_units(self.gas.price, 0).map_err(|source| ConfigError::Amount {
            field: "gas.price",
            source,
        })?;
        Ok(DispatchPolicy {
            chain_id: self.dispatch.chain_id,
            gas: GasPolicy {
                limit: self.gas.limit,
                price,
            },
            max_indeterminate_streak: self.dispatch.max_indeterminate_streak,
        })
    }

    /// Converts a coin amount using the configured unit.
    pub fn base_units(&self, coins: Decimal) -> Result<Amount, AmountError> {
        to_base_units(coins, self.dispatch.unit_decimals)
    }

    pub fn default_amount(&self) -> Result<Amount, ConfigError> {
        self.base_units(self.dispatch.default_amount)
            .map_err(|source| ConfigError::Amount {
                field: "dispatch.default_amount",
                source,
            })
    }
}
