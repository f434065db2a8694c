/// Ledger addresses and amounts, plus exact coin/base-unit conversion.
pub mod account;

/// Inbound transfer requests and their validation.
pub mod request;

/// Transaction layout, canonical encoding and the handle returned to callers.
pub mod transaction;

/// Signing capability over the single managed account's key.
pub mod vault;

/// Ledger gateway interface, plus "in memory" and JSON-RPC implementations.
pub mod ledger;

/// Sequence number (nonce) allocation for the managed account.
/// This is the only place where sequence state is mutated.
pub mod sequencer;

/// End-to-end dispatch of one transfer: allocate, sign, submit, settle.
pub mod engine;

/// TOML configuration with a default for every field.
pub mod config;

/// Batch driver used by the binary. Lives in the library so integration
/// tests can run it against the in-memory ledger.
pub mod bin_utils;
