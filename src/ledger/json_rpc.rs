//! JSON-RPC 2.0 client for a ledger node.
//!
//! | method                     | params          | result                  |
//! |----------------------------|-----------------|-------------------------|
//! | `ledger_getSequence`       | `[address]`     | number                  |
//! | `ledger_submitTransaction` | `[hex payload]` | transaction hash string |
//! | `ledger_getBalance`        | `[address]`     | decimal string          |

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    account::{Address, Amount},
    sequencer::Sequence,
    transaction::SignedTransaction,
};

use super::{LedgerError, LedgerGateway, Rejection, RejectionKind, SubmissionOutcome};

pub const UNKNOWN_ACCOUNT: i64 = -32001;
pub const STALE_SEQUENCE: i64 = -32010;
pub const INSUFFICIENT_FUNDS: i64 = -32011;
pub const INVALID_PARAMS: i64 = -32602;

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

pub struct JsonRpcLedger {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcLedger {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| LedgerError::Unreachable(format!("cannot build HTTP client: {err}")))?;
        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Result<Value, RpcError>, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(id, method, "ledger rpc call");
        let res = self
            .client
            .post(&self.url)
            .json(&RpcRequest {
                jsonrpc: "2.0",
                id,
                method,
                params,
            })
            .send()
            .await
            .map_err(transport_error)?;

        if !res.status().is_success() {
            return Err(LedgerError::Interrupted(format!(
                "{method} answered with HTTP {}",
                res.status()
            )));
        }
        let body = res.text().await.map_err(transport_error)?;
        decode_response(&body)
    }
}

/// Only a failed connect proves the request never left; everything else
/// may have been delivered.
fn transport_error(err: reqwest::Error) -> LedgerError {
    if err.is_connect() || err.is_builder() {
        LedgerError::Unreachable(err.to_string())
    } else {
        LedgerError::Interrupted(err.to_string())
    }
}

fn decode_response(body: &str) -> Result<Result<Value, RpcError>, LedgerError> {
    let response: RpcResponse =
        serde_json::from_str(body).map_err(|err| LedgerError::Malformed(err.to_string()))?;
    match (response.result, response.error) {
        (_, Some(err)) => Ok(Err(err)),
        (Some(result), None) => Ok(Ok(result)),
        (None, None) => Err(LedgerError::Malformed(
            "response has neither result nor error".into(),
        )),
    }
}

/// Only codes that say the transaction is invalid count as a rejection. Any
/// other node error leaves open whether the transaction was taken.
fn rejection_from(err: RpcError) -> Result<Rejection, LedgerError> {
    let kind = match err.code {
        STALE_SEQUENCE => RejectionKind::StaleSequence,
        INSUFFICIENT_FUNDS => RejectionKind::InsufficientFunds,
        INVALID_PARAMS => RejectionKind::Malformed,
        code => {
            return Err(LedgerError::Interrupted(format!(
                "node error {code}: {}",
                err.message
            )));
        }
    };
    Ok(Rejection::new(kind, err.message))
}

fn query_error(account: &Address, err: RpcError) -> LedgerError {
    if err.code == UNKNOWN_ACCOUNT {
        LedgerError::UnknownAccount(*account)
    } else {
        LedgerError::Malformed(format!("node error {}: {}", err.code, err.message))
    }
}

fn parse_sequence(value: &Value) -> Result<Sequence, LedgerError> {
    value
        .as_u64()
        .ok_or_else(|| LedgerError::Malformed(format!("sequence is not a number: {value}")))
}

fn parse_amount(value: &Value) -> Result<Amount, LedgerError> {
    value
        .as_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| LedgerError::Malformed(format!("balance is not a decimal string: {value}")))
}

#[async_trait]
impl LedgerGateway for JsonRpcLedger {
    async fn current_sequence(&self, account: &Address) -> Result<Sequence, LedgerError> {
        match self
            .call("ledger_getSequence", json!([account.to_string()]))
            .await?
        {
            Ok(value) => parse_sequence(&value),
            Err(err) => Err(query_error(account, err)),
        }
    }

    async fn submit(&self, tx: &SignedTransaction) -> Result<SubmissionOutcome, LedgerError> {
        let payload = format!("0x{}", hex::encode(tx.encode()));
        match self
            .call("ledger_submitTransaction", json!([payload]))
            .await?
        {
            Ok(hash) => {
                debug!(sequence = tx.sequence(), %hash, "ledger accepted transaction");
                Ok(SubmissionOutcome::Accepted)
            }
            Err(err) => Ok(SubmissionOutcome::Rejected(rejection_from(err)?)),
        }
    }

    async fn balance(&self, account: &Address) -> Result<Amount, LedgerError> {
        match self
            .call("ledger_getBalance", json!([account.to_string()]))
            .await?
        {
            Ok(value) => parse_amount(&value),
            Err(err) => Err(query_error(account, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_results_and_errors() {
        let ok = decode_response(r#"{"jsonrpc":"2.0","id":1,"result":12}"#).unwrap();
        assert_eq!(parse_sequence(&ok.unwrap()).unwrap(), 12);

        let err = decode_response(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32010,"message":"nonce too low"}}"#,
        )
        .unwrap()
        .unwrap_err();
        assert_eq!(
            rejection_from(err).unwrap(),
            Rejection::new(RejectionKind::StaleSequence, "nonce too low")
        );

        assert!(matches!(
            decode_response(r#"{"jsonrpc":"2.0","id":1}"#),
            Err(LedgerError::Malformed(_))
        ));
        assert!(matches!(
            decode_response("<html>bad gateway</html>"),
            Err(LedgerError::Malformed(_))
        ));
    }

    #[test]
    fn map_node_errors() {
        let account = Address::from_bytes([7; 20]);
        let err = query_error(
            &account,
            RpcError {
                code: UNKNOWN_ACCOUNT,
                message: "no such account".into(),
            },
        );
        assert_eq!(err, LedgerError::UnknownAccount(account));

        let rejection = rejection_from(RpcError {
            code: INSUFFICIENT_FUNDS,
            message: "insufficient funds".into(),
        })
        .unwrap();
        assert_eq!(rejection.kind, RejectionKind::InsufficientFunds);

        // the node may still have taken these
        for (code, message) in [(-32603, "internal error"), (-32000, "already known")] {
            let err = rejection_from(RpcError {
                code,
                message: message.into(),
            })
            .unwrap_err();
            assert!(matches!(err, LedgerError::Interrupted(ref reason) if reason.contains(message)));
        }

        assert_eq!(
            parse_amount(&json!("340282366920938463463374607431768211455")).unwrap(),
            u128::MAX
        );
        assert!(parse_amount(&json!(12)).is_err());
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        // nothing listens on port 9 of the loopback interface
        let ledger = JsonRpcLedger::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = ledger
            .current_sequence(&Address::from_bytes([1; 20]))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unreachable(_)));
    }
}
