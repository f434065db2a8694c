//! Batch front end over [`DispatchEngine`]: reads transfer requests from CSV,
//! dispatches them concurrently and writes one result row per request.

use std::io::{Read, Write};

use anyhow::Result;
use futures::{StreamExt, stream};
use tracing::info;

use crate::{
    config::DispatcherConfig,
    engine::{DispatchEngine, DispatchError},
    ledger::LedgerGateway,
    request::TransferRequest,
    vault::SigningVault,
};
use csv_parser::CsvTransferParser;
use csv_printer::{DispatchRecord, print_records};
pub mod csv_parser;
pub mod csv_printer;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub accepted: usize,
    pub failed: usize,
}

pub struct Service<'e, 'w, L, V, R, W: 'w> {
    pub engine: &'e DispatchEngine<L, V>,
    pub config: &'e DispatcherConfig,
    pub input: R,
    pub output: &'w mut W,
}

enum Prepared {
    Ready(TransferRequest),
    Failed(&'static str, String),
}

impl<'e, 'w, L, V, R, W> Service<'e, 'w, L, V, R, W>
where
    L: LedgerGateway,
    V: SigningVault,
    R: Read,
    W: Write + 'w,
{
    pub async fn run(self) -> Result<BatchSummary> {
        let default_amount = self.config.default_amount()?;
        let prepared: Vec<_> = CsvTransferParser::new(self.input)
            .map(|(line, row)| match row {
                Err(err) => (line, String::new(), Prepared::Failed("unreadable", err.to_string())),
                Ok(row) => {
                    let amount = match row.amount {
                        None => Ok(default_amount),
                        Some(coins) => self.config.base_units(coins),
                    };
                    let prepared = match amount {
                        Ok(amount) => Prepared::Ready(TransferRequest::new(&row.address, amount)),
                        Err(err) => Prepared::Failed("invalid_request", err.to_string()),
                    };
                    (line, row.address, prepared)
                }
            })
            .collect();
        info!(requests = prepared.len(), "dispatching batch");

        let engine = self.engine;
        let mut records: Vec<DispatchRecord> = stream::iter(prepared)
            .map(|(line, address, prepared)| async move {
                let request = match prepared {
                    Prepared::Ready(request) => request,
                    Prepared::Failed(status, detail) => {
                        return DispatchRecord {
                            line,
                            address,
                            status,
                            sequence: None,
                            tx_hash: None,
                            detail,
                        };
                    }
                };
                match engine.dispatch(request).await {
                    Ok(handle) => DispatchRecord {
                        line,
                        address,
                        status: "accepted",
                        sequence: Some(handle.sequence),
                        tx_hash: Some(handle.tx_hash.to_string()),
                        detail: String::new(),
                    },
                    Err(err) => DispatchRecord {
                        line,
                        address,
                        status: err.kind(),
                        sequence: match &err {
                            DispatchError::Indeterminate { sequence, .. } => Some(*sequence),
                            _ => None,
                        },
                        tx_hash: None,
                        detail: err.to_string(),
                    },
                }
            })
            .buffer_unordered(self.config.dispatch.max_concurrency.max(1))
            .collect()
            .await;
        records.sort_by_key(|record| record.line);

        let summary = records.iter().fold(BatchSummary::default(), |mut acc, r| {
            if r.status == "accepted" {
                acc.accepted += 1;
            } else {
                acc.failed += 1;
            }
            acc
        });
        print_records(self.output, records.into_iter())?;
        info!(accepted = summary.accepted, failed = summary.failed, "batch done");
        Ok(summary)
    }
}
