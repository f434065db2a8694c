use std::io::Write;

use csv::Writer;
use serde::Serialize;

use crate::sequencer::Sequence;

/// Result of one batch row.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct DispatchRecord {
    pub line: u64,
    pub address: String,
    pub status: &'static str,
    pub sequence: Option<Sequence>,
    pub tx_hash: Option<String>,
    pub detail: String,
}

pub fn print_records<W>(
    output: &mut W,
    records: impl Iterator<Item = DispatchRecord>,
) -> anyhow::Result<()>
where
    W: Write,
{
    let mut writer = Writer::from_writer(output);
    for record in records {
        if let Err(err) = writer.serialize(record) {
            anyhow::bail!("Failed to write to CSV: {err}")
        }
    }
    // Ensure all data is flushed to the output
    if let Err(err) = writer.flush() {
        anyhow::bail!("Failed to flush CSV writer: {err}")
    }
    Ok(())
}
