use std::io::Read;

use csv::{DeserializeRecordsIntoIter, Trim};
use rust_decimal::Decimal;
use serde::Deserialize;

/// One requested transfer. `amount` is in whole coins; an empty cell means
/// the configured default.
#[derive(Debug, Deserialize)]
pub struct TransferRow {
    pub address: String,
    pub amount: Option<Decimal>,
}

/// Parses a transfer list in CSV format with an `address,amount` header.
/// Yields the input line of every row together with the parse result.
pub struct CsvTransferParser<R> {
    iter: DeserializeRecordsIntoIter<R, TransferRow>,
}

impl<R> CsvTransferParser<R>
where
    R: Read,
{
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(source);

        Self {
            iter: reader.into_deserialize(),
        }
    }
}

impl<R> Iterator for CsvTransferParser<R>
where
    R: Read,
{
    type Item = (u64, Result<TransferRow, csv::Error>);

    fn next(&mut self) -> Option<Self::Item> {
        let curr_line = self.iter.reader().position().line();
        self.iter.next().map(|row| (curr_line, row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rows() {
        let input = "address, amount\n0xaa, 1.5\n0xbb,\n0xcc\n0xdd, lots\n";
        let rows: Vec<_> = CsvTransferParser::new(input.as_bytes()).collect();
        assert_eq!(rows.len(), 4);

        let (line, first) = &rows[0];
        let first = first.as_ref().unwrap();
        assert_eq!(*line, 2);
        assert_eq!(first.address, "0xaa");
        assert_eq!(first.amount, Some(Decimal::new(15, 1)));

        assert_eq!(rows[1].1.as_ref().unwrap().amount, None);
        assert_eq!(rows[2].1.as_ref().unwrap().amount, None);
        assert!(rows[3].1.is_err());
    }
}
