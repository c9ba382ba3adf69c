use anyhow::Result;
use csv::StringRecord;
use serde::Serialize;

use crate::{models::Summary, schema::ColumnMap};

/// CSVWrite trait provides a method to write a record to a CSV sink.
pub trait CSVWrite {
    /// Writes a record to the CSV sink.
    ///
    /// # Arguments
    /// * `record` - The record to write, a sequence of fields or a struct.
    ///
    /// # Returns
    /// A Result indicating success or failure.
    fn write_record<T: Serialize>(&mut self, record: &T) -> Result<()>;

    /// Flushes buffered records to the underlying sink.
    fn flush(&mut self) -> Result<()>;
}

/// CSVExport trait provides a method to export a table as CSV.
pub trait CSVExport {
    /// Exports the header row and every data row.
    ///
    /// # Arguments
    /// * `writer` - The writer to write the CSV records to.
    ///
    /// # Returns
    /// A Result indicating success or failure.
    fn export(&self, writer: &mut impl CSVWrite) -> Result<()>;
}

/// Aggregating trait folds source rows into a summary.
pub trait Aggregating {
    /// Adds one source row to its group.
    ///
    /// # Arguments
    /// * `columns` - Role bindings of the table the row comes from.
    /// * `record` - The raw row.
    ///
    /// # Returns
    /// A Result indicating success or failure.
    fn ingest(&mut self, columns: &ColumnMap, record: &StringRecord) -> Result<()>;

    /// Rounds and orders the groups.
    fn finish(self) -> Summary;
}
