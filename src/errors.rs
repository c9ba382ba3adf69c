use thiserror::Error;

use crate::schema::SchemaKind;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("input {0} has no header row")]
    EmptyInput(String),

    #[error("no known schema matches columns [{}]", .columns.join(", "))]
    UnrecognizedSchema { columns: Vec<String> },

    #[error("{kind} schema requires columns missing from {origin}: {}", .missing.join(", "))]
    MissingColumns {
        kind: SchemaKind,
        origin: String,
        missing: Vec<String>,
    },

    #[error("{origin} looks like a {found} export, expected {expected} like the first input")]
    SchemaMismatch {
        origin: String,
        expected: SchemaKind,
        found: SchemaKind,
    },

    #[error("no input files given")]
    NoInput,

    #[error("value overflow while summing {0}")]
    ValueOverflow(&'static str),
}
