use thiserror::Error;

use crate::models::ProcessingStatus;

#[derive(Error, Debug)]
pub enum TallyError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: ProcessingStatus,
        to: ProcessingStatus,
    },

    #[error("Unknown processing status: {0}")]
    UnknownStatus(String),

    #[error("Unknown record type: {0}")]
    UnknownRecordType(String),

    #[error("Unknown field '{field}' for {record_type} records")]
    UnknownField { record_type: String, field: String },

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("No database found at {0}\nRun `tally init` to create one.")]
    NotInitialized(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TallyError>;

/// Field-level failure while slicing a raw line. Captured on the row, never
/// propagated out of a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("required field '{field}' is blank")]
    Missing { field: &'static str },

    #[error("field '{field}' has invalid value '{raw}': {reason}")]
    InvalidField {
        field: &'static str,
        raw: String,
        reason: String,
    },

    #[error("field '{field}' spans bytes {start}..{end} but the line is {line_len} bytes long")]
    OutOfRange {
        field: &'static str,
        start: usize,
        end: usize,
        line_len: usize,
    },

    #[error("business key field '{field}' is empty")]
    MissingKeyField { field: &'static str },
}

impl ExtractionError {
    pub fn field(&self) -> &'static str {
        match self {
            Self::Missing { field }
            | Self::InvalidField { field, .. }
            | Self::OutOfRange { field, .. }
            | Self::MissingKeyField { field } => field,
        }
    }
}
