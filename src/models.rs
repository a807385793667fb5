use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::TallyError;

/// Lifecycle of a raw line. `Processing` is a claim held by one batch
/// invocation and is never left behind at rest except by an interrupted run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Processed,
    Error,
    Duplicate,
}

pub const ALL_STATUSES: &[ProcessingStatus] = &[
    ProcessingStatus::Pending,
    ProcessingStatus::Processing,
    ProcessingStatus::Processed,
    ProcessingStatus::Error,
    ProcessingStatus::Duplicate,
];

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Error => "error",
            Self::Duplicate => "duplicate",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Error | Self::Duplicate)
    }

    /// The transition table:
    ///
    /// - pending -> processing (claim)
    /// - processing -> processed | error | duplicate (outcome)
    /// - processing -> pending (stale claim recovery)
    /// - error -> pending (explicit operator retry)
    pub fn can_transition_to(&self, to: ProcessingStatus) -> bool {
        use ProcessingStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Processing, Processed)
                | (Processing, Error)
                | (Processing, Duplicate)
                | (Processing, Pending)
                | (Error, Pending)
        )
    }

    pub fn transition(self, to: ProcessingStatus) -> Result<ProcessingStatus, TallyError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(TallyError::InvalidTransition { from: self, to })
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_STATUSES
            .iter()
            .find(|st| st.as_str() == s)
            .copied()
            .ok_or_else(|| TallyError::UnknownStatus(s.to_string()))
    }
}

/// One physical line of an uploaded file, byte for byte.
#[derive(Debug, Clone)]
pub struct RawImportRow {
    pub id: i64,
    pub source_file_id: i64,
    pub line_number: i64,
    pub raw_line: Vec<u8>,
    pub record_type: Option<String>,
    pub processing_status: ProcessingStatus,
    pub error_message: Option<String>,
    pub claimed_at: Option<String>,
    pub processed_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub id: i64,
    pub filename: String,
    pub checksum: String,
    pub line_count: i64,
    pub loaded_at: String,
}

/// What happened to one claimed row.
#[derive(Debug, Clone, Serialize)]
pub struct RowOutcome {
    pub row_id: i64,
    pub record_type: String,
    pub status: ProcessingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Summary of one batch invocation, consumed by operators and monitoring.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub claimed: usize,
    pub processed: usize,
    pub errors: usize,
    pub duplicates_logged: usize,
    /// Stale claims reverted to pending before this batch claimed.
    pub recovered: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outcomes: Vec<RowOutcome>,
}

impl BatchResult {
    pub fn record(&mut self, outcome: RowOutcome) {
        match outcome.status {
            ProcessingStatus::Processed => self.processed += 1,
            ProcessingStatus::Duplicate => self.duplicates_logged += 1,
            _ => self.errors += 1,
        }
        self.outcomes.push(outcome);
    }

    /// Every claimed row ended in exactly one terminal bucket.
    pub fn is_balanced(&self) -> bool {
        self.processed + self.errors + self.duplicates_logged == self.claimed
    }

    pub fn absorb(&mut self, other: BatchResult) {
        self.claimed += other.claimed;
        self.processed += other.processed;
        self.errors += other.errors;
        self.duplicates_logged += other.duplicates_logged;
        self.recovered += other.recovered;
        self.duration_ms += other.duration_ms;
        self.outcomes.extend(other.outcomes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_transitions() {
        use ProcessingStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Processed));
        assert!(Processing.can_transition_to(Error));
        assert!(Processing.can_transition_to(Duplicate));
        assert!(Processing.can_transition_to(Pending));
        assert!(Error.can_transition_to(Pending));
    }

    #[test]
    fn test_rejected_transitions() {
        use ProcessingStatus::*;
        assert!(!Processed.can_transition_to(Pending));
        assert!(!Duplicate.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Processed));
        assert!(!Processed.can_transition_to(Error));
        let err = Processed.transition(Pending).unwrap_err();
        assert!(matches!(err, TallyError::InvalidTransition { .. }));
        assert_eq!(err.to_string(), "Invalid status transition: processed -> pending");
    }

    #[test]
    fn test_status_roundtrip_through_str() {
        for st in ALL_STATUSES {
            assert_eq!(st.as_str().parse::<ProcessingStatus>().unwrap(), *st);
        }
        assert!("done".parse::<ProcessingStatus>().is_err());
    }

    #[test]
    fn test_batch_result_buckets() {
        let mut result = BatchResult {
            claimed: 3,
            ..Default::default()
        };
        for status in [
            ProcessingStatus::Processed,
            ProcessingStatus::Error,
            ProcessingStatus::Duplicate,
        ] {
            result.record(RowOutcome {
                row_id: 1,
                record_type: "DT".to_string(),
                status,
                message: None,
            });
        }
        assert_eq!((result.processed, result.errors, result.duplicates_logged), (1, 1, 1));
        assert!(result.is_balanced());
    }
}
