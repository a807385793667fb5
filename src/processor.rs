//! The batch processor: claims pending raw rows and advances each one to
//! processed, error or duplicate. One row's failure never stops the batch.

use std::time::Instant;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::classifier::classify;
use crate::dedup;
use crate::error::Result;
use crate::extractor::{extract, ParsedRecord};
use crate::models::{BatchResult, ProcessingStatus, RawImportRow, RowOutcome};
use crate::raw_store;
use crate::record_store::{self, InsertOutcome, RecordSource};

/// Runs one bounded batch. Stale claims are recovered first, then up to
/// `max_batch_size` pending rows are claimed atomically and processed in
/// (file, line) order. Only a failure to recover or claim returns `Err`.
pub fn process_pending(
    conn: &Connection,
    max_batch_size: usize,
    stale_after: chrono::Duration,
) -> Result<BatchResult> {
    let started = Instant::now();
    let recovered = raw_store::recover_stale(conn, stale_after)?;
    let claim = raw_store::claim_pending(conn, max_batch_size)?;

    let mut result = BatchResult {
        claimed: claim.rows.len(),
        recovered,
        ..Default::default()
    };
    for row in &claim.rows {
        result.record(process_row(conn, &claim.token, row));
    }
    result.duration_ms = started.elapsed().as_millis() as u64;

    if result.claimed > 0 || recovered > 0 {
        info!(
            claim = %claim.token,
            claimed = result.claimed,
            processed = result.processed,
            errors = result.errors,
            duplicates = result.duplicates_logged,
            recovered,
            duration_ms = result.duration_ms,
            "batch complete"
        );
    } else {
        debug!("no pending rows");
    }
    Ok(result)
}

#[derive(Debug, Default, Serialize)]
pub struct DrainResult {
    pub batches: usize,
    #[serde(flatten)]
    pub totals: BatchResult,
}

/// Repeats `process_pending` until a batch claims nothing or `max_batches`
/// batches have run.
pub fn drain(
    conn: &Connection,
    max_batch_size: usize,
    max_batches: Option<usize>,
    stale_after: chrono::Duration,
) -> Result<DrainResult> {
    let mut drained = DrainResult::default();
    loop {
        if max_batches.is_some_and(|max| drained.batches >= max) {
            break;
        }
        let batch = process_pending(conn, max_batch_size, stale_after)?;
        let claimed = batch.claimed;
        drained.totals.absorb(batch);
        if claimed == 0 {
            break;
        }
        drained.batches += 1;
    }
    info!(
        batches = drained.batches,
        processed = drained.totals.processed,
        errors = drained.totals.errors,
        duplicates = drained.totals.duplicates_logged,
        "drain finished"
    );
    Ok(drained)
}

fn process_row(conn: &Connection, token: &str, row: &RawImportRow) -> RowOutcome {
    let record_type = classify(&row.raw_line);
    let label = record_type.label();
    if record_type.is_other() {
        warn!(row_id = row.id, line = row.line_number, record_type = %label, "unrecognized record identifier");
    }

    let (status, message) = match extract(&row.raw_line, &record_type) {
        Err(e) => {
            debug!(row_id = row.id, field = e.field(), "extraction failed: {e}");
            let message = e.to_string();
            mark(conn, token, row, ProcessingStatus::Error, &label, Some(&message));
            (ProcessingStatus::Error, Some(message))
        }
        Ok(parsed) => {
            for warning in &parsed.warnings {
                warn!(row_id = row.id, line = row.line_number, record_type = %label, "{warning}");
            }
            match commit(conn, token, row, &parsed, &label) {
                Ok((ProcessingStatus::Processed, _)) => {
                    let message = (!parsed.warnings.is_empty()).then(|| parsed.warnings.join("; "));
                    (ProcessingStatus::Processed, message)
                }
                Ok((status, message)) => (status, message),
                Err(e) => {
                    error!(row_id = row.id, "storage failure: {e}");
                    let message = format!("storage error: {e}");
                    mark(conn, token, row, ProcessingStatus::Error, &label, Some(&message));
                    (ProcessingStatus::Error, Some(message))
                }
            }
        }
    };

    debug!(row_id = row.id, line = row.line_number, record_type = %label, status = %status, "row resolved");
    RowOutcome {
        row_id: row.id,
        record_type: label,
        status,
        message,
    }
}

/// Duplicate check, typed insert and the raw row's outcome in one IMMEDIATE
/// transaction, so two rows sharing a key cannot both be accepted.
fn commit(
    conn: &Connection,
    token: &str,
    row: &RawImportRow,
    parsed: &ParsedRecord,
    label: &str,
) -> Result<(ProcessingStatus, Option<String>)> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let existing = match &parsed.business_key {
        Some(key) => dedup::find_existing(&tx, &parsed.record_type, key)?,
        None => None,
    };
    let inserted = match existing {
        Some(_) => InsertOutcome::Duplicate,
        None => {
            let source = RecordSource {
                source_file_id: row.source_file_id,
                source_row_id: row.id,
                line_number: row.line_number,
                raw_line: &row.raw_line,
            };
            record_store::insert(&tx, parsed, &source)?
        }
    };

    let (status, message) = match inserted {
        InsertOutcome::Inserted(_) => (ProcessingStatus::Processed, None),
        InsertOutcome::Duplicate => {
            let key = parsed.business_key.as_deref().unwrap_or_default();
            let message = dedup::duplicate_message(&parsed.record_type, key, existing.as_ref());
            (ProcessingStatus::Duplicate, Some(message))
        }
    };
    raw_store::complete(&tx, row.id, token, status, label, message.as_deref())?;
    tx.commit()?;
    Ok((status, message))
}

/// Records an error outcome outside any transaction. A failure here is
/// logged; the row stays claimed and stale recovery will return it.
fn mark(
    conn: &Connection,
    token: &str,
    row: &RawImportRow,
    status: ProcessingStatus,
    label: &str,
    message: Option<&str>,
) {
    if let Err(e) = raw_store::complete(conn, row.id, token, status, label, message) {
        error!(row_id = row.id, "could not record row outcome: {e}");
    }
}
