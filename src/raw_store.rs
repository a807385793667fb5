//! The raw import store: every physical line of an uploaded file, queued with
//! a processing status until the batch processor resolves it.

use std::path::Path;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db;
use crate::error::{Result, TallyError};
use crate::models::{ProcessingStatus, RawImportRow, SourceFile};

const ROW_COLUMNS: &str = "id, source_file_id, line_number, raw_line, record_type, processing_status, \
                           error_message, claimed_at, processed_at";

fn row_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawImportRow> {
    let status: String = row.get(5)?;
    let processing_status = status
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
    Ok(RawImportRow {
        id: row.get(0)?,
        source_file_id: row.get(1)?,
        line_number: row.get(2)?,
        raw_line: row.get(3)?,
        record_type: row.get(4)?,
        processing_status,
        error_message: row.get(6)?,
        claimed_at: row.get(7)?,
        processed_at: row.get(8)?,
    })
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

pub struct LoadResult {
    pub source_file_id: Option<i64>,
    pub rows: usize,
    pub skipped_blank: usize,
    pub duplicate_file: bool,
}

pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Splits file content into physical lines, dropping `\r` line endings.
/// Lines stay raw bytes so field offsets match the file exactly.
pub fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    let mut lines: Vec<&[u8]> = data
        .split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .collect();
    if data.ends_with(b"\n") {
        lines.pop();
    }
    lines
}

pub fn load_file(conn: &Connection, file_path: &Path, force: bool) -> Result<LoadResult> {
    let filename = file_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    load_file_as(conn, file_path, &filename, force)
}

/// Like `load_file`, but records the file under `filename`. Used for inbox
/// files read from their claimed name.
pub fn load_file_as(conn: &Connection, file_path: &Path, filename: &str, force: bool) -> Result<LoadResult> {
    let data = std::fs::read(file_path)?;
    let checksum = compute_checksum(&data);
    store_file(conn, filename, &checksum, split_lines(&data), force)
}

/// Bulk-inserts lines as pending rows whether or not the checksum is known.
pub fn load_lines<L: AsRef<[u8]>>(
    conn: &Connection,
    filename: &str,
    checksum: &str,
    lines: impl IntoIterator<Item = L>,
) -> Result<LoadResult> {
    store_file(conn, filename, checksum, lines, true)
}

/// The checksum check and the inserts share one IMMEDIATE transaction, so two
/// loaders racing on the same file cannot both register it. Whitespace-only
/// lines are skipped but keep their place in the line numbering.
fn store_file<L: AsRef<[u8]>>(
    conn: &Connection,
    filename: &str,
    checksum: &str,
    lines: impl IntoIterator<Item = L>,
    force: bool,
) -> Result<LoadResult> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    if !force {
        let known = tx
            .prepare("SELECT 1 FROM source_files WHERE checksum = ?1")?
            .exists([checksum])?;
        if known {
            info!(file = %filename, "file already loaded (duplicate checksum)");
            return Ok(LoadResult {
                source_file_id: None,
                rows: 0,
                skipped_blank: 0,
                duplicate_file: true,
            });
        }
    }

    tx.execute(
        "INSERT INTO source_files (filename, checksum, loaded_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![filename, checksum, db::now()],
    )?;
    let source_file_id = tx.last_insert_rowid();

    let mut rows = 0usize;
    let mut skipped_blank = 0usize;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO raw_import_rows (source_file_id, line_number, raw_line, processing_status) \
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (idx, line) in lines.into_iter().enumerate() {
            let line = line.as_ref();
            if line.iter().all(u8::is_ascii_whitespace) {
                skipped_blank += 1;
                continue;
            }
            stmt.execute(rusqlite::params![
                source_file_id,
                idx as i64 + 1,
                line,
                ProcessingStatus::Pending.as_str()
            ])?;
            rows += 1;
        }
    }
    tx.execute(
        "UPDATE source_files SET line_count = ?1 WHERE id = ?2",
        rusqlite::params![rows as i64, source_file_id],
    )?;
    tx.commit()?;

    info!(file = %filename, source_file_id, rows, skipped_blank, "loaded file into raw import store");
    Ok(LoadResult {
        source_file_id: Some(source_file_id),
        rows,
        skipped_blank,
        duplicate_file: false,
    })
}

// ---------------------------------------------------------------------------
// Claiming and outcomes
// ---------------------------------------------------------------------------

pub struct Claim {
    pub token: String,
    pub rows: Vec<RawImportRow>,
}

/// Atomically moves up to `max` pending rows to `processing` under a fresh
/// claim token, oldest file and lowest line first.
pub fn claim_pending(conn: &Connection, max: usize) -> Result<Claim> {
    let from = ProcessingStatus::Pending;
    let to = from.transition(ProcessingStatus::Processing)?;
    let token = Uuid::new_v4().to_string();

    let claimed = conn.execute(
        "UPDATE raw_import_rows \
         SET processing_status = ?1, claim_token = ?2, claimed_at = ?3 \
         WHERE processing_status = ?4 AND id IN ( \
             SELECT id FROM raw_import_rows WHERE processing_status = ?4 \
             ORDER BY source_file_id, line_number LIMIT ?5)",
        rusqlite::params![to.as_str(), token, db::now(), from.as_str(), max as i64],
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {ROW_COLUMNS} FROM raw_import_rows \
         WHERE claim_token = ?1 AND processing_status = ?2 \
         ORDER BY source_file_id, line_number"
    ))?;
    let rows = stmt
        .query_map(rusqlite::params![token, to.as_str()], row_from_sql)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    debug!(claim = %token, claimed, "claimed pending rows");
    Ok(Claim { token, rows })
}

/// Resolves a claimed row to a terminal status. Fails when the row is no
/// longer held by `token` (for example after stale-claim recovery).
pub fn complete(
    conn: &Connection,
    row_id: i64,
    token: &str,
    status: ProcessingStatus,
    record_type: &str,
    message: Option<&str>,
) -> Result<()> {
    let from = ProcessingStatus::Processing;
    if !status.is_terminal() {
        return Err(TallyError::InvalidTransition { from, to: status });
    }
    let to = from.transition(status)?;
    let changed = conn.execute(
        "UPDATE raw_import_rows \
         SET processing_status = ?1, record_type = ?2, error_message = ?3, processed_at = ?4 \
         WHERE id = ?5 AND processing_status = ?6 AND claim_token = ?7",
        rusqlite::params![to.as_str(), record_type, message, db::now(), row_id, from.as_str(), token],
    )?;
    if changed == 0 {
        return Err(TallyError::Other(format!(
            "row {row_id} is no longer claimed by batch {token}"
        )));
    }
    Ok(())
}

/// Reverts `processing` rows whose claim is older than `older_than` back to
/// `pending`, so an interrupted batch never strands rows.
pub fn recover_stale(conn: &Connection, older_than: chrono::Duration) -> Result<usize> {
    let from = ProcessingStatus::Processing;
    let to = from.transition(ProcessingStatus::Pending)?;
    let cutoff = db::timestamp(chrono::Utc::now() - older_than);
    let reverted = conn.execute(
        "UPDATE raw_import_rows \
         SET processing_status = ?1, claim_token = NULL, claimed_at = NULL \
         WHERE processing_status = ?2 AND claimed_at < ?3",
        rusqlite::params![to.as_str(), from.as_str(), cutoff],
    )?;
    if reverted > 0 {
        warn!(reverted, cutoff = %cutoff, "reverted stale claims to pending");
    }
    Ok(reverted)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RowFilter {
    pub source_file_id: Option<i64>,
    pub row_id: Option<i64>,
}

/// Explicit operator retry: `error` rows go back to `pending`.
pub fn reset_errors(conn: &Connection, filter: RowFilter) -> Result<usize> {
    let from = ProcessingStatus::Error;
    let to = from.transition(ProcessingStatus::Pending)?;
    let reset = conn.execute(
        "UPDATE raw_import_rows \
         SET processing_status = ?1, error_message = NULL, record_type = NULL, \
             claim_token = NULL, claimed_at = NULL, processed_at = NULL \
         WHERE processing_status = ?2 \
           AND (?3 IS NULL OR source_file_id = ?3) \
           AND (?4 IS NULL OR id = ?4)",
        rusqlite::params![to.as_str(), from.as_str(), filter.source_file_id, filter.row_id],
    )?;
    info!(reset, "reset error rows to pending");
    Ok(reset)
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

pub fn get_row(conn: &Connection, id: i64) -> Result<Option<RawImportRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {ROW_COLUMNS} FROM raw_import_rows WHERE id = ?1"))?;
    Ok(stmt.query_row([id], row_from_sql).optional()?)
}

pub fn list_rows(
    conn: &Connection,
    status: Option<ProcessingStatus>,
    filter: RowFilter,
    limit: usize,
) -> Result<Vec<RawImportRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ROW_COLUMNS} FROM raw_import_rows \
         WHERE (?1 IS NULL OR processing_status = ?1) \
           AND (?2 IS NULL OR source_file_id = ?2) \
           AND (?3 IS NULL OR id = ?3) \
         ORDER BY source_file_id, line_number LIMIT ?4"
    ))?;
    let rows = stmt
        .query_map(
            rusqlite::params![
                status.map(|s| s.as_str()),
                filter.source_file_id,
                filter.row_id,
                limit as i64
            ],
            row_from_sql,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_by_status(conn: &Connection) -> Result<Vec<(ProcessingStatus, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT processing_status, count(*) FROM raw_import_rows GROUP BY processing_status",
    )?;
    let raw: Vec<(String, i64)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let mut counts = Vec::new();
    for status in crate::models::ALL_STATUSES {
        let n = raw
            .iter()
            .find(|(s, _)| s == status.as_str())
            .map(|(_, n)| *n)
            .unwrap_or(0);
        counts.push((*status, n));
    }
    Ok(counts)
}

pub fn count_pending(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT count(*) FROM raw_import_rows WHERE processing_status = ?1",
        [ProcessingStatus::Pending.as_str()],
        |r| r.get(0),
    )?)
}

/// Row counts per classified record type and status.
pub fn count_by_type(conn: &Connection) -> Result<Vec<(String, ProcessingStatus, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT coalesce(record_type, '-'), processing_status, count(*) FROM raw_import_rows \
         GROUP BY 1, 2 ORDER BY 1, 2",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let status: String = row.get(1)?;
            let status = status
                .parse()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
            Ok((row.get(0)?, status, row.get(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_files(conn: &Connection) -> Result<Vec<SourceFile>> {
    let mut stmt = conn.prepare(
        "SELECT id, filename, checksum, line_count, loaded_at FROM source_files ORDER BY id",
    )?;
    let files = stmt
        .query_map([], |row| {
            Ok(SourceFile {
                id: row.get(0)?,
                filename: row.get(1)?,
                checksum: row.get(2)?,
                line_count: row.get(3)?,
                loaded_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    fn lines(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("line {i}")).collect()
    }

    #[test]
    fn test_split_lines_handles_crlf_and_trailing_newline() {
        let lines = split_lines(b"one\r\ntwo\r\n\r\nthree\n");
        assert_eq!(lines, vec![&b"one"[..], &b"two"[..], &b""[..], &b"three"[..]]);
        assert_eq!(split_lines(b"solo"), vec![&b"solo"[..]]);
    }

    #[test]
    fn test_load_lines_inserts_pending_rows() {
        let (_dir, conn) = test_db();
        let result = load_lines(&conn, "a.txt", "abc", lines(3)).unwrap();
        assert_eq!(result.rows, 3);
        let rows = list_rows(&conn, Some(ProcessingStatus::Pending), RowFilter::default(), 10).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].line_number, 1);
        assert_eq!(rows[2].raw_line, b"line 3");
        assert!(rows.iter().all(|r| r.record_type.is_none()));
    }

    #[test]
    fn test_blank_lines_skipped_but_numbering_kept() {
        let (_dir, conn) = test_db();
        let input = vec!["a".to_string(), "   ".to_string(), "b".to_string()];
        let result = load_lines(&conn, "a.txt", "abc", input).unwrap();
        assert_eq!((result.rows, result.skipped_blank), (2, 1));
        let rows = list_rows(&conn, None, RowFilter::default(), 10).unwrap();
        assert_eq!(rows[1].line_number, 3);
    }

    #[test]
    fn test_load_file_detects_duplicate_checksum() {
        let (dir, conn) = test_db();
        let path = dir.path().join("settle.txt");
        std::fs::write(&path, "x\ny\n").unwrap();
        let first = load_file(&conn, &path, false).unwrap();
        assert!(!first.duplicate_file);
        assert_eq!(first.rows, 2);
        let second = load_file(&conn, &path, false).unwrap();
        assert!(second.duplicate_file);
        assert_eq!(second.rows, 0);
        let forced = load_file(&conn, &path, true).unwrap();
        assert_eq!(forced.rows, 2);
        assert_eq!(list_files(&conn).unwrap().len(), 2);
    }

    #[test]
    fn test_racing_loaders_register_a_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join(db::DB_FILE);
        {
            let conn = db::get_connection(&db_path).unwrap();
            db::init_db(&conn).unwrap();
        }
        let file = dir.path().join("settle.txt");
        std::fs::write(&file, "a\nb\nc\n").unwrap();

        let loaders: Vec<_> = (0..4)
            .map(|_| {
                let (db_path, file) = (db_path.clone(), file.clone());
                std::thread::spawn(move || {
                    let conn = db::get_connection(&db_path).unwrap();
                    load_file(&conn, &file, false).unwrap()
                })
            })
            .collect();
        let results: Vec<LoadResult> = loaders.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| !r.duplicate_file).count(), 1);

        let conn = db::get_connection(&db_path).unwrap();
        assert_eq!(list_files(&conn).unwrap().len(), 1);
        assert_eq!(count_pending(&conn).unwrap(), 3);
    }

    #[test]
    fn test_load_file_keeps_non_utf8_bytes() {
        let (dir, conn) = test_db();
        let path = dir.path().join("latin1.txt");
        std::fs::write(&path, b"caf\xe9 12\r\nnext\n").unwrap();
        load_file(&conn, &path, false).unwrap();
        let rows = list_rows(&conn, None, RowFilter::default(), 10).unwrap();
        assert_eq!(rows[0].raw_line, b"caf\xe9 12");
        assert_eq!(rows[0].raw_line.len(), 8);
        assert_eq!(rows[1].raw_line, b"next");
    }

    #[test]
    fn test_load_file_as_records_given_name() {
        let (dir, conn) = test_db();
        let path = dir.path().join("settle.txt.loading");
        std::fs::write(&path, "x\n").unwrap();
        load_file_as(&conn, &path, "settle.txt", false).unwrap();
        assert_eq!(list_files(&conn).unwrap()[0].filename, "settle.txt");
    }

    #[test]
    fn test_claim_respects_limit_and_order() {
        let (_dir, conn) = test_db();
        load_lines(&conn, "b.txt", "b", lines(3)).unwrap();
        load_lines(&conn, "a.txt", "a", lines(3)).unwrap();
        let claim = claim_pending(&conn, 4).unwrap();
        let order: Vec<(i64, i64)> = claim.rows.iter().map(|r| (r.source_file_id, r.line_number)).collect();
        assert_eq!(order, vec![(1, 1), (1, 2), (1, 3), (2, 1)]);
        assert!(claim
            .rows
            .iter()
            .all(|r| r.processing_status == ProcessingStatus::Processing));
        assert_eq!(count_pending(&conn).unwrap(), 2);
    }

    #[test]
    fn test_second_claim_gets_remaining_rows_only() {
        let (_dir, conn) = test_db();
        load_lines(&conn, "a.txt", "a", lines(5)).unwrap();
        let first = claim_pending(&conn, 3).unwrap();
        let second = claim_pending(&conn, 3).unwrap();
        assert_eq!(first.rows.len(), 3);
        assert_eq!(second.rows.len(), 2);
        for row in &second.rows {
            assert!(first.rows.iter().all(|r| r.id != row.id));
        }
        assert!(claim_pending(&conn, 3).unwrap().rows.is_empty());
    }

    #[test]
    fn test_complete_requires_matching_claim() {
        let (_dir, conn) = test_db();
        load_lines(&conn, "a.txt", "a", lines(1)).unwrap();
        let claim = claim_pending(&conn, 1).unwrap();
        let id = claim.rows[0].id;
        assert!(complete(&conn, id, "other-token", ProcessingStatus::Processed, "DT", None).is_err());
        complete(&conn, id, &claim.token, ProcessingStatus::Error, "DT", Some("bad amount")).unwrap();
        let row = get_row(&conn, id).unwrap().unwrap();
        assert_eq!(row.processing_status, ProcessingStatus::Error);
        assert_eq!(row.error_message.as_deref(), Some("bad amount"));
        assert!(row.processed_at.is_some());
        // Already terminal: a second outcome is rejected.
        assert!(complete(&conn, id, &claim.token, ProcessingStatus::Processed, "DT", None).is_err());
    }

    #[test]
    fn test_complete_rejects_non_terminal_status() {
        let (_dir, conn) = test_db();
        load_lines(&conn, "a.txt", "a", lines(1)).unwrap();
        let claim = claim_pending(&conn, 1).unwrap();
        let err = complete(&conn, claim.rows[0].id, &claim.token, ProcessingStatus::Pending, "DT", None)
            .unwrap_err();
        assert!(matches!(err, TallyError::InvalidTransition { .. }));
    }

    #[test]
    fn test_recover_stale_reverts_old_claims_only() {
        let (_dir, conn) = test_db();
        load_lines(&conn, "a.txt", "a", lines(2)).unwrap();
        let claim = claim_pending(&conn, 2).unwrap();
        conn.execute(
            "UPDATE raw_import_rows SET claimed_at = '2000-01-01 00:00:00' WHERE id = ?1",
            [claim.rows[0].id],
        )
        .unwrap();
        let reverted = recover_stale(&conn, chrono::Duration::minutes(30)).unwrap();
        assert_eq!(reverted, 1);
        let row = get_row(&conn, claim.rows[0].id).unwrap().unwrap();
        assert_eq!(row.processing_status, ProcessingStatus::Pending);
        assert!(row.claimed_at.is_none());
        let fresh = get_row(&conn, claim.rows[1].id).unwrap().unwrap();
        assert_eq!(fresh.processing_status, ProcessingStatus::Processing);
    }

    #[test]
    fn test_reset_errors_by_file() {
        let (_dir, conn) = test_db();
        load_lines(&conn, "a.txt", "a", lines(1)).unwrap();
        load_lines(&conn, "b.txt", "b", lines(1)).unwrap();
        let claim = claim_pending(&conn, 2).unwrap();
        for row in &claim.rows {
            complete(&conn, row.id, &claim.token, ProcessingStatus::Error, "DT", Some("x")).unwrap();
        }
        let reset = reset_errors(
            &conn,
            RowFilter {
                source_file_id: Some(2),
                row_id: None,
            },
        )
        .unwrap();
        assert_eq!(reset, 1);
        let counts = count_by_status(&conn).unwrap();
        assert!(counts.contains(&(ProcessingStatus::Pending, 1)));
        assert!(counts.contains(&(ProcessingStatus::Error, 1)));
        let row = list_rows(&conn, Some(ProcessingStatus::Pending), RowFilter::default(), 10).unwrap();
        assert_eq!(row[0].error_message, None);
    }

    #[test]
    fn test_reset_errors_leaves_processed_rows() {
        let (_dir, conn) = test_db();
        load_lines(&conn, "a.txt", "a", lines(1)).unwrap();
        let claim = claim_pending(&conn, 1).unwrap();
        complete(&conn, claim.rows[0].id, &claim.token, ProcessingStatus::Processed, "DT", None).unwrap();
        assert_eq!(reset_errors(&conn, RowFilter::default()).unwrap(), 0);
        let row = get_row(&conn, claim.rows[0].id).unwrap().unwrap();
        assert_eq!(row.processing_status, ProcessingStatus::Processed);
    }
}
