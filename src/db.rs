use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;
use crate::record_store;

pub const DB_FILE: &str = "tally.db";

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS source_files (
    id INTEGER PRIMARY KEY,
    filename TEXT NOT NULL,
    checksum TEXT NOT NULL,
    line_count INTEGER NOT NULL DEFAULT 0,
    loaded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_source_files_checksum ON source_files (checksum);

CREATE TABLE IF NOT EXISTS raw_import_rows (
    id INTEGER PRIMARY KEY,
    source_file_id INTEGER NOT NULL,
    line_number INTEGER NOT NULL,
    raw_line BLOB NOT NULL,
    record_type TEXT,
    processing_status TEXT NOT NULL DEFAULT 'pending'
        CHECK (processing_status IN ('pending', 'processing', 'processed', 'error', 'duplicate')),
    error_message TEXT,
    claim_token TEXT,
    claimed_at TEXT,
    processed_at TEXT,
    UNIQUE (source_file_id, line_number),
    FOREIGN KEY (source_file_id) REFERENCES source_files(id)
);

CREATE INDEX IF NOT EXISTS idx_raw_rows_status
    ON raw_import_rows (processing_status, source_file_id, line_number);
CREATE INDEX IF NOT EXISTS idx_raw_rows_claim ON raw_import_rows (claim_token);

CREATE TRIGGER IF NOT EXISTS raw_line_immutable
BEFORE UPDATE OF raw_line ON raw_import_rows
BEGIN
    SELECT RAISE(ABORT, 'raw_line is immutable');
END;
";

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    record_store::create_tables(conn)?;
    Ok(())
}

/// Timestamps are stored as UTC `YYYY-MM-DD HH:MM:SS` so they compare lexically.
pub fn timestamp(at: chrono::DateTime<chrono::Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn now() -> String {
    timestamp(chrono::Utc::now())
}

#[cfg(test)]
pub(crate) fn test_db() -> (tempfile::TempDir, Connection) {
    let dir = tempfile::tempdir().unwrap();
    let conn = get_connection(&dir.path().join(DB_FILE)).unwrap();
    init_db(&conn).unwrap();
    (dir, conn)
}
