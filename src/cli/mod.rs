pub mod demo;
pub mod drain;
pub mod errors;
pub mod files;
pub mod inbox;
pub mod init;
pub mod layout;
pub mod load;
pub mod process;
pub mod records;
pub mod recover;
pub mod report;
pub mod retry;
pub mod status;

use clap::{Parser, Subcommand};
use rusqlite::Connection;

use crate::db::{get_connection, init_db};
use crate::error::{Result, TallyError};
use crate::settings::Settings;

/// Batch sizes must claim at least one row.
fn parse_batch_size(s: &str) -> std::result::Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("batch size must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

/// The batch size for this run: the flag if given, otherwise the setting.
pub(crate) fn resolve_batch_size(settings: &Settings, flag: Option<usize>) -> Result<usize> {
    match flag.unwrap_or(settings.batch_size) {
        0 => Err(TallyError::Settings("batch_size must be at least 1".to_string())),
        n => Ok(n),
    }
}

/// Opens the configured database, refusing to create one implicitly.
pub(crate) fn open_db(settings: &Settings) -> Result<Connection> {
    let db_path = settings.db_path();
    if !db_path.exists() {
        return Err(TallyError::NotInitialized(db_path.display().to_string()));
    }
    let conn = get_connection(&db_path)?;
    conn.busy_timeout(settings.busy_timeout())?;
    init_db(&conn)?;
    Ok(conn)
}

#[derive(Parser)]
#[command(
    name = "tally",
    version,
    about = "Ingest fixed-width settlement files into typed, queryable records."
)]
pub struct Cli {
    /// Log at debug level (TALLY_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Set up tally: choose a data directory and initialize the database.
    Init {
        /// Path for tally data (default: ~/Documents/tally)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Load settlement files into the raw import queue as pending rows.
    Load {
        /// Files to load
        #[arg(required = true)]
        files: Vec<String>,
        /// Load even if a file with the same checksum was loaded before
        #[arg(long)]
        force: bool,
    },
    /// Load every file waiting in <data_dir>/inbox and move it to processed/.
    /// Writes a JSON report to <data_dir>/logs.
    Inbox {
        /// Load even if a file with the same checksum was loaded before
        #[arg(long)]
        force: bool,
    },
    /// Process one bounded batch of pending rows. Writes a JSON report to
    /// <data_dir>/logs when rows were claimed.
    Process {
        /// Maximum rows to claim (default: batch_size setting)
        #[arg(long = "batch-size", value_parser = parse_batch_size)]
        batch_size: Option<usize>,
        /// Print the batch result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Process batches until no pending rows remain.
    Drain {
        /// Maximum rows to claim per batch (default: batch_size setting)
        #[arg(long = "batch-size", value_parser = parse_batch_size)]
        batch_size: Option<usize>,
        /// Stop after this many batches
        #[arg(long = "max-batches")]
        max_batches: Option<usize>,
        /// Print the totals as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show queue counts by status and record type.
    Status {
        /// Print counts as JSON
        #[arg(long)]
        json: bool,
    },
    /// List rows that failed extraction or storage.
    Errors {
        /// Only rows from this source file id
        #[arg(long)]
        file: Option<i64>,
        /// Maximum rows to show
        #[arg(long, default_value = "50")]
        limit: usize,
    },
    /// Return error rows to pending so the next batch retries them.
    Retry {
        /// Only rows from this source file id
        #[arg(long)]
        file: Option<i64>,
        /// Only this raw row id
        #[arg(long)]
        row: Option<i64>,
    },
    /// Revert stale processing claims left by an interrupted batch.
    Recover {
        /// Claims older than this many minutes are stale (default: stale_after_minutes setting)
        #[arg(long = "stale-minutes")]
        stale_minutes: Option<i64>,
    },
    /// Query stored records of one type.
    Records {
        /// Record type code (DT, BH, P1, P2, G2, E1, DR, AD) or OTHER
        record_type: String,
        /// Only records from this source file id
        #[arg(long)]
        file: Option<i64>,
        /// Only child records of this DT reference number
        #[arg(long)]
        parent: Option<String>,
        /// Business date on or after (YYYY-MM-DD)
        #[arg(long = "from")]
        from_date: Option<String>,
        /// Business date on or before (YYYY-MM-DD)
        #[arg(long = "to")]
        to_date: Option<String>,
        /// Field equality filter, e.g. --where card_type=VS (repeatable)
        #[arg(long = "where")]
        filters: Vec<String>,
        /// Maximum records to return
        #[arg(long, default_value = "100")]
        limit: usize,
        /// Write all fields as CSV to this path ("-" for stdout)
        #[arg(long)]
        csv: Option<String>,
    },
    /// List loaded source files.
    Files,
    /// Print the field map of a record type, or list all types.
    Layout {
        /// Record type code
        record_type: Option<String>,
    },
    /// Write a synthetic settlement file into the inbox to explore tally.
    Demo,
}
