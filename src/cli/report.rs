use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::cli::inbox::unique_destination;
use crate::db;
use crate::error::Result;

#[derive(Serialize)]
struct RunReport<'a, T: Serialize> {
    command: &'a str,
    generated_at: String,
    #[serde(flatten)]
    result: &'a T,
}

/// Writes one run's result to `<logs_dir>/<command>-report-<YYYYMMDD-HHMMSS>.json`.
/// Runs within the same second get " (1)", " (2)" suffixes.
pub fn write_report<T: Serialize>(logs_dir: &Path, command: &str, result: &T) -> Result<PathBuf> {
    std::fs::create_dir_all(logs_dir)?;
    let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    let path = unique_destination(logs_dir, &format!("{command}-report-{stamp}.json"));
    let report = RunReport {
        command,
        generated_at: db::now(),
        result,
    };
    std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
    info!(path = %path.display(), "wrote run report");
    Ok(path)
}
