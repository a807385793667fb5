use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use colored::Colorize;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cli::open_db;
use crate::cli::report::write_report;
use crate::error::{Result, TallyError};
use crate::raw_store::load_file_as;
use crate::settings::Settings;

/// Suffix an inbox file carries while one run is loading it.
pub const CLAIM_SUFFIX: &str = ".loading";

/// A free name in `dir` for `file_name`, adding " (1)", " (2)", ... before
/// the extension when the name is taken.
pub fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
        _ => (file_name, String::new()),
    };
    let mut n = 1;
    loop {
        let candidate = dir.join(format!("{stem} ({n}){ext}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxStatus {
    Loaded,
    Duplicate,
    /// Another run claimed the file first.
    Skipped,
    Failed,
}

#[derive(Debug, Serialize)]
pub struct InboxFile {
    pub name: String,
    pub status: InboxStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file_id: Option<i64>,
    pub rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moved_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct InboxResult {
    pub loaded: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub failed: usize,
    pub rows: usize,
    /// Abandoned claims renamed back before scanning.
    pub restored: usize,
    pub files: Vec<InboxFile>,
}

impl InboxResult {
    fn push(&mut self, file: InboxFile) {
        match file.status {
            InboxStatus::Loaded => {
                self.loaded += 1;
                self.rows += file.rows;
            }
            InboxStatus::Duplicate => self.duplicates += 1,
            InboxStatus::Skipped => self.skipped += 1,
            InboxStatus::Failed => self.failed += 1,
        }
        self.files.push(file);
    }
}

fn claimed_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(CLAIM_SUFFIX);
    PathBuf::from(name)
}

/// Takes ownership of an inbox file by renaming it to its claimed name.
/// Returns `None` when another run already took it.
fn claim(path: &Path) -> Result<Option<PathBuf>> {
    let claimed = claimed_path(path);
    if claimed.exists() {
        return Ok(None);
    }
    match std::fs::rename(path, &claimed) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    // Rename keeps the upload's mtime; the claim's age starts now.
    let touched = std::fs::File::options()
        .write(true)
        .open(&claimed)
        .and_then(|f| f.set_modified(SystemTime::now()));
    if let Err(e) = touched {
        warn!(file = %claimed.display(), "could not stamp claim time: {e}");
    }
    Ok(Some(claimed))
}

fn unclaim(claimed: &Path, original: &Path) {
    if let Err(e) = std::fs::rename(claimed, original) {
        error!(file = %claimed.display(), "could not release claim: {e}");
    }
}

/// Renames claims older than `stale_after` back to their inbox names so an
/// interrupted run never strands a file.
pub fn restore_stale_claims(inbox: &Path, stale_after: Duration) -> Result<usize> {
    let mut restored = 0;
    for entry in std::fs::read_dir(inbox)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(original) = name.strip_suffix(CLAIM_SUFFIX) else {
            continue;
        };
        let age = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok());
        if !age.is_some_and(|age| age > stale_after) {
            continue;
        }
        let original = inbox.join(original);
        if original.exists() {
            continue;
        }
        match std::fs::rename(&path, &original) {
            Ok(()) => {
                warn!(file = %original.display(), "restored abandoned inbox claim");
                restored += 1;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(restored)
}

/// Loads every unclaimed file in `inbox` and moves it to `processed`. Each
/// file is claimed by rename first, so concurrent runs never load the same
/// file. A file that fails to load is released and the run moves on.
pub fn load_inbox(
    conn: &Connection,
    inbox: &Path,
    processed: &Path,
    force: bool,
    stale_after: Duration,
) -> Result<InboxResult> {
    let mut result = InboxResult {
        restored: restore_stale_claims(inbox, stale_after)?,
        ..Default::default()
    };

    let mut paths: Vec<PathBuf> = std::fs::read_dir(inbox)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with('.') && !n.ends_with(CLAIM_SUFFIX))
        })
        .collect();
    paths.sort();

    for path in &paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut file = InboxFile {
            name: name.clone(),
            status: InboxStatus::Skipped,
            source_file_id: None,
            rows: 0,
            moved_to: None,
            message: None,
        };

        let Some(claimed) = claim(path)? else {
            debug!(file = %name, "already claimed by another run");
            result.push(file);
            continue;
        };

        let loaded = match load_file_as(conn, &claimed, &name, force) {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(file = %name, "load failed: {e}");
                unclaim(&claimed, path);
                file.status = InboxStatus::Failed;
                file.message = Some(e.to_string());
                result.push(file);
                continue;
            }
        };
        file.status = if loaded.duplicate_file {
            InboxStatus::Duplicate
        } else {
            InboxStatus::Loaded
        };
        file.source_file_id = loaded.source_file_id;
        file.rows = loaded.rows;

        let destination = unique_destination(processed, &name);
        match std::fs::rename(&claimed, &destination) {
            Ok(()) => {
                info!(file = %name, to = %destination.display(), "moved file out of inbox");
                file.moved_to = Some(destination.display().to_string());
            }
            Err(e) => {
                // Loaded already; a later run restores the claim and sees the checksum.
                warn!(file = %name, "could not move loaded file: {e}");
                file.message = Some(format!("not moved: {e}"));
            }
        }
        result.push(file);
    }
    Ok(result)
}

pub fn run(settings: &Settings, force: bool) -> Result<()> {
    let conn = open_db(settings)?;
    let inbox = settings.inbox_dir();
    let processed = settings.processed_dir();
    std::fs::create_dir_all(&inbox)?;
    std::fs::create_dir_all(&processed)?;

    let stale_after = settings.stale_after().to_std().unwrap_or_default();
    let result = load_inbox(&conn, &inbox, &processed, force, stale_after)?;

    if result.files.is_empty() {
        println!("Inbox is empty: {}", inbox.display());
        return Ok(());
    }
    if result.restored > 0 {
        println!("{}", format!("Restored {} abandoned claim(s).", result.restored).yellow());
    }
    for file in &result.files {
        match file.status {
            InboxStatus::Loaded => println!("{}: {} rows pending", file.name, file.rows),
            InboxStatus::Duplicate => {
                println!("{}: {}", file.name, "already loaded (duplicate checksum)".yellow())
            }
            InboxStatus::Skipped => {
                println!("{}: {}", file.name, "skipped (claimed by another run)".yellow())
            }
            InboxStatus::Failed => println!(
                "{}: {}",
                file.name,
                file.message.as_deref().unwrap_or("failed").red()
            ),
        }
    }
    println!(
        "{} file(s) loaded, {} rows pending. Run `tally process` or `tally drain`.",
        result.loaded, result.rows
    );

    let report = write_report(&settings.logs_dir(), "inbox", &result)?;
    println!("{}", format!("Report saved: {}", report.display()).dimmed());

    if result.failed > 0 {
        return Err(TallyError::Other(format!(
            "{} file(s) failed to load and were left in the inbox",
            result.failed
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::raw_store::{count_pending, list_files};

    fn dirs(root: &Path) -> (PathBuf, PathBuf) {
        let inbox = root.join("inbox");
        let processed = root.join("processed");
        std::fs::create_dir_all(&inbox).unwrap();
        std::fs::create_dir_all(&processed).unwrap();
        (inbox, processed)
    }

    const STALE: Duration = Duration::from_secs(30 * 60);

    #[test]
    fn test_unique_destination_adds_suffix() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(unique_destination(dir.path(), "a.txt"), dir.path().join("a.txt"));
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        assert_eq!(unique_destination(dir.path(), "a.txt"), dir.path().join("a (1).txt"));
        std::fs::write(dir.path().join("a (1).txt"), "").unwrap();
        assert_eq!(unique_destination(dir.path(), "a.txt"), dir.path().join("a (2).txt"));
    }

    #[test]
    fn test_unique_destination_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("SETTLE"), "").unwrap();
        assert_eq!(unique_destination(dir.path(), "SETTLE"), dir.path().join("SETTLE (1)"));
    }

    #[test]
    fn test_load_inbox_moves_files_and_records_original_names() {
        let (dir, conn) = test_db();
        let (inbox, processed) = dirs(dir.path());
        std::fs::write(inbox.join("a.txt"), "one\ntwo\n").unwrap();
        std::fs::write(inbox.join("b.txt"), "three\n").unwrap();

        let result = load_inbox(&conn, &inbox, &processed, false, STALE).unwrap();
        assert_eq!((result.loaded, result.rows, result.failed), (2, 3, 0));
        assert!(processed.join("a.txt").exists());
        assert!(processed.join("b.txt").exists());
        assert_eq!(std::fs::read_dir(&inbox).unwrap().count(), 0);
        let names: Vec<String> = list_files(&conn).unwrap().into_iter().map(|f| f.filename).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_claimed_files_are_left_to_their_owner() {
        let (dir, conn) = test_db();
        let (inbox, processed) = dirs(dir.path());
        std::fs::write(inbox.join("a.txt.loading"), "one\n").unwrap();

        let result = load_inbox(&conn, &inbox, &processed, false, STALE).unwrap();
        assert!(result.files.is_empty());
        assert!(inbox.join("a.txt.loading").exists());
        assert_eq!(count_pending(&conn).unwrap(), 0);
    }

    #[test]
    fn test_claim_loses_to_an_earlier_claim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "one\n").unwrap();
        let first = claim(&path).unwrap();
        assert_eq!(first, Some(dir.path().join("a.txt.loading")));
        assert_eq!(claim(&path).unwrap(), None);
    }

    #[test]
    fn test_stale_claims_are_restored_and_loaded() {
        let (dir, conn) = test_db();
        let (inbox, processed) = dirs(dir.path());
        let abandoned = inbox.join("a.txt.loading");
        std::fs::write(&abandoned, "one\n").unwrap();
        let long_ago = SystemTime::now() - Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(&abandoned)
            .unwrap()
            .set_modified(long_ago)
            .unwrap();

        let result = load_inbox(&conn, &inbox, &processed, false, STALE).unwrap();
        assert_eq!((result.restored, result.loaded), (1, 1));
        assert!(processed.join("a.txt").exists());
        assert_eq!(list_files(&conn).unwrap()[0].filename, "a.txt");
    }

    #[test]
    fn test_duplicate_file_is_moved_without_rows() {
        let (dir, conn) = test_db();
        let (inbox, processed) = dirs(dir.path());
        std::fs::write(inbox.join("a.txt"), "one\n").unwrap();
        load_inbox(&conn, &inbox, &processed, false, STALE).unwrap();
        std::fs::write(inbox.join("a.txt"), "one\n").unwrap();

        let result = load_inbox(&conn, &inbox, &processed, false, STALE).unwrap();
        assert_eq!((result.duplicates, result.rows), (1, 0));
        assert!(processed.join("a (1).txt").exists());
        assert_eq!(count_pending(&conn).unwrap(), 1);
    }
}
