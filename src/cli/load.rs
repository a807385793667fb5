use std::path::PathBuf;

use colored::Colorize;

use crate::cli::open_db;
use crate::error::{Result, TallyError};
use crate::raw_store::load_file;
use crate::settings::Settings;

pub fn run(settings: &Settings, files: &[String], force: bool) -> Result<()> {
    let conn = open_db(settings)?;

    for file in files {
        let path = PathBuf::from(file);
        if !path.is_file() {
            return Err(TallyError::Other(format!("File not found: {file}")));
        }
        let result = load_file(&conn, &path, force)?;
        if result.duplicate_file {
            println!(
                "{}: {}",
                file,
                "already loaded (duplicate checksum), use --force to load again".yellow()
            );
            continue;
        }
        let file_id = result.source_file_id.unwrap_or_default();
        print!("{file}: {} rows pending as file #{file_id}", result.rows);
        if result.skipped_blank > 0 {
            print!(", {} blank lines skipped", result.skipped_blank);
        }
        println!();
    }
    Ok(())
}
