use crate::cli::open_db;
use crate::error::Result;
use crate::raw_store::{reset_errors, RowFilter};
use crate::settings::Settings;

pub fn run(settings: &Settings, file: Option<i64>, row: Option<i64>) -> Result<()> {
    let conn = open_db(settings)?;
    let reset = reset_errors(
        &conn,
        RowFilter {
            source_file_id: file,
            row_id: row,
        },
    )?;
    println!("{reset} error row(s) returned to pending.");
    Ok(())
}
