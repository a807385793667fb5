use comfy_table::{Cell, Table};

use crate::cli::open_db;
use crate::error::Result;
use crate::fmt::ellipsize;
use crate::models::ProcessingStatus;
use crate::raw_store::{list_rows, RowFilter};
use crate::settings::Settings;

pub fn run(settings: &Settings, file: Option<i64>, limit: usize) -> Result<()> {
    let conn = open_db(settings)?;
    let filter = RowFilter {
        source_file_id: file,
        row_id: None,
    };
    let rows = list_rows(&conn, Some(ProcessingStatus::Error), filter, limit)?;

    if rows.is_empty() {
        println!("No error rows.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Row", "File", "Line", "Type", "Error", "Raw line"]);
    for row in &rows {
        table.add_row(vec![
            Cell::new(row.id),
            Cell::new(row.source_file_id),
            Cell::new(row.line_number),
            Cell::new(row.record_type.as_deref().unwrap_or("-")),
            Cell::new(row.error_message.as_deref().unwrap_or_default()),
            Cell::new(ellipsize(String::from_utf8_lossy(&row.raw_line).trim_end(), 40)),
        ]);
    }
    println!("{table}");
    println!("Fix the source and reload, or run `tally retry` to queue these rows again.");
    Ok(())
}
