use comfy_table::{Cell, Table};

use crate::cli::open_db;
use crate::error::Result;
use crate::raw_store::list_files;
use crate::settings::Settings;

pub fn run(settings: &Settings) -> Result<()> {
    let conn = open_db(settings)?;
    let files = list_files(&conn)?;
    if files.is_empty() {
        println!("No files loaded.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "File", "Rows", "Loaded", "Checksum"]);
    for file in files {
        table.add_row(vec![
            Cell::new(file.id),
            Cell::new(file.filename),
            Cell::new(file.line_count),
            Cell::new(file.loaded_at),
            Cell::new(&file.checksum[..file.checksum.len().min(12)]),
        ]);
    }
    println!("{table}");
    Ok(())
}
