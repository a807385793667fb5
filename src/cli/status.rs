use std::collections::BTreeMap;

use colored::Colorize;
use comfy_table::{Cell, Table};
use serde_json::json;

use crate::cli::open_db;
use crate::error::Result;
use crate::models::{ProcessingStatus, ALL_STATUSES};
use crate::raw_store::{count_by_status, count_by_type, list_files};
use crate::record_store;
use crate::settings::Settings;

pub fn run(settings: &Settings, json: bool) -> Result<()> {
    let conn = open_db(settings)?;
    let by_status = count_by_status(&conn)?;
    let by_type = count_by_type(&conn)?;
    let stored = record_store::count_by_type(&conn)?;
    let files = list_files(&conn)?;

    if json {
        let statuses: BTreeMap<&str, i64> = by_status.iter().map(|(s, n)| (s.as_str(), *n)).collect();
        let records: BTreeMap<&str, i64> = stored.iter().map(|(l, n)| (l.table, *n)).collect();
        let out = json!({
            "files": files.len(),
            "rows": statuses,
            "records": records,
        });
        println!("{out}");
        return Ok(());
    }

    println!("Data dir:   {}", settings.data_path().display());
    println!("Database:   {}", settings.db_path().display());
    println!("Files:      {}", files.len());
    println!();

    let mut table = Table::new();
    table.set_header(vec!["Status", "Rows"]);
    for (status, n) in &by_status {
        let label = match status {
            ProcessingStatus::Processed => status.as_str().green(),
            ProcessingStatus::Error => status.as_str().red(),
            ProcessingStatus::Duplicate => status.as_str().yellow(),
            _ => status.as_str().normal(),
        };
        table.add_row(vec![Cell::new(label), Cell::new(n)]);
    }
    println!("Raw import queue\n{table}");

    // Record type x status matrix; rows not yet classified show as "-".
    let mut matrix: BTreeMap<String, BTreeMap<ProcessingStatus, i64>> = BTreeMap::new();
    for (record_type, status, n) in by_type {
        matrix.entry(record_type).or_default().insert(status, n);
    }
    if !matrix.is_empty() {
        let mut table = Table::new();
        let mut header = vec!["Type".to_string()];
        header.extend(ALL_STATUSES.iter().map(|s| s.as_str().to_string()));
        table.set_header(header);
        for (record_type, counts) in &matrix {
            let mut row = vec![Cell::new(record_type)];
            for status in ALL_STATUSES {
                row.push(Cell::new(counts.get(status).copied().unwrap_or(0)));
            }
            table.add_row(row);
        }
        println!("By record type\n{table}");
    }

    let mut table = Table::new();
    table.set_header(vec!["Table", "Records"]);
    for (layout, n) in &stored {
        table.add_row(vec![Cell::new(layout.table), Cell::new(n)]);
    }
    println!("Stored records\n{table}");
    Ok(())
}
