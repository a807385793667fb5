use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::layout::{RecordType, KNOWN_TYPES, RECORD_WIDTH};

pub fn run(record_type: Option<&str>) -> Result<()> {
    let Some(name) = record_type else {
        let mut table = Table::new();
        table.set_header(vec!["Code", "Description", "Table", "Fields", "Business key"]);
        for t in KNOWN_TYPES {
            let layout = t.layout();
            table.add_row(vec![
                Cell::new(layout.code),
                Cell::new(layout.description),
                Cell::new(layout.table),
                Cell::new(layout.fields().count()),
                Cell::new(layout.key.join(" | ")),
            ]);
        }
        println!("Record types (width {RECORD_WIDTH}, identifier at bytes 17-18)\n{table}");
        return Ok(());
    };

    let layout = RecordType::parse_name(name)?.layout();
    let mut table = Table::new();
    table.set_header(vec!["Field", "Start", "End", "Len", "Kind", ""]);
    for spec in layout.fields() {
        let mut flags = Vec::new();
        if layout.is_mandatory(spec) {
            flags.push("required".red().to_string());
        }
        if layout.key.contains(&spec.name) {
            flags.push("key".yellow().to_string());
        }
        if layout.parent == Some(spec.name) {
            flags.push("parent".cyan().to_string());
        }
        table.add_row(vec![
            Cell::new(spec.name),
            Cell::new(spec.start),
            Cell::new(spec.end()),
            Cell::new(spec.len),
            Cell::new(spec.kind.label()),
            Cell::new(flags.join(" ")),
        ]);
    }
    println!("{} ({}) -> {}\n{table}", layout.code, layout.description, layout.table);
    Ok(())
}
