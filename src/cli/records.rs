use std::io::Write;

use chrono::NaiveDate;
use comfy_table::{Cell, Table};

use crate::cli::open_db;
use crate::error::{Result, TallyError};
use crate::extractor::FieldValue;
use crate::fmt::money;
use crate::layout::{FieldKind, RecordLayout, RecordType};
use crate::record_store::{query, RecordQuery, TypedRecord};
use crate::settings::Settings;

/// Amount columns shown in the terminal table; CSV export carries every field.
const MAX_AMOUNT_COLUMNS: usize = 3;

fn parse_date(flag: &str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| TallyError::Other(format!("Invalid {flag} date '{raw}', expected YYYY-MM-DD")))
}

pub(crate) fn parse_filters(filters: &[String]) -> Result<Vec<(String, String)>> {
    filters
        .iter()
        .map(|f| {
            f.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| TallyError::Other(format!("Invalid filter '{f}', expected field=value")))
        })
        .collect()
}

pub struct RecordsArgs {
    pub record_type: String,
    pub file: Option<i64>,
    pub parent: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub filters: Vec<String>,
    pub limit: usize,
    pub csv: Option<String>,
}

pub fn run(settings: &Settings, args: RecordsArgs) -> Result<()> {
    let record_type = RecordType::parse_name(&args.record_type)?;
    let filters = RecordQuery {
        source_file_id: args.file,
        field_equals: parse_filters(&args.filters)?,
        parent_key: args.parent,
        date_from: args.from_date.as_deref().map(|d| parse_date("--from", d)).transpose()?,
        date_to: args.to_date.as_deref().map(|d| parse_date("--to", d)).transpose()?,
        limit: Some(args.limit),
    };

    let conn = open_db(settings)?;
    let records = query(&conn, &record_type, &filters)?;
    let layout = record_type.layout();

    match args.csv.as_deref() {
        Some("-") => write_csv(std::io::stdout().lock(), layout, &records)?,
        Some(path) => {
            let file = std::fs::File::create(path)?;
            write_csv(file, layout, &records)?;
            println!("Wrote {} {} record(s) to {path}", records.len(), layout.code);
        }
        None => print_table(layout, &records),
    }
    Ok(())
}

pub(crate) fn write_csv<W: Write>(out: W, layout: &RecordLayout, records: &[TypedRecord]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    let mut header = vec!["id", "source_file_id", "line_number", "business_key", "parent_key", "warnings"];
    header.extend(layout.fields().map(|f| f.name));
    wtr.write_record(&header)?;

    for record in records {
        let mut row = vec![
            record.id.to_string(),
            record.source_file_id.to_string(),
            record.line_number.to_string(),
            record.business_key.clone().unwrap_or_default(),
            record.parent_key.clone().unwrap_or_default(),
            record.warnings.clone().unwrap_or_default(),
        ];
        row.extend(
            record
                .fields
                .iter()
                .map(|(_, v)| v.as_ref().map(|v| v.to_string()).unwrap_or_default()),
        );
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

fn print_table(layout: &RecordLayout, records: &[TypedRecord]) {
    if records.is_empty() {
        println!("No {} records found.", layout.code);
        return;
    }

    let amount_columns: Vec<&str> = layout
        .specific
        .iter()
        .filter(|f| matches!(f.kind, FieldKind::Amount { scale: 2, .. }))
        .filter(|f| records.iter().any(|r| r.get(f.name).is_some()))
        .map(|f| f.name)
        .take(MAX_AMOUNT_COLUMNS)
        .collect();

    let mut header = vec!["ID", "File", "Line", "Key"];
    if layout.parent.is_some() {
        header.push("Parent");
    }
    if let Some(date) = layout.business_date {
        header.push(date);
    }
    header.extend(amount_columns.iter().copied());

    let mut table = Table::new();
    table.set_header(header);
    for record in records {
        let mut row = vec![
            Cell::new(record.id),
            Cell::new(record.source_file_id),
            Cell::new(record.line_number),
            Cell::new(record.business_key.as_deref().unwrap_or("-")),
        ];
        if layout.parent.is_some() {
            row.push(Cell::new(record.parent_key.as_deref().unwrap_or("-")));
        }
        if let Some(date) = layout.business_date {
            row.push(Cell::new(display(record.get(date))));
        }
        for name in &amount_columns {
            row.push(Cell::new(display(record.get(name))));
        }
        table.add_row(row);
    }
    println!("{} records\n{table}", layout.description);
}

fn display(value: Option<&FieldValue>) -> String {
    match value {
        Some(FieldValue::Amount(d)) => money(*d),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}
