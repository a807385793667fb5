//! Typed record stores: one table per record type, generated from the layout
//! tables. Rows are write-once and only ever created from processed lines.

use chrono::NaiveDate;
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension};
use rust_decimal::Decimal;

use crate::db;
use crate::error::{Result, TallyError};
use crate::extractor::{FieldValue, ParsedRecord};
use crate::layout::{all_layouts, FieldKind, RecordLayout, RecordType};

const AUDIT_COLUMNS: &str =
    "id, source_file_id, source_row_id, line_number, recorded_at, raw_line, business_key, parent_key, warnings";
const AUDIT_COUNT: usize = 9;

fn table_ddl(layout: &RecordLayout) -> String {
    let key_constraint = if layout.has_key() { " UNIQUE" } else { "" };
    let mut ddl = format!(
        "CREATE TABLE IF NOT EXISTS {table} (
    id INTEGER PRIMARY KEY,
    source_file_id INTEGER NOT NULL REFERENCES source_files(id),
    source_row_id INTEGER NOT NULL UNIQUE REFERENCES raw_import_rows(id),
    line_number INTEGER NOT NULL,
    recorded_at TEXT NOT NULL,
    raw_line BLOB NOT NULL,
    business_key TEXT{key_constraint},
    parent_key TEXT,
    warnings TEXT",
        table = layout.table
    );
    for spec in layout.fields() {
        ddl.push_str(&format!(",\n    {} {}", spec.name, spec.kind.sql_type()));
    }
    ddl.push_str("\n);\n");

    if layout.parent.is_some() {
        ddl.push_str(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_parent ON {table} (parent_key);\n",
            table = layout.table
        ));
    }
    if let Some(date) = layout.business_date {
        ddl.push_str(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_{date} ON {table} ({date});\n",
            table = layout.table
        ));
    }
    ddl.push_str(&format!(
        "CREATE TRIGGER IF NOT EXISTS {table}_write_once
BEFORE UPDATE ON {table}
BEGIN
    SELECT RAISE(ABORT, '{table} rows are write-once');
END;\n",
        table = layout.table
    ));
    ddl
}

pub fn create_tables(conn: &Connection) -> Result<()> {
    for layout in all_layouts() {
        conn.execute_batch(&table_ddl(layout))?;
    }
    Ok(())
}

/// Where a typed record came from.
#[derive(Debug, Clone, Copy)]
pub struct RecordSource<'a> {
    pub source_file_id: i64,
    pub source_row_id: i64,
    pub line_number: i64,
    pub raw_line: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    /// A record with the same business key already exists; nothing was written.
    Duplicate,
}

/// Insert-if-absent on the business key. The earliest committed record wins
/// and is never modified.
pub fn insert(conn: &Connection, record: &ParsedRecord, source: &RecordSource<'_>) -> Result<InsertOutcome> {
    let layout = record.record_type.layout();
    let columns: Vec<&str> = record.fields.iter().map(|(name, _)| *name).collect();
    let placeholders: Vec<String> = (1..=columns.len() + AUDIT_COUNT - 1)
        .map(|i| format!("?{i}"))
        .collect();
    let conflict = if layout.has_key() {
        " ON CONFLICT(business_key) DO NOTHING"
    } else {
        ""
    };
    let sql = format!(
        "INSERT INTO {} (source_file_id, source_row_id, line_number, recorded_at, raw_line, \
         business_key, parent_key, warnings, {}) VALUES ({}){conflict}",
        layout.table,
        columns.join(", "),
        placeholders.join(", ")
    );

    let recorded_at = db::now();
    let warnings = (!record.warnings.is_empty()).then(|| record.warnings.join("; "));
    let mut params: Vec<&dyn ToSql> = vec![
        &source.source_file_id as &dyn ToSql,
        &source.source_row_id,
        &source.line_number,
        &recorded_at,
        &source.raw_line,
        &record.business_key,
        &record.parent_key,
        &warnings,
    ];
    for (_, value) in &record.fields {
        params.push(value);
    }

    let changed = conn.execute(&sql, params.as_slice())?;
    if changed == 0 {
        return Ok(InsertOutcome::Duplicate);
    }
    Ok(InsertOutcome::Inserted(conn.last_insert_rowid()))
}

pub fn exists_by_business_key(conn: &Connection, record_type: &RecordType, key: &str) -> Result<bool> {
    let layout = record_type.layout();
    if !layout.has_key() {
        return Ok(false);
    }
    let mut stmt = conn.prepare(&format!("SELECT 1 FROM {} WHERE business_key = ?1", layout.table))?;
    Ok(stmt.exists([key])?)
}

/// A stored record with its audit columns.
#[derive(Debug, Clone)]
pub struct TypedRecord {
    pub id: i64,
    pub record_type: RecordType,
    pub source_file_id: i64,
    pub source_row_id: i64,
    pub line_number: i64,
    pub recorded_at: String,
    pub raw_line: Vec<u8>,
    pub business_key: Option<String>,
    pub parent_key: Option<String>,
    pub warnings: Option<String>,
    pub fields: Vec<(&'static str, Option<FieldValue>)>,
}

impl TypedRecord {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .and_then(|(_, v)| v.as_ref())
    }
}

fn select_sql(layout: &RecordLayout) -> String {
    let fields: Vec<&str> = layout.fields().map(|f| f.name).collect();
    format!("SELECT {AUDIT_COLUMNS}, {} FROM {}", fields.join(", "), layout.table)
}

fn record_from_sql(
    record_type: &RecordType,
    layout: &'static RecordLayout,
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<TypedRecord> {
    let mut fields = Vec::new();
    for (i, spec) in layout.fields().enumerate() {
        let value = FieldValue::from_column(&spec.kind, row.get_ref(AUDIT_COUNT + i)?);
        fields.push((spec.name, value));
    }
    // Other rows keep whatever identifier the line carried.
    let record_type = match record_type {
        RecordType::Other(_) => fields
            .iter()
            .find(|(n, _)| *n == "record_identifier")
            .and_then(|(_, v)| v.as_ref())
            .map(|v| RecordType::Other(v.to_string()))
            .unwrap_or_else(|| RecordType::Other(String::new())),
        known => known.clone(),
    };
    Ok(TypedRecord {
        id: row.get(0)?,
        record_type,
        source_file_id: row.get(1)?,
        source_row_id: row.get(2)?,
        line_number: row.get(3)?,
        recorded_at: row.get(4)?,
        raw_line: row.get(5)?,
        business_key: row.get(6)?,
        parent_key: row.get(7)?,
        warnings: row.get(8)?,
        fields,
    })
}

pub fn find_by_business_key(
    conn: &Connection,
    record_type: &RecordType,
    key: &str,
) -> Result<Option<TypedRecord>> {
    let layout = record_type.layout();
    if !layout.has_key() {
        return Ok(None);
    }
    let mut stmt = conn.prepare(&format!("{} WHERE business_key = ?1", select_sql(layout)))?;
    Ok(stmt
        .query_row([key], |row| record_from_sql(record_type, layout, row))
        .optional()?)
}

/// Filters for the reporting read path. Field names are checked against the
/// record type's layout before any SQL is built.
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub source_file_id: Option<i64>,
    pub field_equals: Vec<(String, String)>,
    pub parent_key: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub limit: Option<usize>,
}

pub fn query(conn: &Connection, record_type: &RecordType, filters: &RecordQuery) -> Result<Vec<TypedRecord>> {
    let layout = record_type.layout();
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(file_id) = filters.source_file_id {
        params.push(Box::new(file_id));
        clauses.push(format!("source_file_id = ?{}", params.len()));
    }
    if let Some(parent) = &filters.parent_key {
        params.push(Box::new(parent.clone()));
        clauses.push(format!("parent_key = ?{}", params.len()));
    }
    for (name, value) in &filters.field_equals {
        let spec = layout.field(name).ok_or_else(|| TallyError::UnknownField {
            record_type: record_type.label(),
            field: name.clone(),
        })?;
        let value = match spec.kind {
            FieldKind::Amount { scale, .. } => amount_filter(spec.name, value, scale)?,
            _ => value.clone(),
        };
        params.push(Box::new(value));
        clauses.push(format!("{} = ?{}", spec.name, params.len()));
    }
    if filters.date_from.is_some() || filters.date_to.is_some() {
        let date = layout.business_date.ok_or_else(|| {
            TallyError::Other(format!("{} records have no business date to filter on", layout.code))
        })?;
        if let Some(from) = filters.date_from {
            params.push(Box::new(from.format("%Y-%m-%d").to_string()));
            clauses.push(format!("{date} >= ?{}", params.len()));
        }
        if let Some(to) = filters.date_to {
            params.push(Box::new(to.format("%Y-%m-%d").to_string()));
            clauses.push(format!("{date} <= ?{}", params.len()));
        }
    }
    if let RecordType::Other(code) = record_type {
        if !code.is_empty() {
            params.push(Box::new(code.clone()));
            clauses.push(format!("record_identifier = ?{}", params.len()));
        }
    }

    let mut sql = select_sql(layout);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY id");
    if let Some(limit) = filters.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    let mut stmt = conn.prepare(&sql)?;
    let refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let records = stmt
        .query_map(refs.as_slice(), |row| record_from_sql(record_type, layout, row))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Amounts are stored as decimal text at the field's scale, so a filter value
/// is compared in that same form: "150" and "150.0" both become "150.00".
fn amount_filter(field: &str, raw: &str, scale: u32) -> Result<String> {
    let invalid = |reason: String| TallyError::Other(format!("{field}: '{raw}' {reason}"));
    let mut amount: Decimal = raw
        .trim()
        .parse()
        .map_err(|_| invalid("is not a number".to_string()))?;
    if amount.round_dp(scale) != amount {
        return Err(invalid(format!("has more than {scale} decimal places")));
    }
    amount.rescale(scale);
    Ok(amount.to_string())
}

/// Stored record counts per table, in layout order.
pub fn count_by_type(conn: &Connection) -> Result<Vec<(&'static RecordLayout, i64)>> {
    let mut counts = Vec::new();
    for layout in all_layouts() {
        let n: i64 = conn.query_row(&format!("SELECT count(*) FROM {}", layout.table), [], |r| r.get(0))?;
        counts.push((layout, n));
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::extractor::extract;
    use crate::layout::LineBuilder;
    use crate::raw_store;

    fn dt_line(reference: &str, date: &str, minor_units: i64) -> String {
        LineBuilder::new(&RecordType::DetailTransaction)
            .set("merchant_account_number", "0000123456789012")
            .unwrap()
            .set("reference_number", reference)
            .unwrap()
            .set("transaction_date", date)
            .unwrap()
            .set_minor_units("transaction_amount", minor_units)
            .unwrap()
            .build()
    }

    fn p1_line(reference: &str) -> String {
        LineBuilder::new(&RecordType::PurchasingExtension1)
            .set("reference_number", reference)
            .unwrap()
            .set("customer_code", "PO-7781")
            .unwrap()
            .build()
    }

    /// Loads `lines` as one file and stores each as a typed record.
    fn store_all(conn: &Connection, lines: &[String]) -> Vec<InsertOutcome> {
        let checksum = format!("{}", lines.len());
        raw_store::load_lines(conn, "t.txt", &checksum, lines.to_vec()).unwrap();
        let rows = raw_store::list_rows(conn, None, raw_store::RowFilter::default(), 1000).unwrap();
        rows.iter()
            .rev()
            .take(lines.len())
            .rev()
            .map(|row| {
                let rt = crate::classifier::classify(&row.raw_line);
                let parsed = extract(&row.raw_line, &rt).unwrap();
                let source = RecordSource {
                    source_file_id: row.source_file_id,
                    source_row_id: row.id,
                    line_number: row.line_number,
                    raw_line: &row.raw_line,
                };
                insert(conn, &parsed, &source).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_insert_and_find_by_business_key() {
        let (_dir, conn) = test_db();
        let outcomes = store_all(&conn, &[dt_line("REF0000012345", "20240115", 15000)]);
        assert!(matches!(outcomes[0], InsertOutcome::Inserted(_)));
        assert!(exists_by_business_key(&conn, &RecordType::DetailTransaction, "REF0000012345").unwrap());
        let record = find_by_business_key(&conn, &RecordType::DetailTransaction, "REF0000012345")
            .unwrap()
            .unwrap();
        assert_eq!(record.line_number, 1);
        assert_eq!(
            record.get("transaction_amount"),
            Some(&FieldValue::Amount(Decimal::new(15000, 2)))
        );
        assert_eq!(
            record.get("transaction_date"),
            Some(&FieldValue::Date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()))
        );
        assert_eq!(record.get("sequence_within_run"), None);
    }

    #[test]
    fn test_second_insert_with_same_key_is_duplicate() {
        let (_dir, conn) = test_db();
        let outcomes = store_all(
            &conn,
            &[
                dt_line("REF1", "20240115", 100),
                dt_line("REF1", "20240116", 999),
            ],
        );
        assert!(matches!(outcomes[0], InsertOutcome::Inserted(_)));
        assert_eq!(outcomes[1], InsertOutcome::Duplicate);
        // First write wins.
        let record = find_by_business_key(&conn, &RecordType::DetailTransaction, "REF1")
            .unwrap()
            .unwrap();
        assert_eq!(record.get("transaction_amount"), Some(&FieldValue::Amount(Decimal::new(100, 2))));
    }

    #[test]
    fn test_records_are_write_once() {
        let (_dir, conn) = test_db();
        store_all(&conn, &[dt_line("REF1", "20240115", 100)]);
        let result = conn.execute("UPDATE dt_records SET merchant_name = 'X'", []);
        assert!(result.is_err());
    }

    #[test]
    fn test_other_records_never_conflict() {
        let (_dir, conn) = test_db();
        let line = format!("{:<17}ZZ{}", "0000001", " ".repeat(100));
        let outcomes = store_all(&conn, &[line.clone(), line]);
        assert!(outcomes.iter().all(|o| matches!(o, InsertOutcome::Inserted(_))));
        let other = query(&conn, &RecordType::Other("ZZ".to_string()), &RecordQuery::default()).unwrap();
        assert_eq!(other.len(), 2);
        assert_eq!(other[0].record_type, RecordType::Other("ZZ".to_string()));
        assert!(!exists_by_business_key(&conn, &RecordType::Other(String::new()), "").unwrap());
    }

    #[test]
    fn test_query_filters() {
        let (_dir, conn) = test_db();
        store_all(
            &conn,
            &[
                dt_line("REF1", "20240110", 100),
                dt_line("REF2", "20240115", 15000),
                dt_line("REF3", "20240120", 300),
                p1_line("REF2"),
            ],
        );
        let dt = RecordType::DetailTransaction;

        let all = query(&conn, &dt, &RecordQuery::default()).unwrap();
        assert_eq!(all.len(), 3);

        let ranged = RecordQuery {
            date_from: NaiveDate::from_ymd_opt(2024, 1, 11),
            date_to: NaiveDate::from_ymd_opt(2024, 1, 20),
            ..Default::default()
        };
        let keys: Vec<_> = query(&conn, &dt, &ranged)
            .unwrap()
            .into_iter()
            .filter_map(|r| r.business_key)
            .collect();
        assert_eq!(keys, vec!["REF2", "REF3"]);

        let by_amount = RecordQuery {
            field_equals: vec![("transaction_amount".to_string(), "150".to_string())],
            ..Default::default()
        };
        assert_eq!(query(&conn, &dt, &by_amount).unwrap().len(), 1);

        let limited = RecordQuery {
            limit: Some(1),
            ..Default::default()
        };
        assert_eq!(query(&conn, &dt, &limited).unwrap().len(), 1);

        let children = RecordQuery {
            parent_key: Some("REF2".to_string()),
            ..Default::default()
        };
        let p1 = query(&conn, &RecordType::PurchasingExtension1, &children).unwrap();
        assert_eq!(p1.len(), 1);
        assert_eq!(p1[0].get("customer_code"), Some(&FieldValue::Text("PO-7781".to_string())));
    }

    #[test]
    fn test_amount_filter_is_exact() {
        let (_dir, conn) = test_db();
        store_all(
            &conn,
            &[
                dt_line("REF1", "20240110", 99_999_999_999),
                dt_line("REF2", "20240110", 99_999_999_998),
                dt_line("REF3", "20240110", -150),
            ],
        );
        let dt = RecordType::DetailTransaction;
        let by_amount = |value: &str| RecordQuery {
            field_equals: vec![("transaction_amount".to_string(), value.to_string())],
            ..Default::default()
        };

        let hits = query(&conn, &dt, &by_amount("999999999.99")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].business_key.as_deref(), Some("REF1"));
        assert_eq!(query(&conn, &dt, &by_amount("999999999.980")).unwrap().len(), 1);
        assert_eq!(query(&conn, &dt, &by_amount("-1.5")).unwrap().len(), 1);
        assert!(query(&conn, &dt, &by_amount("1.505")).is_err());
        assert!(query(&conn, &dt, &by_amount("abc")).is_err());
    }

    #[test]
    fn test_query_rejects_unknown_field() {
        let (_dir, conn) = test_db();
        let filters = RecordQuery {
            field_equals: vec![("amount; DROP TABLE dt_records".to_string(), "1".to_string())],
            ..Default::default()
        };
        let err = query(&conn, &RecordType::DetailTransaction, &filters).unwrap_err();
        assert!(matches!(err, TallyError::UnknownField { .. }));
    }

    #[test]
    fn test_date_filter_needs_business_date() {
        let (_dir, conn) = test_db();
        let filters = RecordQuery {
            date_from: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..Default::default()
        };
        assert!(query(&conn, &RecordType::GeneralData2, &filters).is_err());
    }

    #[test]
    fn test_count_by_type() {
        let (_dir, conn) = test_db();
        store_all(&conn, &[dt_line("REF1", "20240110", 100), p1_line("REF1")]);
        let counts = count_by_type(&conn).unwrap();
        let get = |code: &str| counts.iter().find(|(l, _)| l.code == code).map(|(_, n)| *n);
        assert_eq!(get("DT"), Some(1));
        assert_eq!(get("P1"), Some(1));
        assert_eq!(get("BH"), Some(0));
    }
}
