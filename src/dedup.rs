use std::fmt;

use rusqlite::{Connection, OptionalExtension};

use crate::error::Result;
use crate::layout::RecordType;

/// Points at the record that first claimed a business key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingRecordRef {
    pub record_id: i64,
    pub source_file_id: i64,
    pub source_row_id: i64,
    pub line_number: i64,
}

impl fmt::Display for ExistingRecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "record {} (file {}, line {})",
            self.record_id, self.source_file_id, self.line_number
        )
    }
}

/// Looks for a stored record of the same type and business key, across every
/// file ever loaded. Types without a key never match.
pub fn find_existing(
    conn: &Connection,
    record_type: &RecordType,
    business_key: &str,
) -> Result<Option<ExistingRecordRef>> {
    let layout = record_type.layout();
    if !layout.has_key() {
        return Ok(None);
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT id, source_file_id, source_row_id, line_number FROM {} WHERE business_key = ?1",
        layout.table
    ))?;
    let found = stmt
        .query_row([business_key], |row| {
            Ok(ExistingRecordRef {
                record_id: row.get(0)?,
                source_file_id: row.get(1)?,
                source_row_id: row.get(2)?,
                line_number: row.get(3)?,
            })
        })
        .optional()?;
    Ok(found)
}

/// Row message for a line rejected as a duplicate.
pub fn duplicate_message(record_type: &RecordType, business_key: &str, existing: Option<&ExistingRecordRef>) -> String {
    match existing {
        Some(existing) => format!("duplicate {record_type} key '{business_key}', first seen as {existing}"),
        None => format!("duplicate {record_type} key '{business_key}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::extractor::extract;
    use crate::layout::LineBuilder;
    use crate::raw_store;
    use crate::record_store::{self, RecordSource};

    fn store_dt(conn: &Connection, reference: &str) {
        let line = LineBuilder::new(&RecordType::DetailTransaction)
            .set("reference_number", reference)
            .unwrap()
            .set("transaction_date", "20240115")
            .unwrap()
            .set("transaction_amount", "0000000100")
            .unwrap()
            .build();
        let result = raw_store::load_lines(conn, "a.txt", reference, vec![line.clone()]).unwrap();
        let source_file_id = result.source_file_id.unwrap();
        let row_id: i64 = conn
            .query_row(
                "SELECT id FROM raw_import_rows WHERE source_file_id = ?1",
                [source_file_id],
                |r| r.get(0),
            )
            .unwrap();
        let parsed = extract(line.as_bytes(), &RecordType::DetailTransaction).unwrap();
        let source = RecordSource {
            source_file_id,
            source_row_id: row_id,
            line_number: 1,
            raw_line: line.as_bytes(),
        };
        record_store::insert(conn, &parsed, &source).unwrap();
    }

    #[test]
    fn test_find_existing_across_files() {
        let (_dir, conn) = test_db();
        store_dt(&conn, "REF1");
        store_dt(&conn, "REF2");
        let found = find_existing(&conn, &RecordType::DetailTransaction, "REF2")
            .unwrap()
            .unwrap();
        assert_eq!(found.source_file_id, 2);
        assert_eq!(found.line_number, 1);
        assert_eq!(found.to_string(), format!("record {} (file 2, line 1)", found.record_id));
    }

    #[test]
    fn test_find_existing_is_per_type() {
        let (_dir, conn) = test_db();
        store_dt(&conn, "REF1");
        assert!(find_existing(&conn, &RecordType::PurchasingExtension1, "REF1")
            .unwrap()
            .is_none());
        assert!(find_existing(&conn, &RecordType::DetailTransaction, "REF9")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_other_type_never_has_existing() {
        let (_dir, conn) = test_db();
        assert!(find_existing(&conn, &RecordType::Other("ZZ".to_string()), "")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_duplicate_message() {
        let existing = ExistingRecordRef {
            record_id: 7,
            source_file_id: 1,
            source_row_id: 3,
            line_number: 3,
        };
        assert_eq!(
            duplicate_message(&RecordType::DetailTransaction, "REF1", Some(&existing)),
            "duplicate DT key 'REF1', first seen as record 7 (file 1, line 3)"
        );
    }
}
