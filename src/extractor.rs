//! Field extraction: slices a classified line at the offsets of its layout and
//! coerces each substring to a typed value.

use std::fmt;

use chrono::NaiveDate;
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rust_decimal::Decimal;

use crate::error::ExtractionError;
use crate::layout::{DateFormat, FieldKind, FieldSpec, RecordLayout, RecordType, Sign};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Amount(Decimal),
    Date(NaiveDate),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Amount(d) => write!(f, "{d}"),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Text(s) => ToSqlOutput::from(s.as_str()),
            Self::Integer(i) => ToSqlOutput::from(*i),
            other => ToSqlOutput::from(other.to_string()),
        })
    }
}

impl FieldValue {
    /// Reads a stored column back according to the field's kind.
    pub fn from_column(kind: &FieldKind, value: ValueRef<'_>) -> Option<FieldValue> {
        match value {
            ValueRef::Null => None,
            ValueRef::Integer(i) => Some(Self::Integer(i)),
            ValueRef::Text(bytes) => {
                let s = std::str::from_utf8(bytes).ok()?;
                match kind {
                    FieldKind::Amount { .. } => s.parse().ok().map(Self::Amount),
                    FieldKind::Date(_) => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(Self::Date),
                    FieldKind::Integer => s.parse().ok().map(Self::Integer),
                    FieldKind::Text => Some(Self::Text(s.to_string())),
                }
            }
            ValueRef::Real(f) => Some(Self::Text(f.to_string())),
            ValueRef::Blob(_) => None,
        }
    }
}

/// The transient result of extracting one line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord {
    pub record_type: RecordType,
    pub fields: Vec<(&'static str, Option<FieldValue>)>,
    pub business_key: Option<String>,
    pub parent_key: Option<String>,
    pub warnings: Vec<String>,
}

impl ParsedRecord {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .and_then(|(_, v)| v.as_ref())
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(FieldValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn amount(&self, name: &str) -> Option<Decimal> {
        match self.get(name) {
            Some(FieldValue::Amount(d)) => Some(*d),
            _ => None,
        }
    }

    pub fn date(&self, name: &str) -> Option<NaiveDate> {
        match self.get(name) {
            Some(FieldValue::Date(d)) => Some(*d),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(FieldValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }
}

pub fn extract(bytes: &[u8], record_type: &RecordType) -> Result<ParsedRecord, ExtractionError> {
    let layout = record_type.layout();
    let mut warnings = Vec::new();
    let mut fields = Vec::new();

    for spec in layout.fields() {
        let value = extract_field(bytes, layout, spec, &mut warnings)?;
        fields.push((spec.name, value));
    }

    let mut record = ParsedRecord {
        record_type: record_type.clone(),
        fields,
        business_key: None,
        parent_key: None,
        warnings,
    };

    if layout.has_key() {
        let mut parts = Vec::with_capacity(layout.key.len());
        for name in layout.key {
            let value = record
                .get(name)
                .ok_or(ExtractionError::MissingKeyField { field: *name })?;
            parts.push(value.to_string());
        }
        record.business_key = Some(parts.join("|"));
    }
    if let Some(parent) = layout.parent {
        record.parent_key = record.get(parent).map(|v| v.to_string());
    }
    Ok(record)
}

enum Coverage<'a> {
    Full(&'a [u8]),
    Partial(&'a [u8]),
    Absent,
}

fn coverage<'a>(bytes: &'a [u8], spec: &FieldSpec) -> Coverage<'a> {
    if spec.start >= bytes.len() {
        Coverage::Absent
    } else if spec.end() > bytes.len() {
        Coverage::Partial(&bytes[spec.start..])
    } else {
        Coverage::Full(&bytes[spec.start..spec.end()])
    }
}

fn extract_field(
    bytes: &[u8],
    layout: &RecordLayout,
    spec: &'static FieldSpec,
    warnings: &mut Vec<String>,
) -> Result<Option<FieldValue>, ExtractionError> {
    let mandatory = layout.is_mandatory(spec);
    let out_of_range = || ExtractionError::OutOfRange {
        field: spec.name,
        start: spec.start,
        end: spec.end(),
        line_len: bytes.len(),
    };

    let slice = match coverage(bytes, spec) {
        Coverage::Full(s) => s,
        Coverage::Absent if mandatory => return Err(out_of_range()),
        Coverage::Absent => return Ok(None),
        Coverage::Partial(_) if mandatory => return Err(out_of_range()),
        Coverage::Partial(s) if spec.kind == FieldKind::Text => s,
        Coverage::Partial(_) => {
            warnings.push(format!("{}: truncated by end of line", spec.name));
            return Ok(None);
        }
    };

    let invalid = |raw: &str,
                   reason: &str,
                   warnings: &mut Vec<String>|
     -> Result<Option<FieldValue>, ExtractionError> {
        if mandatory {
            Err(ExtractionError::InvalidField {
                field: spec.name,
                raw: raw.to_string(),
                reason: reason.to_string(),
            })
        } else {
            warnings.push(format!("{}: {reason} ('{raw}')", spec.name));
            Ok(None)
        }
    };

    let Ok(raw) = std::str::from_utf8(slice) else {
        let lossy = String::from_utf8_lossy(slice).into_owned();
        return invalid(&lossy, "not valid UTF-8", warnings);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return if mandatory {
            Err(ExtractionError::Missing { field: spec.name })
        } else {
            Ok(None)
        };
    }

    match spec.kind {
        FieldKind::Text => Ok(Some(FieldValue::Text(trimmed.to_string()))),
        FieldKind::Integer => match parse_integer(trimmed) {
            Some(i) => Ok(Some(FieldValue::Integer(i))),
            None => invalid(trimmed, "not an integer", warnings),
        },
        FieldKind::Amount { scale, sign } => match parse_amount(trimmed, scale, sign, bytes, layout) {
            Ok(Some(d)) => Ok(Some(FieldValue::Amount(d))),
            Ok(None) if mandatory => Err(ExtractionError::Missing { field: spec.name }),
            Ok(None) => Ok(None),
            Err(reason) => invalid(trimmed, reason, warnings),
        },
        FieldKind::Date(format) => {
            if trimmed.bytes().all(|b| b == b'0') {
                return if mandatory {
                    Err(ExtractionError::Missing { field: spec.name })
                } else {
                    Ok(None)
                };
            }
            match parse_date(trimmed, format) {
                Some(d) => Ok(Some(FieldValue::Date(d))),
                None => invalid(trimmed, &format!("not a {} date", format.label()), warnings),
            }
        }
    }
}

fn parse_integer(raw: &str) -> Option<i64> {
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

/// Zero-padded digits with `scale` implied decimals. Returns `Ok(None)` when
/// only a sign character is present.
pub fn parse_amount(
    raw: &str,
    scale: u32,
    sign: Sign,
    line: &[u8],
    layout: &RecordLayout,
) -> Result<Option<Decimal>, &'static str> {
    let mut digits = raw;
    let mut negative = false;
    if sign == Sign::Trailing {
        if let Some(rest) = digits.strip_suffix('-') {
            negative = true;
            digits = rest.trim_end();
        } else if let Some(rest) = digits.strip_suffix('+') {
            digits = rest.trim_end();
        }
    }
    if digits.is_empty() {
        return Ok(None);
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err("non-numeric amount");
    }
    let units: i64 = digits.parse().map_err(|_| "amount out of range")?;

    if let Sign::Indicator { field, negative: marks } = sign {
        let indicator = layout
            .field(field)
            .and_then(|spec| line.get(spec.start..spec.end()))
            .and_then(|b| std::str::from_utf8(b).ok())
            .map(|s| s.trim().to_uppercase())
            .unwrap_or_default();
        negative = marks.iter().any(|m| *m == indicator);
    }

    let value = Decimal::new(units, scale);
    Ok(Some(if negative { -value } else { value }))
}

/// Parses a date in one of the file encodings. Two-digit years pivot at 70.
pub fn parse_date(raw: &str, format: DateFormat) -> Option<NaiveDate> {
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let num = |range: std::ops::Range<usize>| -> Option<u32> { raw.get(range)?.parse().ok() };
    let century = |yy: u32| -> i32 {
        if yy >= 70 {
            1900 + yy as i32
        } else {
            2000 + yy as i32
        }
    };
    match format {
        DateFormat::Ccyymmdd if raw.len() == 8 => {
            NaiveDate::from_ymd_opt(num(0..4)? as i32, num(4..6)?, num(6..8)?)
        }
        DateFormat::Mmddccyy if raw.len() == 8 => {
            NaiveDate::from_ymd_opt(num(4..8)? as i32, num(0..2)?, num(2..4)?)
        }
        DateFormat::Yymmdd if raw.len() == 6 => {
            NaiveDate::from_ymd_opt(century(num(0..2)?), num(2..4)?, num(4..6)?)
        }
        DateFormat::Julian if raw.len() == 5 => NaiveDate::from_yo_opt(century(num(0..2)?), num(2..5)?),
        _ => None,
    }
}
