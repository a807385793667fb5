//! Positional record layouts.
//!
//! Every record type is described as data: an ordered list of field
//! descriptors (name, 0-based byte offset, length, kind) plus the fields that
//! form its business key. Format corrections are edits to these tables, not
//! to the extraction code.

use std::fmt;

use crate::error::{Result, TallyError};

/// Nominal width of every record in the file.
pub const RECORD_WIDTH: usize = 700;

/// Byte range of the two-character record identifier.
pub const DISCRIMINATOR: std::ops::Range<usize> = 17..19;

// ---------------------------------------------------------------------------
// Record types: `Other` carries the unrecognized identifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordType {
    DetailTransaction,
    BatchHeader,
    PurchasingExtension1,
    PurchasingExtension2,
    GeneralData2,
    EmvData,
    RejectDetail,
    MerchantAdjustment,
    Other(String),
}

pub const KNOWN_TYPES: &[RecordType] = &[
    RecordType::DetailTransaction,
    RecordType::BatchHeader,
    RecordType::PurchasingExtension1,
    RecordType::PurchasingExtension2,
    RecordType::GeneralData2,
    RecordType::EmvData,
    RecordType::RejectDetail,
    RecordType::MerchantAdjustment,
];

impl RecordType {
    pub fn code(&self) -> &str {
        match self {
            Self::DetailTransaction => "DT",
            Self::BatchHeader => "BH",
            Self::PurchasingExtension1 => "P1",
            Self::PurchasingExtension2 => "P2",
            Self::GeneralData2 => "G2",
            Self::EmvData => "E1",
            Self::RejectDetail => "DR",
            Self::MerchantAdjustment => "AD",
            Self::Other(code) => code,
        }
    }

    /// Maps a record identifier to its type. Anything unrecognized is `Other`.
    pub fn from_code(code: &str) -> Self {
        KNOWN_TYPES
            .iter()
            .find(|t| t.code() == code)
            .cloned()
            .unwrap_or_else(|| Self::Other(code.to_string()))
    }

    /// Parses an operator-supplied type name: a record code (`dt`, `BH`) or `other`.
    pub fn parse_name(name: &str) -> Result<Self> {
        let upper = name.trim().to_uppercase();
        if upper == "OTHER" {
            return Ok(Self::Other(String::new()));
        }
        KNOWN_TYPES
            .iter()
            .find(|t| t.code() == upper)
            .cloned()
            .ok_or_else(|| TallyError::UnknownRecordType(name.to_string()))
    }

    /// The storage label used for the raw row's `record_type` column.
    pub fn label(&self) -> String {
        match self {
            Self::Other(code) if code.trim().is_empty() => "OTHER".to_string(),
            Self::Other(code) => format!("OTHER:{}", code.trim()),
            known => known.code().to_string(),
        }
    }

    pub fn is_other(&self) -> bool {
        matches!(self, Self::Other(_))
    }

    pub fn layout(&self) -> &'static RecordLayout {
        match self {
            Self::DetailTransaction => &DT_LAYOUT,
            Self::BatchHeader => &BH_LAYOUT,
            Self::PurchasingExtension1 => &P1_LAYOUT,
            Self::PurchasingExtension2 => &P2_LAYOUT,
            Self::GeneralData2 => &G2_LAYOUT,
            Self::EmvData => &E1_LAYOUT,
            Self::RejectDetail => &DR_LAYOUT,
            Self::MerchantAdjustment => &AD_LAYOUT,
            Self::Other(_) => &OTHER_LAYOUT,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

// ---------------------------------------------------------------------------
// Field descriptors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    Ccyymmdd,
    Mmddccyy,
    Yymmdd,
    /// Two-digit year followed by three-digit day of year.
    Julian,
}

impl DateFormat {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ccyymmdd => "CCYYMMDD",
            Self::Mmddccyy => "MMDDCCYY",
            Self::Yymmdd => "YYMMDD",
            Self::Julian => "YYDDD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Unsigned,
    /// Last significant character is `+` or `-`.
    Trailing,
    /// A separate one-character field; the amount is negative when it holds
    /// one of `negative`.
    Indicator {
        field: &'static str,
        negative: &'static [&'static str],
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Amount { scale: u32, sign: Sign },
    Date(DateFormat),
}

impl FieldKind {
    pub fn label(&self) -> String {
        match self {
            Self::Text => "text".to_string(),
            Self::Integer => "integer".to_string(),
            Self::Amount { scale, sign } => match sign {
                Sign::Unsigned => format!("amount/{scale}"),
                Sign::Trailing => format!("amount/{scale} trailing sign"),
                Sign::Indicator { field, .. } => format!("amount/{scale} sign in {field}"),
            },
            Self::Date(fmt) => format!("date {}", fmt.label()),
        }
    }

    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            _ => "TEXT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub start: usize,
    pub len: usize,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    pub const fn end(&self) -> usize {
        self.start + self.len
    }

    const fn req(self) -> Self {
        FieldSpec {
            required: true,
            ..self
        }
    }
}

const fn text(name: &'static str, start: usize, len: usize) -> FieldSpec {
    FieldSpec {
        name,
        start,
        len,
        kind: FieldKind::Text,
        required: false,
    }
}

const fn int(name: &'static str, start: usize, len: usize) -> FieldSpec {
    FieldSpec {
        name,
        start,
        len,
        kind: FieldKind::Integer,
        required: false,
    }
}

const fn amount(name: &'static str, start: usize, len: usize, scale: u32, sign: Sign) -> FieldSpec {
    FieldSpec {
        name,
        start,
        len,
        kind: FieldKind::Amount { scale, sign },
        required: false,
    }
}

const fn date(name: &'static str, start: usize, len: usize, format: DateFormat) -> FieldSpec {
    FieldSpec {
        name,
        start,
        len,
        kind: FieldKind::Date(format),
        required: false,
    }
}

const U: Sign = Sign::Unsigned;
const T: Sign = Sign::Trailing;

#[derive(Debug)]
pub struct RecordLayout {
    pub code: &'static str,
    pub description: &'static str,
    pub table: &'static str,
    /// Type-specific fields; the common header is prepended by `fields()`.
    pub specific: &'static [FieldSpec],
    /// Fields joined with `|` to form the business key. Empty means no key.
    pub key: &'static [&'static str],
    /// Field holding the parent DT reference number.
    pub parent: Option<&'static str>,
    /// Primary business date; an unparseable value is a hard error.
    pub business_date: Option<&'static str>,
}

impl RecordLayout {
    pub fn fields(&self) -> impl Iterator<Item = &'static FieldSpec> {
        COMMON_FIELDS.iter().chain(self.specific.iter())
    }

    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields().find(|f| f.name == name)
    }

    pub fn max_end(&self) -> usize {
        self.fields().map(|f| f.end()).max().unwrap_or(0)
    }

    pub fn has_key(&self) -> bool {
        !self.key.is_empty()
    }

    /// Whether a bad or missing value for `field` fails the whole line:
    /// declared required, or the primary business date.
    pub fn is_mandatory(&self, field: &FieldSpec) -> bool {
        field.required || self.business_date == Some(field.name)
    }
}

// ---------------------------------------------------------------------------
// Field maps
// ---------------------------------------------------------------------------

pub const COMMON_FIELDS: &[FieldSpec] = &[
    int("sequence_number", 0, 7),
    text("entry_run_number", 7, 4),
    int("sequence_within_run", 11, 6),
    text("record_identifier", 17, 2).req(),
    text("bank_number", 19, 4),
    text("merchant_account_number", 23, 16),
    text("association_number", 39, 6),
    text("group_number", 45, 6),
    text("transaction_code", 51, 4),
];

const DT_FIELDS: &[FieldSpec] = &[
    date("batch_julian_date", 55, 5, DateFormat::Julian),
    text("debit_credit_indicator", 60, 1),
    text("reference_number", 61, 23).req(),
    date("transaction_date", 84, 8, DateFormat::Ccyymmdd).req(),
    amount(
        "transaction_amount",
        92,
        11,
        2,
        Sign::Indicator {
            field: "debit_credit_indicator",
            negative: &["C"],
        },
    )
    .req(),
    amount("net_deposit", 103, 15, 2, T),
    text("cardholder_account_number", 118, 19),
    text("best_interchange_eligible", 137, 2),
    text("transaction_data_condition_code", 139, 2),
    text("downgrade_reason_1", 141, 4),
    text("downgrade_reason_2", 145, 4),
    text("downgrade_reason_3", 149, 4),
    text("online_entry", 153, 1),
    text("ach_flag", 154, 1),
    text("auth_source", 155, 1),
    text("cardholder_id_method", 156, 1),
    text("cat_indicator", 157, 1),
    text("reimbursement_attribute", 158, 1),
    text("mail_order_telephone_indicator", 159, 1),
    text("auth_char_indicator", 160, 1),
    text("banknet_reference_number", 161, 9),
    text("draft_a_flag", 170, 1),
    text("auth_currency_code", 171, 3),
    amount("authorization_amount", 174, 12, 2, U),
    text("validation_code", 186, 4),
    text("authorization_response_code", 190, 2),
    text("network_identifier_debit", 192, 3),
    text("switch_settled_indicator", 195, 1),
    text("pos_entry_mode", 196, 2),
    text("reversal_flag", 198, 1),
    text("merchant_name", 199, 25),
    text("authorization_number", 224, 6),
    text("rejection_reason", 230, 4),
    amount(
        "cash_back_amount",
        234,
        9,
        2,
        Sign::Indicator {
            field: "cash_back_sign",
            negative: &["-"],
        },
    ),
    text("cash_back_sign", 243, 1),
    text("card_type", 244, 2),
    text("mcc", 246, 4),
    text("terminal_id", 250, 8),
    amount("interchange_fee", 258, 15, 2, T),
    amount("surcharge_amount", 273, 9, 2, U),
    text("local_transaction_time", 282, 6),
    date("settlement_date", 288, 6, DateFormat::Yymmdd),
    text("currency_code", 294, 3),
    amount("foreign_amount", 297, 12, 2, U),
    text("network_transaction_id", 309, 15),
    text("merchant_city", 324, 13),
    text("merchant_state", 337, 2),
    text("merchant_zip", 339, 9),
    text("pos_data_code", 348, 12),
    int("card_sequence_number", 360, 3),
    text("product_id", 363, 2),
    text("purchase_id_format", 365, 1),
    text("market_specific_auth_data", 366, 1),
    amount("total_authorized_amount", 367, 12, 2, U),
];

const BH_FIELDS: &[FieldSpec] = &[
    date("batch_date", 55, 8, DateFormat::Mmddccyy).req(),
    date("batch_julian_date", 63, 5, DateFormat::Julian),
    int("bh_record_number", 68, 9).req(),
    text("batch_id", 77, 6).req(),
    amount(
        "net_deposit",
        83,
        15,
        2,
        Sign::Indicator {
            field: "net_deposit_indicator",
            negative: &["D"],
        },
    ),
    text("net_deposit_indicator", 98, 1),
    text("reject_reason", 99, 4),
    int("transaction_count", 103, 7),
    amount("batch_credit_amount", 110, 15, 2, U),
    amount("batch_debit_amount", 125, 15, 2, U),
    text("merchant_reference", 140, 16),
    date("processing_date", 156, 6, DateFormat::Yymmdd),
];

const P1_FIELDS: &[FieldSpec] = &[
    text("reference_number", 61, 23).req(),
    amount("tax_amount", 84, 12, 2, U),
    amount("tax_rate", 96, 7, 4, U),
    text("tax_type", 103, 1),
    text("purchase_identifier", 104, 25),
    text("customer_code", 129, 25),
    text("sales_tax_exempt", 154, 1),
    amount("discount_amount", 155, 12, 2, U),
    amount("freight_amount", 167, 12, 2, U),
    amount("duty_amount", 179, 12, 2, U),
    text("destination_zip", 191, 10),
    text("ship_from_zip", 201, 10),
    text("destination_country", 211, 3),
    date("order_date", 214, 6, DateFormat::Yymmdd),
];

const P2_FIELDS: &[FieldSpec] = &[
    text("reference_number", 61, 23).req(),
    int("line_item_number", 84, 4).req(),
    text("item_description", 88, 35),
    text("product_code", 123, 12),
    amount("quantity", 135, 12, 4, U),
    text("unit_of_measure", 147, 12),
    amount("unit_cost", 159, 12, 4, U),
    amount("line_item_total", 171, 12, 2, U),
    text("discount_indicator", 183, 1),
    text("commodity_code", 184, 12),
    amount("line_item_tax", 196, 12, 2, U),
];

const G2_FIELDS: &[FieldSpec] = &[
    text("reference_number", 61, 23).req(),
    text("merchant_tax_id", 84, 15),
    text("merchant_reference_number", 99, 17),
    text("market_specific_data", 116, 1),
    text("merchant_country", 117, 3),
    int("installment_count", 120, 2),
    amount("total_authorized_amount", 122, 12, 2, U),
    text("gateway_id", 134, 10),
    text("service_development_indicator", 144, 1),
];

const E1_FIELDS: &[FieldSpec] = &[
    text("reference_number", 61, 23).req(),
    text("emv_transaction_type", 84, 2),
    text("emv_application_cryptogram", 86, 16),
    text("emv_cryptogram_information_data", 102, 2),
    text("emv_application_interchange_profile", 104, 4),
    text("emv_application_transaction_counter", 108, 4),
    text("emv_terminal_verification_results", 112, 10),
    text("emv_unpredictable_number", 122, 8),
    amount("emv_amount_authorized", 130, 12, 2, U),
    date("emv_transaction_date", 142, 6, DateFormat::Yymmdd),
    text("emv_terminal_country_code", 148, 3),
    text("emv_transaction_currency_code", 151, 3),
    text("emv_issuer_application_data", 154, 64),
];

const DR_FIELDS: &[FieldSpec] = &[
    text("reference_number", 61, 23).req(),
    text("reject_reason_code", 84, 4).req(),
    date("reject_date", 88, 8, DateFormat::Ccyymmdd).req(),
    amount("reject_amount", 96, 11, 2, T),
    text("reject_description", 107, 40),
    date("original_transaction_date", 147, 8, DateFormat::Ccyymmdd),
];

const AD_FIELDS: &[FieldSpec] = &[
    date("adjustment_date", 55, 8, DateFormat::Mmddccyy).req(),
    text("adjustment_reference", 63, 16).req(),
    amount(
        "adjustment_amount",
        79,
        12,
        2,
        Sign::Indicator {
            field: "adjustment_indicator",
            negative: &["D"],
        },
    )
    .req(),
    text("adjustment_indicator", 91, 1),
    text("adjustment_reason", 92, 4),
    text("adjustment_description", 96, 40),
];

pub static DT_LAYOUT: RecordLayout = RecordLayout {
    code: "DT",
    description: "Detail transaction",
    table: "dt_records",
    specific: DT_FIELDS,
    key: &["reference_number"],
    parent: None,
    business_date: Some("transaction_date"),
};

pub static BH_LAYOUT: RecordLayout = RecordLayout {
    code: "BH",
    description: "Batch header",
    table: "bh_records",
    specific: BH_FIELDS,
    key: &["merchant_account_number", "batch_date", "batch_id"],
    parent: None,
    business_date: Some("batch_date"),
};

pub static P1_LAYOUT: RecordLayout = RecordLayout {
    code: "P1",
    description: "Purchasing card extension 1",
    table: "p1_records",
    specific: P1_FIELDS,
    key: &["reference_number"],
    parent: Some("reference_number"),
    business_date: None,
};

pub static P2_LAYOUT: RecordLayout = RecordLayout {
    code: "P2",
    description: "Purchasing card line item",
    table: "p2_records",
    specific: P2_FIELDS,
    key: &["reference_number", "line_item_number"],
    parent: Some("reference_number"),
    business_date: None,
};

pub static G2_LAYOUT: RecordLayout = RecordLayout {
    code: "G2",
    description: "General data 2",
    table: "g2_records",
    specific: G2_FIELDS,
    key: &["reference_number"],
    parent: Some("reference_number"),
    business_date: None,
};

pub static E1_LAYOUT: RecordLayout = RecordLayout {
    code: "E1",
    description: "EMV chip data",
    table: "e1_records",
    specific: E1_FIELDS,
    key: &["reference_number"],
    parent: Some("reference_number"),
    business_date: None,
};

pub static DR_LAYOUT: RecordLayout = RecordLayout {
    code: "DR",
    description: "Reject detail",
    table: "dr_records",
    specific: DR_FIELDS,
    key: &["reference_number", "reject_reason_code"],
    parent: Some("reference_number"),
    business_date: Some("reject_date"),
};

pub static AD_LAYOUT: RecordLayout = RecordLayout {
    code: "AD",
    description: "Merchant adjustment",
    table: "ad_records",
    specific: AD_FIELDS,
    key: &["merchant_account_number", "adjustment_reference"],
    parent: None,
    business_date: Some("adjustment_date"),
};

pub static OTHER_LAYOUT: RecordLayout = RecordLayout {
    code: "OTHER",
    description: "Unrecognized record identifier",
    table: "other_records",
    specific: &[],
    key: &[],
    parent: None,
    business_date: None,
};

pub fn all_layouts() -> impl Iterator<Item = &'static RecordLayout> {
    KNOWN_TYPES
        .iter()
        .map(|t| t.layout())
        .chain(std::iter::once(&OTHER_LAYOUT))
}

// ---------------------------------------------------------------------------
// LineBuilder renders synthetic records (demo data, tests)
// ---------------------------------------------------------------------------

pub struct LineBuilder {
    layout: &'static RecordLayout,
    buf: Vec<u8>,
}

impl LineBuilder {
    pub fn new(record_type: &RecordType) -> Self {
        let mut buf = vec![b' '; RECORD_WIDTH];
        let code = record_type.code().as_bytes();
        for (i, b) in code.iter().take(DISCRIMINATOR.len()).enumerate() {
            buf[DISCRIMINATOR.start + i] = *b;
        }
        Self {
            layout: record_type.layout(),
            buf,
        }
    }

    fn spec(&self, name: &str) -> Result<&'static FieldSpec> {
        self.layout.field(name).ok_or_else(|| TallyError::UnknownField {
            record_type: self.layout.code.to_string(),
            field: name.to_string(),
        })
    }

    /// Writes `value` left-aligned into the field, truncating to its width.
    pub fn set(mut self, name: &str, value: &str) -> Result<Self> {
        let spec = self.spec(name)?;
        let bytes = value.as_bytes();
        for i in 0..spec.len {
            self.buf[spec.start + i] = bytes.get(i).copied().unwrap_or(b' ');
        }
        Ok(self)
    }

    /// Writes an amount in minor units, zero-padded, honoring the field's sign
    /// convention.
    pub fn set_minor_units(self, name: &str, minor_units: i64) -> Result<Self> {
        let spec = self.spec(name)?;
        let FieldKind::Amount { sign, .. } = spec.kind else {
            return Err(TallyError::Other(format!("{name} is not an amount field")));
        };
        let digits = minor_units.unsigned_abs().to_string();
        let negative = minor_units < 0;
        match sign {
            Sign::Trailing => {
                let mark = if negative { "-" } else { "+" };
                let body = format!("{digits:0>width$}", width = spec.len - 1);
                self.set(name, &format!("{body}{mark}"))
            }
            Sign::Indicator { field, negative: marks } => {
                let body = format!("{digits:0>width$}", width = spec.len);
                let builder = self.set(name, &body)?;
                if negative {
                    builder.set(field, marks.first().copied().unwrap_or("-"))
                } else {
                    Ok(builder)
                }
            }
            Sign::Unsigned => {
                let body = format!("{digits:0>width$}", width = spec.len);
                self.set(name, &body)
            }
        }
    }

    pub fn build(self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}
