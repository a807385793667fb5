use crate::cli::inbox::unique_destination;
use crate::cli::open_db;
use crate::error::Result;
use crate::layout::{LineBuilder, RecordType};
use crate::settings::Settings;

const MERCHANT: &str = "0000123456789012";

struct DemoSale {
    reference: &'static str,
    date: &'static str,
    cents: i64,
    merchant_name: &'static str,
    card_type: &'static str,
    mcc: &'static str,
    credit: bool,
}

const SALES: &[DemoSale] = &[
    DemoSale { reference: "74020214015000000000001", date: "20240115", cents: 4599, merchant_name: "CORNER CAFE", card_type: "VS", mcc: "5812", credit: false },
    DemoSale { reference: "74020214015000000000002", date: "20240115", cents: 128_000, merchant_name: "CORNER CAFE CATERING", card_type: "MC", mcc: "5812", credit: false },
    DemoSale { reference: "74020214015000000000003", date: "20240115", cents: 250_075, merchant_name: "CORNER CAFE SUPPLY", card_type: "VS", mcc: "5046", credit: false },
    DemoSale { reference: "74020214015000000000004", date: "20240115", cents: 1250, merchant_name: "CORNER CAFE", card_type: "AX", mcc: "5812", credit: false },
    DemoSale { reference: "74020214015000000000005", date: "20240115", cents: 4599, merchant_name: "CORNER CAFE", card_type: "VS", mcc: "5812", credit: true },
    DemoSale { reference: "74020214015000000000006", date: "20240116", cents: 890, merchant_name: "CORNER CAFE", card_type: "DS", mcc: "5812", credit: false },
];

fn header(record_type: &RecordType, seq: usize) -> Result<LineBuilder> {
    LineBuilder::new(record_type)
        .set("sequence_number", &format!("{seq:07}"))?
        .set("entry_run_number", "0001")?
        .set("bank_number", "0047")?
        .set("merchant_account_number", MERCHANT)?
        .set("association_number", "000123")?
        .set("group_number", "000001")
}

fn sale(seq: usize, s: &DemoSale) -> Result<String> {
    let minor_units = if s.credit { -s.cents } else { s.cents };
    Ok(header(&RecordType::DetailTransaction, seq)?
        .set("transaction_code", if s.credit { "0006" } else { "0005" })?
        .set("batch_julian_date", "24015")?
        .set("debit_credit_indicator", "D")?
        .set("reference_number", s.reference)?
        .set("transaction_date", s.date)?
        .set_minor_units("transaction_amount", minor_units)?
        .set_minor_units("net_deposit", minor_units - s.cents / 50)?
        .set("cardholder_account_number", "411111XXXXXX1111")?
        .set_minor_units("authorization_amount", s.cents)?
        .set("merchant_name", s.merchant_name)?
        .set("authorization_number", "A1B2C3")?
        .set("card_type", s.card_type)?
        .set("mcc", s.mcc)?
        .set("terminal_id", "T0000042")?
        .set_minor_units("interchange_fee", s.cents / 50)?
        .set("settlement_date", "240116")?
        .set("currency_code", "840")?
        .set("merchant_city", "PORTLAND")?
        .set("merchant_state", "OR")?
        .build())
}

/// A day's worth of records covering every type, plus a duplicate, a
/// malformed line and an unknown identifier.
pub fn sample_lines() -> Result<Vec<String>> {
    let mut lines = Vec::new();
    let mut seq = 0;
    let mut next = || {
        seq += 1;
        seq
    };

    let total: i64 = SALES.iter().map(|s| if s.credit { -s.cents } else { s.cents }).sum();
    lines.push(
        header(&RecordType::BatchHeader, next())?
            .set("transaction_code", "0100")?
            .set("batch_date", "01152024")?
            .set("batch_julian_date", "24015")?
            .set("bh_record_number", "000000001")?
            .set("batch_id", "B00001")?
            .set_minor_units("net_deposit", total)?
            .set("net_deposit_indicator", "C")?
            .set("transaction_count", &format!("{:07}", SALES.len()))?
            .set("processing_date", "240116")?
            .build(),
    );

    for s in SALES {
        lines.push(sale(next(), s)?);
    }
    let purchasing = SALES[2].reference;
    lines.push(
        header(&RecordType::PurchasingExtension1, next())?
            .set("reference_number", purchasing)?
            .set_minor_units("tax_amount", 20_006)?
            .set("tax_rate", "0000800")?
            .set("purchase_identifier", "PO-2024-0117")?
            .set("customer_code", "CUST-0042")?
            .set("destination_zip", "97205")?
            .set("order_date", "240112")?
            .build(),
    );
    for (item, (description, qty, unit_cents)) in [("ESPRESSO BEANS 5LB", 10, 18_500), ("PAPER CUPS 12OZ", 25, 2_603)]
        .into_iter()
        .enumerate()
    {
        lines.push(
            header(&RecordType::PurchasingExtension2, next())?
                .set("reference_number", purchasing)?
                .set("line_item_number", &format!("{:04}", item + 1))?
                .set("item_description", description)?
                .set_minor_units("quantity", qty * 10_000)?
                .set("unit_of_measure", "EA")?
                .set_minor_units("unit_cost", unit_cents * 100)?
                .set_minor_units("line_item_total", qty * unit_cents)?
                .build(),
        );
    }
    lines.push(
        header(&RecordType::GeneralData2, next())?
            .set("reference_number", SALES[1].reference)?
            .set("merchant_tax_id", "93-1234567")?
            .set("merchant_country", "USA")?
            .set_minor_units("total_authorized_amount", SALES[1].cents)?
            .build(),
    );
    lines.push(
        header(&RecordType::EmvData, next())?
            .set("reference_number", SALES[0].reference)?
            .set("emv_transaction_type", "00")?
            .set("emv_application_cryptogram", "9F2608A1B2C3D4E5")?
            .set_minor_units("emv_amount_authorized", SALES[0].cents)?
            .set("emv_transaction_date", "240115")?
            .set("emv_terminal_country_code", "840")?
            .build(),
    );
    lines.push(
        header(&RecordType::RejectDetail, next())?
            .set("reference_number", SALES[3].reference)?
            .set("reject_reason_code", "R014")?
            .set("reject_date", "20240116")?
            .set_minor_units("reject_amount", -SALES[3].cents)?
            .set("reject_description", "INVALID CARD NUMBER")?
            .set("original_transaction_date", SALES[3].date)?
            .build(),
    );
    lines.push(
        header(&RecordType::MerchantAdjustment, next())?
            .set("adjustment_date", "01162024")?
            .set("adjustment_reference", "ADJ0000000000001")?
            .set_minor_units("adjustment_amount", -2_500)?
            .set("adjustment_indicator", "D")?
            .set("adjustment_reason", "FEE1")?
            .set("adjustment_description", "MONTHLY STATEMENT FEE")?
            .build(),
    );

    // Resubmitted sale: same reference as the first DT.
    lines.push(sale(next(), &SALES[0])?);
    // Corrupted amount.
    lines.push(
        header(&RecordType::DetailTransaction, next())?
            .set("reference_number", "74020214015000000000099")?
            .set("transaction_date", "20240115")?
            .set("transaction_amount", "0000#45.99")?
            .build(),
    );
    // Identifier this layout table does not know.
    lines.push(header(&RecordType::Other("ZZ".to_string()), next())?.build());

    Ok(lines)
}

pub fn run(settings: &Settings) -> Result<()> {
    // Fail early with the init hint if there is no database yet.
    open_db(settings)?;
    let inbox = settings.inbox_dir();
    std::fs::create_dir_all(&inbox)?;

    let lines = sample_lines()?;
    let path = unique_destination(&inbox, "demo-settlement.txt");
    std::fs::write(&path, format!("{}\n", lines.join("\n")))?;

    println!("Wrote {} demo records to {}", lines.len(), path.display());
    println!("Next: `tally inbox`, then `tally drain`, then `tally status`.");
    Ok(())
}
