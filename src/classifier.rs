use crate::layout::{RecordType, DISCRIMINATOR};

/// Decides which field map applies to a raw line by reading the record
/// identifier. Never fails: short lines and unknown identifiers are `Other`.
pub fn classify(raw_line: &[u8]) -> RecordType {
    let code = raw_line
        .get(DISCRIMINATOR)
        .and_then(|b| std::str::from_utf8(b).ok())
        .unwrap_or("");
    RecordType::from_code(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LineBuilder;

    fn line_with_code(code: &str) -> String {
        format!("{:<17}{code}{}", "0000001", " ".repeat(50))
    }

    #[test]
    fn test_known_codes() {
        assert_eq!(classify(line_with_code("DT").as_bytes()), RecordType::DetailTransaction);
        assert_eq!(classify(line_with_code("BH").as_bytes()), RecordType::BatchHeader);
        assert_eq!(classify(line_with_code("P1").as_bytes()), RecordType::PurchasingExtension1);
        assert_eq!(classify(line_with_code("P2").as_bytes()), RecordType::PurchasingExtension2);
        assert_eq!(classify(line_with_code("G2").as_bytes()), RecordType::GeneralData2);
        assert_eq!(classify(line_with_code("E1").as_bytes()), RecordType::EmvData);
        assert_eq!(classify(line_with_code("DR").as_bytes()), RecordType::RejectDetail);
        assert_eq!(classify(line_with_code("AD").as_bytes()), RecordType::MerchantAdjustment);
    }

    #[test]
    fn test_unknown_code_is_other() {
        assert_eq!(classify(line_with_code("ZZ").as_bytes()), RecordType::Other("ZZ".to_string()));
        // Case matters: identifiers are upper case in the format.
        assert!(classify(line_with_code("dt").as_bytes()).is_other());
    }

    #[test]
    fn test_short_or_empty_line_is_other() {
        assert_eq!(classify(b""), RecordType::Other(String::new()));
        assert_eq!(classify(b"0000001DT"), RecordType::Other(String::new()));
        assert_eq!(classify("x".repeat(18).as_bytes()), RecordType::Other(String::new()));
    }

    #[test]
    fn test_multibyte_at_discriminator_is_other() {
        let line = format!("{}é{}", "0".repeat(17), " ".repeat(40));
        assert!(classify(line.as_bytes()).is_other());
    }

    #[test]
    fn test_latin1_byte_at_discriminator_is_other() {
        let mut line = format!("{}DT{}", "0".repeat(17), " ".repeat(40)).into_bytes();
        line[18] = 0xC9;
        assert!(classify(&line).is_other());
    }

    #[test]
    fn test_builder_output_classifies_as_its_type() {
        for t in crate::layout::KNOWN_TYPES {
            assert_eq!(&classify(LineBuilder::new(t).build().as_bytes()), t);
        }
    }
}
