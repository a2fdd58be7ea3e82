use broute_rs::util::hex::{decode_hex, hex_to_signed, hex_to_unsigned, is_hex, is_ipv6_literal};
use proptest::prelude::*;

#[test]
fn test_hex_to_signed_known_values() {
    assert_eq!(hex_to_signed("0001", None).unwrap(), 1);
    assert_eq!(hex_to_signed("FFFF", None).unwrap(), -1);
    assert_eq!(hex_to_signed("8000", None).unwrap(), -32768);
    assert_eq!(hex_to_signed("7FFF", None).unwrap(), 32767);
    assert_eq!(hex_to_signed("FFFFFC18", None).unwrap(), -1000);
}

#[test]
fn test_hex_to_signed_explicit_width() {
    // The declared width wins over the string length.
    assert_eq!(hex_to_signed("FF", Some(4)).unwrap(), 255);
    assert_eq!(hex_to_signed("FF", Some(2)).unwrap(), -1);
    // A value that does not fit the declared width is rejected.
    assert!(hex_to_signed("FFFF", Some(2)).is_err());
}

#[test]
fn test_hex_to_signed_rejects_garbage() {
    assert!(hex_to_signed("", None).is_err());
    assert!(hex_to_signed("XYZ", None).is_err());
    assert!(hex_to_signed("FFFFFFFFFFFFFFFFFF", None).is_err()); // > 64 bits
}

#[test]
fn test_hex_to_unsigned() {
    assert_eq!(hex_to_unsigned("04A5").unwrap(), 1189);
    assert!(hex_to_unsigned("zz").is_err());
}

#[test]
fn test_is_hex_is_strict_about_case() {
    assert!(is_hex("0E1A", Some(4)));
    assert!(!is_hex("0e1a", Some(4)));
}

#[test]
fn test_is_ipv6_literal_requires_full_groups() {
    assert!(is_ipv6_literal("FE80:0000:0000:0000:021D:1290:1234:5678"));
    assert!(!is_ipv6_literal("FE80::1"));
}

#[test]
fn test_decode_hex() {
    assert_eq!(decode_hex("1081").unwrap(), vec![0x10, 0x81]);
    assert!(decode_hex("108").is_err());
}

proptest! {
    // Two's-complement decode must agree with the native signed
    // reinterpretation at every width the meter uses.
    #[test]
    fn prop_hex_to_signed_matches_i8(v in any::<i8>()) {
        let hex = format!("{:02X}", v as u8);
        prop_assert_eq!(hex_to_signed(&hex, None).unwrap(), v as i64);
    }

    #[test]
    fn prop_hex_to_signed_matches_i16(v in any::<i16>()) {
        let hex = format!("{:04X}", v as u16);
        prop_assert_eq!(hex_to_signed(&hex, None).unwrap(), v as i64);
    }

    #[test]
    fn prop_hex_to_signed_matches_i32(v in any::<i32>()) {
        let hex = format!("{:08X}", v as u32);
        prop_assert_eq!(hex_to_signed(&hex, None).unwrap(), v as i64);
    }

    #[test]
    fn prop_roundtrip_unsigned(v in any::<u32>()) {
        let hex = format!("{v:08X}");
        prop_assert_eq!(hex_to_unsigned(&hex).unwrap(), v as u64);
    }
}
