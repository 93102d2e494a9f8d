use super::*;

#[test]
fn test_encode_decode_roundtrip() {
    let keys = vec![
        Key::Absent,
        Key::Str("banana".to_string()),
        Key::Num(100.0),
        Key::Num(3.25),
        Key::Bool(true),
        Key::Bool(false),
        Key::Date(1_700_000_000_000),
    ];
    for key in keys {
        let mut buf = vec![];
        key.encode(&mut buf).unwrap();
        let (decoded, n) = Key::decode(&buf).unwrap();
        assert_eq!(n, buf.len());
        assert_eq!(key, decoded);
    }
}

#[test]
fn test_trailing_zero_trim_shrinks_round_numbers() {
    let mut buf = vec![];
    Key::Num(100.0).encode(&mut buf).unwrap();
    // tag + len + trimmed payload should be well under 2 + 8 bytes.
    assert!(buf.len() < 10);
}

#[test]
fn test_string_over_limit_fails() {
    let s = "x".repeat(256);
    let mut buf = vec![];
    let err = Key::Str(s).encode(&mut buf).unwrap_err();
    match err {
        Error::EncodingError(_) => {}
        _ => panic!("expected EncodingError"),
    }
}

#[test]
fn test_nan_rejected() {
    let mut buf = vec![];
    assert!(Key::Num(f64::NAN).encode(&mut buf).is_err());
}

#[test]
fn test_comparator_cross_type_order() {
    let mut keys = vec![
        Key::Str("a".to_string()),
        Key::Num(5.0),
        Key::Absent,
        Key::Bool(true),
        Key::Date(10),
    ];
    keys.sort();
    let ranks: Vec<u8> = keys.iter().map(|k| k.class_rank()).collect();
    assert_eq!(ranks, vec![0, 1, 2, 2, 3]);
}

#[test]
fn test_date_and_number_compare_numerically() {
    assert!(Key::Date(100) < Key::Num(200.0));
    assert!(Key::Num(50.0) < Key::Date(100));
}

#[test]
fn test_string_byte_lexicographic() {
    assert!(Key::Str("apple".into()) < Key::Str("banana".into()));
    assert!(Key::Str("banana".into()) < Key::Str("cherry".into()));
}

#[test]
fn test_meta_tuple_roundtrip() {
    let tuple = MetaTuple(vec![Key::Str("idx".into()), Key::Num(42.0), Key::Bool(true)]);
    let mut buf = vec![];
    tuple.encode(&mut buf).unwrap();
    let (decoded, n) = MetaTuple::decode(&buf, 3).unwrap();
    assert_eq!(n, buf.len());
    assert_eq!(tuple, decoded);
}

#[test]
fn test_record_pointer_validation() {
    assert!(validate_record_pointer(&vec![0u8; 255]).is_ok());
    assert!(validate_record_pointer(&vec![0u8; 256]).is_err());
}
