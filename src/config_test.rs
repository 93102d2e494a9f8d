use super::*;

#[test]
fn test_flags_roundtrip_through_byte() {
    let flags = TreeFlags::default()
        .with_unique_keys(true)
        .with_metadata(true)
        .with_small_leaves(true);
    let byte = flags.to_byte();
    let back = TreeFlags::from_byte(byte);
    assert!(back.unique_keys());
    assert!(back.has_metadata());
    assert!(back.small_leaves());
    assert!(!back.large_pointers());
}

#[test]
fn test_header_encode_decode_roundtrip_full() {
    let header = Header {
        byte_length: 4096,
        flags: TreeFlags::default()
            .with_unique_keys(true)
            .with_metadata(true)
            .with_free_space(true)
            .with_fill_factor(true),
        max_entries: 64,
        fill_factor: Some(95),
        free_byte_length: Some(512),
        metadata_key_names: Some(vec!["tag".into(), "ttl".into()]),
    };
    let buf = header.encode().unwrap();
    let (decoded, n) = Header::decode(&buf).unwrap();
    assert_eq!(n, buf.len());
    assert_eq!(decoded, header);
}

#[test]
fn test_header_encode_decode_roundtrip_minimal() {
    let header = Header {
        byte_length: 128,
        flags: TreeFlags::default(),
        max_entries: 16,
        fill_factor: None,
        free_byte_length: None,
        metadata_key_names: None,
    };
    let buf = header.encode().unwrap();
    assert_eq!(buf.len(), 6);
    let (decoded, n) = Header::decode(&buf).unwrap();
    assert_eq!(n, 6);
    assert_eq!(decoded, header);
}

#[test]
fn test_config_entries_per_leaf_and_fan_out() {
    let mut cfg = Config::default();
    cfg.max_entries = 255;
    cfg.fill_factor = 80;
    assert_eq!(cfg.entries_per_leaf(), 204);
    assert_eq!(cfg.fan_out(), 256);
    assert_eq!(cfg.min_pivots_per_parent(), 127);
}

#[test]
fn test_config_flags_reflect_fields() {
    let mut cfg = Config::default();
    cfg.unique = false;
    cfg.metadata_keys = vec!["k".into()];
    cfg.large_pointers = true;
    let flags = cfg.flags();
    assert!(!flags.unique_keys());
    assert!(flags.has_metadata());
    assert!(flags.large_pointers());
}
