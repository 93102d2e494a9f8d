use super::*;
use crate::entry::ValueList;
use crate::key::MetaTuple;

fn leaf_entry(key: &str, rp: u8) -> LeafEntry {
    LeafEntry {
        key: Key::Str(key.into()),
        values: ValueList::Inline(vec![EntryValue {
            record_pointer: vec![rp],
            metadata: MetaTuple(vec![]),
        }]),
    }
}

#[test]
fn test_node_image_roundtrip() {
    let node = NodeImage {
        pivots: vec![(Key::Str("banana".into()), 40), (Key::Str("cherry".into()), 80)],
        gt_offset: 120,
    };
    let bare_len = node.body_len_without_padding().unwrap();
    let free = compute_free_bytes(2, 4, bare_len, None);
    let buf = node.encode(free).unwrap();
    let (decoded, total_len) = NodeImage::decode(&buf).unwrap();
    assert_eq!(total_len, buf.len());
    assert_eq!(decoded, node);
}

#[test]
fn test_node_decode_rejects_leaf_flag() {
    let mut buf = vec![];
    buf.extend_from_slice(&10u32.to_be_bytes());
    buf.push(1); // is-leaf = 1, invalid for a node
    buf.extend_from_slice(&0u32.to_be_bytes());
    buf.push(0);
    assert!(NodeImage::decode(&buf).is_err());
}

#[test]
fn test_leaf_image_roundtrip_without_ext_data() {
    let leaf = LeafImage {
        prev_offset: -10,
        next_offset: 200,
        ext_data: None,
        entries: vec![leaf_entry("apple", 1), leaf_entry("banana", 2)],
    };
    let bare_len = leaf.body_len_without_padding(true, OffsetWidth::W31).unwrap();
    let free = compute_free_bytes(2, 3, bare_len, None);
    let buf = leaf.encode(true, OffsetWidth::W31, free).unwrap();
    let (decoded, total_len) = LeafImage::decode(&buf, true, OffsetWidth::W31, 0).unwrap();
    assert_eq!(total_len, buf.len());
    assert_eq!(decoded, leaf);
}

#[test]
fn test_leaf_image_roundtrip_with_ext_data() {
    let leaf = LeafImage {
        prev_offset: 0,
        next_offset: 0,
        ext_data: Some((4096, 1024)),
        entries: vec![LeafEntry {
            key: Key::Str("k".into()),
            values: ValueList::ExtRef {
                total_values: 200,
                ptr: 300,
            },
        }],
    };
    let buf = leaf.encode(true, OffsetWidth::W31, 16).unwrap();
    let (decoded, total_len) = LeafImage::decode(&buf, true, OffsetWidth::W31, 0).unwrap();
    assert_eq!(total_len, buf.len());
    assert_eq!(decoded, leaf);
}

#[test]
fn test_leaf_image_with_max_length_padding() {
    let leaf = LeafImage {
        prev_offset: 0,
        next_offset: 0,
        ext_data: None,
        entries: vec![leaf_entry("x", 1)],
    };
    let bare_len = leaf.body_len_without_padding(true, OffsetWidth::W31).unwrap();
    let free = compute_free_bytes(1, 4, bare_len, Some(bare_len + 50));
    assert_eq!(free, 50);
    let buf = leaf.encode(true, OffsetWidth::W31, free).unwrap();
    assert_eq!(buf.len(), bare_len + 50);
}

#[test]
fn test_ext_data_block_roundtrip() {
    let block = ExtDataBlock {
        values: vec![
            EntryValue {
                record_pointer: vec![1, 2],
                metadata: MetaTuple(vec![]),
            },
            EntryValue {
                record_pointer: vec![3],
                metadata: MetaTuple(vec![]),
            },
        ],
    };
    let buf = block.encode(64).unwrap();
    let (decoded, free_len, block_len) = ExtDataBlock::decode(&buf, 0).unwrap();
    assert_eq!(block_len, buf.len());
    assert_eq!(free_len, 64);
    assert_eq!(decoded, block);
}
