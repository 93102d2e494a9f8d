use super::*;
use crate::entry::{EntryValue, LeafEntry, ValueList};
use crate::key::MetaTuple;
use crate::source::MemSource;

const NODE_OFFSET: u64 = 0;
const LEAF0_OFFSET: u64 = 4096;
const LEAF1_OFFSET: u64 = 8192;

fn leaf_entry(key: &str, rp: u8) -> LeafEntry {
    LeafEntry {
        key: Key::Str(key.into()),
        values: ValueList::Inline(vec![EntryValue {
            record_pointer: vec![rp],
            metadata: MetaTuple(vec![]),
        }]),
    }
}

/// Builds a one-pivot tree: node at NODE_OFFSET with pivot "cherry",
/// leaf0 {apple, banana} at LEAF0_OFFSET, leaf1 {cherry, date} at
/// LEAF1_OFFSET, linked bidirectionally.
fn build_tree() -> (MemSource, Config) {
    let config = Config::default();
    let src = MemSource::new();

    let leaf0 = LeafImage {
        prev_offset: 0,
        next_offset: LEAF1_OFFSET as i64 - (LEAF0_OFFSET as i64 + 9 + 4),
        ext_data: None,
        entries: vec![leaf_entry("apple", 1), leaf_entry("banana", 2)],
    };
    let leaf1 = LeafImage {
        prev_offset: LEAF0_OFFSET as i64 - (LEAF1_OFFSET as i64 + 9),
        next_offset: 0,
        ext_data: None,
        entries: vec![leaf_entry("cherry", 3), leaf_entry("date", 4)],
    };

    let leaf0_buf = leaf0.encode(true, OffsetWidth::W31, 0).unwrap();
    let leaf1_buf = leaf1.encode(true, OffsetWidth::W31, 0).unwrap();
    src.write_at(LEAF0_OFFSET, &leaf0_buf).unwrap();
    src.write_at(LEAF1_OFFSET, &leaf1_buf).unwrap();

    // pivot field ends at node_offset + 10 (header) + key("cherry") len (8) + w(6).
    let pivot_field_end = NODE_OFFSET + 10 + 8 + 6;
    let gt_field_end = pivot_field_end + 6;
    let node = NodeImage {
        pivots: vec![(
            Key::Str("cherry".into()),
            LEAF0_OFFSET as i64 - pivot_field_end as i64,
        )],
        gt_offset: LEAF1_OFFSET as i64 - gt_field_end as i64,
    };
    let node_buf = node.encode(0).unwrap();
    assert_eq!(node_buf.len(), gt_field_end as usize);
    src.write_at(NODE_OFFSET, &node_buf).unwrap();

    (src, config)
}

#[test]
fn test_find_leaf_routes_to_correct_leaf() {
    let (src, config) = build_tree();
    let (offset, image, _) = find_leaf(&src, NODE_OFFSET, &Key::Str("banana".into()), &config, 0).unwrap();
    assert_eq!(offset, LEAF0_OFFSET);
    assert_eq!(image.entries[1].key, Key::Str("banana".into()));

    let (offset, image, _) = find_leaf(&src, NODE_OFFSET, &Key::Str("date".into()), &config, 0).unwrap();
    assert_eq!(offset, LEAF1_OFFSET);
    assert_eq!(image.entries[1].key, Key::Str("date".into()));
}

#[test]
fn test_get_first_and_last_leaf() {
    let (src, config) = build_tree();
    let (offset, image, byte_length) = get_first_leaf(&src, NODE_OFFSET, &config, 0).unwrap();
    assert_eq!(offset, LEAF0_OFFSET);
    assert_eq!(image.entries[0].key, Key::Str("apple".into()));
    assert!(byte_length > 0);

    let (offset, image, _) = get_last_leaf(&src, NODE_OFFSET, &config, 0).unwrap();
    assert_eq!(offset, LEAF1_OFFSET);
    assert_eq!(image.entries[1].key, Key::Str("date".into()));
}

#[test]
fn test_next_and_previous_walk_the_linked_list() {
    let (src, config) = build_tree();
    let (leaf0_offset, leaf0, _) = get_first_leaf(&src, NODE_OFFSET, &config, 0).unwrap();
    let (leaf1_offset, leaf1, _) = get_next(&src, leaf0_offset, &leaf0, &config, 0).unwrap().unwrap();
    assert_eq!(leaf1_offset, LEAF1_OFFSET);
    assert_eq!(leaf1.entries[0].key, Key::Str("cherry".into()));
    assert!(get_next(&src, leaf1_offset, &leaf1, &config, 0).unwrap().is_none());

    let (back_offset, back_leaf, _) = get_previous(&src, leaf1_offset, &leaf1, &config, 0).unwrap().unwrap();
    assert_eq!(back_offset, LEAF0_OFFSET);
    assert_eq!(back_leaf.entries[0].key, Key::Str("apple".into()));
}

#[test]
fn test_find_leaf_with_parent_reports_lt_and_gt_child_index() {
    let (src, config) = build_tree();
    let (parent, offset, _, _) = find_leaf_with_parent(&src, NODE_OFFSET, &Key::Str("apple".into()), &config, 0).unwrap();
    let parent = parent.expect("leaf0 has a parent");
    assert_eq!(parent.node_offset, NODE_OFFSET);
    assert_eq!(parent.child_index, Some(0));
    assert_eq!(offset, LEAF0_OFFSET);

    let (parent, offset, _, _) = find_leaf_with_parent(&src, NODE_OFFSET, &Key::Str("date".into()), &config, 0).unwrap();
    let parent = parent.expect("leaf1 has a parent");
    assert_eq!(parent.child_index, None);
    assert_eq!(offset, LEAF1_OFFSET);
}
