use super::*;
use crate::builder::Builder;
use crate::entry::ValueList;
use crate::key::MetaTuple;
use crate::search::{self, Operator, SearchRequest};
use crate::source::MemSource;

fn test_config(max_entries: u8, unique: bool) -> Config {
    Config {
        unique,
        metadata_keys: Vec::new(),
        max_entries,
        fill_factor: 100,
        small_leaves: true,
        large_pointers: false,
        add_free_space: false,
        auto_grow: true,
        ..Config::default()
    }
}

fn value(rp: u8) -> EntryValue {
    EntryValue {
        record_pointer: vec![rp],
        metadata: MetaTuple(vec![]),
    }
}

fn empty_tree(config: &Config) -> (MemSource, u64) {
    let built = Builder::new().build(config).unwrap();
    let src = MemSource::new();
    src.write_at(0, &built.bytes).unwrap();
    (src, built.root_offset)
}

fn new_mutator(src: &MemSource, tree_id: &str, config: &Config, root_offset: u64) -> Mutator<'_> {
    let total_length = src.snapshot().len() as u64;
    Mutator::new(src, tree_id, config.clone(), 0, Allocator::new(total_length, 0, true), root_offset)
}

fn find_values(src: &MemSource, root_offset: u64, config: &Config, key: &Key) -> Option<Vec<EntryValue>> {
    let response = search::search(
        src,
        root_offset,
        config,
        0,
        &Operator::Eq(key.clone()),
        &SearchRequest {
            want_entries: true,
            ..Default::default()
        },
    )
    .unwrap();
    response.entries.unwrap().into_iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

#[test]
fn test_add_then_find() {
    let config = test_config(4, true);
    let (src, root_offset) = empty_tree(&config);
    let mut mutator = new_mutator(&src, "add-find", &config, root_offset);

    mutator.add(Key::Str("apple".into()), value(1)).unwrap();

    let found = find_values(&src, mutator.root_offset(), &config, &Key::Str("apple".into()));
    assert_eq!(found, Some(vec![value(1)]));
}

#[test]
fn test_add_rejects_duplicate_key_on_unique_tree() {
    let config = test_config(4, true);
    let (src, root_offset) = empty_tree(&config);
    let mut mutator = new_mutator(&src, "dup-key", &config, root_offset);

    mutator.add(Key::Str("a".into()), value(1)).unwrap();
    let err = mutator.add(Key::Str("a".into()), value(2)).unwrap_err();
    assert!(matches!(err, Error::DuplicateKey(_)));
}

#[test]
fn test_add_appends_on_non_unique_tree() {
    let config = test_config(4, false);
    let (src, root_offset) = empty_tree(&config);
    let mut mutator = new_mutator(&src, "non-unique", &config, root_offset);

    mutator.add(Key::Str("a".into()), value(1)).unwrap();
    mutator.add(Key::Str("a".into()), value(2)).unwrap();

    let found = find_values(&src, mutator.root_offset(), &config, &Key::Str("a".into())).unwrap();
    assert_eq!(found, vec![value(1), value(2)]);
}

/// Mirrors the shape of the forced-split walkthrough: with maxEntries=4,
/// adding keys 1..5 to a single leaf overflows it into two leaves
/// {1,2}/{3,4,5}, linked to each other, with a freshly synthesized
/// single-pivot root.
#[test]
fn test_add_forces_leaf_split() {
    let config = test_config(4, true);
    let (src, root_offset) = empty_tree(&config);
    let mut mutator = new_mutator(&src, "split", &config, root_offset);

    for i in 1..=5u8 {
        mutator.add(Key::Num(i as f64), value(i)).unwrap();
    }

    let (parent, leaf0_offset, leaf0, _) =
        navigator::find_leaf_with_parent(&src, mutator.root_offset(), &Key::Num(1.0), &config, 0).unwrap();
    let parent = parent.expect("split leaves now sit under a synthesized root");
    assert_eq!(parent.node_offset, mutator.root_offset());
    assert_eq!(leaf0.entries.len(), 2);
    assert_eq!(leaf0.entries[0].key, Key::Num(1.0));
    assert_eq!(leaf0.entries[1].key, Key::Num(2.0));

    let (leaf1_offset, leaf1, _) = navigator::get_next(&src, leaf0_offset, &leaf0, &config, 0).unwrap().unwrap();
    assert_eq!(leaf1.entries.len(), 3);
    assert_eq!(leaf1.entries[0].key, Key::Num(3.0));
    assert_eq!(leaf1.entries[1].key, Key::Num(4.0));
    assert_eq!(leaf1.entries[2].key, Key::Num(5.0));

    let (back_offset, _, _) = navigator::get_previous(&src, leaf1_offset, &leaf1, &config, 0).unwrap().unwrap();
    assert_eq!(back_offset, leaf0_offset);

    for i in 1..=5u8 {
        assert_eq!(
            find_values(&src, mutator.root_offset(), &config, &Key::Num(i as f64)),
            Some(vec![value(i)])
        );
    }
}

/// Spills a growing value list into ext_data once it outgrows the
/// small-leaf inline budget, then exercises `ext_data.addValue` and
/// `ext_data.removeValue` against the redirect.
#[test]
fn test_ext_data_add_and_remove_value_round_trip() {
    let config = test_config(4, false);
    let (src, root_offset) = empty_tree(&config);
    let mut mutator = new_mutator(&src, "ext-data", &config, root_offset);

    let key = Key::Str("wide".into());
    for i in 0..63u8 {
        mutator.add(key.clone(), value(i)).unwrap();
    }
    mutator.ext_data_add_value(&key, value(63)).unwrap();

    let (_, _, leaf, _) = navigator::find_leaf_with_parent(&src, mutator.root_offset(), &key, &config, 0).unwrap();
    let entry = leaf.entries.iter().find(|e| e.key == key).unwrap();
    assert!(matches!(entry.values, ValueList::ExtRef { .. }));
    assert_eq!(entry.values.total_values(), 64);

    let removed = mutator.ext_data_remove_value(&key, &[30]).unwrap();
    assert_eq!(removed, value(30));

    let (_, leaf_offset_after, leaf_after, byte_length_after) =
        navigator::find_leaf_with_parent(&src, mutator.root_offset(), &key, &config, 0).unwrap();
    let entry_after = leaf_after.entries.iter().find(|e| e.key == key).unwrap();
    assert_eq!(entry_after.values.total_values(), 63);

    let materialized = search::materialize(&src, leaf_offset_after, byte_length_after, &entry_after.values, 0).unwrap();
    assert!(!materialized.iter().any(|v| v.record_pointer == vec![30]));
    assert_eq!(materialized.len(), 63);
}

#[test]
fn test_remove_drops_entry_and_restores_prior_find_result() {
    let config = test_config(4, true);
    let (src, root_offset) = empty_tree(&config);
    let mut mutator = new_mutator(&src, "remove", &config, root_offset);

    mutator.add(Key::Str("a".into()), value(1)).unwrap();
    mutator.add(Key::Str("b".into()), value(2)).unwrap();

    let removed = mutator.remove(&Key::Str("a".into()), None).unwrap();
    assert_eq!(removed, value(1));

    assert_eq!(find_values(&src, mutator.root_offset(), &config, &Key::Str("a".into())), None);
    assert_eq!(
        find_values(&src, mutator.root_offset(), &config, &Key::Str("b".into())),
        Some(vec![value(2)])
    );

    let err = mutator.remove(&Key::Str("a".into()), None).unwrap_err();
    assert!(matches!(err, Error::KeyNotFound(_)));
}
