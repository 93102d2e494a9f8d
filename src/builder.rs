//! Module `builder` is the in-memory builder (component D): accumulates
//! sorted `(key, value-list)` pairs and emits a well-balanced tree
//! bottom-up as a single ready-to-write byte image (§4.D). The streaming
//! variant that avoids holding everything in memory (component K) is not
//! yet implemented in this crate.

use std::collections::BTreeMap;

use crate::config::Config;
use crate::entry::{EntryValue, LeafEntry, ValueList};
use crate::error::{Error, Result};
use crate::key::Key;
use crate::layout::{compute_free_bytes, ExtDataBlock, LeafImage, NodeImage, NODE_OFFSET_WIDTH};

/// Past this encoded value-section length, an entry's value list spills
/// into ext_data instead of inlining (§3 "Leaf entry"). Small leaves cap
/// the inline val-length field at 7 bits, the 8th being the ext_data flag.
pub(crate) const SMALL_LEAF_INLINE_LIMIT: usize = 127;
pub(crate) const LARGE_LEAF_INLINE_LIMIT: usize = 0x7FFF_FFFF;

/// Accumulates entries before a one-shot [Builder::build]. The staging
/// map exists only to sort and de-duplicate keys ahead of layout; unlike
/// the teacher's `llrb`/`mvcc` trees it is not a long-lived index itself.
#[derive(Default)]
pub struct Builder {
    entries: BTreeMap<Key, Vec<EntryValue>>,
}

impl Builder {
    pub fn new() -> Builder {
        Builder { entries: BTreeMap::new() }
    }

    /// Stage one value under `key`. Multiple calls with the same key
    /// accumulate a non-unique value list; [Builder::build] rejects that
    /// for a unique-keys [Config].
    pub fn add(&mut self, key: Key, value: EntryValue) {
        self.entries.entry(key).or_insert_with(Vec::new).push(value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the on-disk byte image per §4.D/§4.E: header at offset 0,
    /// every leaf and node packed back to back after it.
    pub fn build(self, config: &Config) -> Result<BuiltTree> {
        build_tree(self.entries.into_iter().collect(), config)
    }
}

/// A freshly built tree, ready to hand to a [crate::source::ByteSource]
/// (e.g. via `write_at(0, &bytes)`).
pub struct BuiltTree {
    pub bytes: Vec<u8>,
    pub root_offset: u64,
}

/// Shared with the mutator (component H), which plans a rebuilt leaf's
/// content the same way the builder plans a fresh one.
pub(crate) struct LeafPlan {
    pub(crate) entries: Vec<LeafEntry>,
    pub(crate) ext_blocks: Vec<(ExtDataBlock, usize)>,
    pub(crate) ext_total: u64,
    pub(crate) ext_free: u32,
}

enum SlotKind {
    Leaf(LeafPlan),
    Internal { pivots: Vec<(Key, usize)>, gt_child: usize },
}

struct Slot {
    kind: SlotKind,
    first_key: Key,
    body_len: usize,
    free_bytes: usize,
    extra: u64,
    offset: u64,
}

pub(crate) fn inline_limit(config: &Config) -> usize {
    if config.small_leaves {
        SMALL_LEAF_INLINE_LIMIT
    } else {
        LARGE_LEAF_INLINE_LIMIT
    }
}

fn inline_body_len(values: &[EntryValue]) -> Result<usize> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(values.len() as u32).to_be_bytes());
    for value in values {
        value.encode(&mut buf)?;
    }
    Ok(buf.len())
}

/// Classify and lay out one leaf's worth of `(key, values)` pairs,
/// spilling any oversized value list into its own ext_data block (§4.H
/// `ext_data`). Ext_data blocks for a single leaf are packed back to back
/// in the leaf's ext_data region; each entry's `ptr` is the byte offset
/// of its own block's start within that region.
pub(crate) fn plan_leaf(window: &[(Key, Vec<EntryValue>)], config: &Config, inline_limit: usize) -> Result<LeafPlan> {
    let mut entries = Vec::with_capacity(window.len());
    let mut spill_indices = Vec::new();
    let mut spill_values: Vec<Vec<EntryValue>> = Vec::new();

    for (key, values) in window {
        let body_len = inline_body_len(values)?;
        if body_len <= inline_limit {
            entries.push(LeafEntry {
                key: key.clone(),
                values: ValueList::Inline(values.clone()),
            });
        } else {
            spill_indices.push(entries.len());
            spill_values.push(values.clone());
            entries.push(LeafEntry {
                key: key.clone(),
                values: ValueList::ExtRef {
                    total_values: values.len() as u32,
                    ptr: 0,
                },
            });
        }
    }

    let mut ext_blocks = Vec::with_capacity(spill_values.len());
    let mut running_ptr: u64 = 0;
    let mut ext_free_sum: u32 = 0;
    for (i, values) in spill_values.into_iter().enumerate() {
        let mut values_bytes = Vec::new();
        for value in &values {
            value.encode(&mut values_bytes)?;
        }
        let free = if config.add_free_space {
            (values_bytes.len() as f64 * 0.1).ceil() as usize
        } else {
            0
        };
        let total_values = values.len() as u32;
        let block = ExtDataBlock { values };
        let block_len = 12 + values_bytes.len() + free;

        let entry_idx = spill_indices[i];
        entries[entry_idx].values = ValueList::ExtRef { total_values, ptr: running_ptr };

        running_ptr += block_len as u64;
        ext_free_sum += free as u32;
        ext_blocks.push((block, free));
    }

    Ok(LeafPlan {
        entries,
        ext_blocks,
        ext_total: running_ptr,
        ext_free: ext_free_sum,
    })
}

pub(crate) fn leaf_ext_header(plan: &LeafPlan) -> Option<(u32, u32)> {
    if plan.ext_blocks.is_empty() {
        None
    } else {
        Some((plan.ext_total as u32, plan.ext_free))
    }
}

pub(crate) fn leaf_size(plan: &LeafPlan, config: &Config) -> Result<(usize, usize)> {
    let probe = LeafImage {
        prev_offset: 0,
        next_offset: 0,
        ext_data: leaf_ext_header(plan),
        entries: plan.entries.clone(),
    };
    let body_len = probe.body_len_without_padding(config.small_leaves, config.offset_width())?;
    let free_bytes = if config.add_free_space {
        compute_free_bytes(plan.entries.len(), config.max_entries as usize, body_len, None)
    } else {
        0
    };
    Ok((body_len, free_bytes))
}

fn node_size(pivot_keys: &[Key], config: &Config) -> Result<(usize, usize)> {
    let probe = NodeImage {
        pivots: pivot_keys.iter().cloned().map(|k| (k, 0i64)).collect(),
        gt_offset: 0,
    };
    let body_len = probe.body_len_without_padding()?;
    let free_bytes = if config.add_free_space {
        compute_free_bytes(pivot_keys.len(), config.max_entries as usize, body_len, None)
    } else {
        0
    };
    Ok((body_len, free_bytes))
}

/// Build one parent level (§4.D steps 4-5): group the current level's
/// nodes into chunks of `fan_out`, the first `len-1` of each chunk become
/// lt-children (pivot key = first key of the *next* child), the last
/// becomes the gt-child. A terminal chunk with fewer than
/// `min_pivots_per_parent` pivots steals children from its predecessor,
/// re-homing the moved subtree and recomputing both chunks' pivots from
/// scratch (so the stolen pivot's key is always the moved subtree's own
/// first key, per §4.D step 5).
fn build_level(arena: &mut Vec<Slot>, current: Vec<usize>, fan_out: usize, min_pivots: usize, config: &Config) -> Result<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = current.chunks(fan_out.max(1)).map(|c| c.to_vec()).collect();

    if groups.len() >= 2 {
        loop {
            let last_pivots = groups.last().unwrap().len().saturating_sub(1);
            if last_pivots >= min_pivots {
                break;
            }
            let prev_len = groups[groups.len() - 2].len();
            if prev_len <= 1 {
                break;
            }
            let prev_idx = groups.len() - 2;
            let moved = groups[prev_idx].pop().unwrap();
            groups.last_mut().unwrap().insert(0, moved);
        }
    }

    let mut next_level = Vec::with_capacity(groups.len());
    for group in groups {
        if group.len() == 1 {
            next_level.push(group[0]);
            continue;
        }
        let gt_child = *group.last().unwrap();
        let mut pivots = Vec::with_capacity(group.len() - 1);
        for i in 0..group.len() - 1 {
            let next_child = group[i + 1];
            pivots.push((arena[next_child].first_key.clone(), group[i]));
        }
        let first_key = arena[group[0]].first_key.clone();
        let pivot_keys: Vec<Key> = pivots.iter().map(|(k, _)| k.clone()).collect();
        let (body_len, free_bytes) = node_size(&pivot_keys, config)?;

        let slot_idx = arena.len();
        arena.push(Slot {
            kind: SlotKind::Internal { pivots, gt_child },
            first_key,
            body_len,
            free_bytes,
            extra: 0,
            offset: 0,
        });
        next_level.push(slot_idx);
    }
    Ok(next_level)
}

fn build_tree(sorted: Vec<(Key, Vec<EntryValue>)>, config: &Config) -> Result<BuiltTree> {
    if config.unique {
        if let Some((key, _)) = sorted.iter().find(|(_, values)| values.len() > 1) {
            return Err(Error::DuplicateKey(format!("{:?}", key)));
        }
    }

    let inline_limit = if config.small_leaves { SMALL_LEAF_INLINE_LIMIT } else { LARGE_LEAF_INLINE_LIMIT };
    let entries_per_leaf = config.entries_per_leaf();

    let windows: Vec<&[(Key, Vec<EntryValue>)]> = if sorted.is_empty() {
        Vec::new()
    } else {
        sorted.chunks(entries_per_leaf).collect()
    };

    let mut arena: Vec<Slot> = Vec::new();
    let mut leaf_indices = Vec::new();

    if windows.is_empty() {
        let plan = LeafPlan { entries: Vec::new(), ext_blocks: Vec::new(), ext_total: 0, ext_free: 0 };
        let (body_len, free_bytes) = leaf_size(&plan, config)?;
        arena.push(Slot {
            kind: SlotKind::Leaf(plan),
            first_key: Key::Absent,
            body_len,
            free_bytes,
            extra: 0,
            offset: 0,
        });
        leaf_indices.push(0);
    } else {
        for window in &windows {
            let plan = plan_leaf(window, config, inline_limit)?;
            let (body_len, free_bytes) = leaf_size(&plan, config)?;
            let extra = plan.ext_total;
            let first_key = plan
                .entries
                .first()
                .map(|e| e.key.clone())
                .unwrap_or(Key::Absent);
            leaf_indices.push(arena.len());
            arena.push(Slot {
                kind: SlotKind::Leaf(plan),
                first_key,
                body_len,
                free_bytes,
                extra,
                offset: 0,
            });
        }
    }

    let fan_out = config.fan_out();
    let min_pivots = config.min_pivots_per_parent();
    let mut current: Vec<usize> = (0..arena.len()).collect();
    while current.len() > 1 {
        current = build_level(&mut arena, current, fan_out, min_pivots, config)?;
    }
    let root_idx = current[0];

    let header = config.to_header(0, 0);
    let header_len = header.encode()?.len() as u64;

    let mut cursor = header_len;
    for slot in arena.iter_mut() {
        slot.offset = cursor;
        cursor += slot.body_len as u64 + slot.free_bytes as u64 + slot.extra;
    }
    let total_len = cursor;
    let root_offset = arena[root_idx].offset;

    let mut out = Vec::with_capacity(total_len as usize);
    let final_header = config.to_header(total_len as u32, 0);
    out.extend(final_header.encode()?);

    for (i, slot) in arena.iter().enumerate() {
        match &slot.kind {
            SlotKind::Leaf(plan) => {
                let leaf_pos = leaf_indices.iter().position(|&idx| idx == i).unwrap();
                let prev_offset = if leaf_pos > 0 {
                    let prev_abs = arena[leaf_indices[leaf_pos - 1]].offset;
                    let base = slot.offset + 9;
                    prev_abs as i64 - base as i64
                } else {
                    0
                };
                let next_offset = if leaf_pos + 1 < leaf_indices.len() {
                    let next_abs = arena[leaf_indices[leaf_pos + 1]].offset;
                    let base = slot.offset + 9 + config.offset_width().byte_len() as u64;
                    next_abs as i64 - base as i64
                } else {
                    0
                };

                let leaf_image = LeafImage {
                    prev_offset,
                    next_offset,
                    ext_data: leaf_ext_header(plan),
                    entries: plan.entries.clone(),
                };
                out.extend(leaf_image.encode(config.small_leaves, config.offset_width(), slot.free_bytes)?);
                for (block, free) in &plan.ext_blocks {
                    out.extend(block.encode(*free)?);
                }
            }
            SlotKind::Internal { pivots, gt_child } => {
                let node_offset = slot.offset;
                let mut field_end = node_offset + 10;
                let mut resolved_pivots = Vec::with_capacity(pivots.len());
                for (key, child_idx) in pivots {
                    let mut scratch = Vec::new();
                    key.encode(&mut scratch)?;
                    field_end += scratch.len() as u64 + NODE_OFFSET_WIDTH.byte_len() as u64;
                    let child_abs = arena[*child_idx].offset;
                    resolved_pivots.push((key.clone(), child_abs as i64 - field_end as i64));
                }
                let gt_field_end = field_end + NODE_OFFSET_WIDTH.byte_len() as u64;
                let gt_abs = arena[*gt_child].offset;
                let gt_offset = gt_abs as i64 - gt_field_end as i64;

                let node_image = NodeImage { pivots: resolved_pivots, gt_offset };
                out.extend(node_image.encode(slot.free_bytes)?);
            }
        }
    }

    Ok(BuiltTree { bytes: out, root_offset })
}

#[cfg(test)]
#[path = "builder_test.rs"]
mod builder_test;
