//! Module `mutator` is the mutator (component H): `add`/`remove`/`update`
//! and the `ext_data` value-list operations, each resolving a key to its
//! leaf, replanning that leaf's content around the edit, and writing the
//! result back in place, via a fresh allocation, or via a leaf split
//! (§4.H). Concurrency is layered on top of [crate::lock]'s named
//! registry: a tree-wide lock serializes structural changes (root swaps,
//! parent rewrites) and a leaf-scoped lock narrows the window for edits
//! that stay within one leaf.

use log::debug;

use crate::alloc::Allocator;
use crate::builder::{self, LeafPlan};
use crate::config::Config;
use crate::entry::EntryValue;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::layout::{compute_free_bytes, LeafImage, NodeImage, NODE_OFFSET_WIDTH};
use crate::lock;
use crate::navigator::{self, ParentLink};
use crate::offset;
use crate::search;
use crate::source::ByteSource;

/// Owns the allocator and the current root offset across a sequence of
/// edits against one tree. Unlike [crate::builder::Builder], which
/// produces a whole tree in one shot, a `Mutator` edits an existing one
/// leaf (or node) at a time (§4.H).
pub struct Mutator<'s> {
    source: &'s dyn ByteSource,
    tree_id: String,
    config: Config,
    metadata_count: usize,
    allocator: Allocator,
    root_offset: u64,
}

impl<'s> Mutator<'s> {
    pub fn new(
        source: &'s dyn ByteSource,
        tree_id: impl Into<String>,
        config: Config,
        metadata_count: usize,
        allocator: Allocator,
        root_offset: u64,
    ) -> Mutator<'s> {
        Mutator {
            source,
            tree_id: tree_id.into(),
            config,
            metadata_count,
            allocator,
            root_offset,
        }
    }

    pub fn root_offset(&self) -> u64 {
        self.root_offset
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    fn tree_guard(&self) -> Result<lock::Handle> {
        lock::lock(&self.tree_id, self.config.lock_timeout)
    }

    fn leaf_guard(&self, leaf_offset: u64) -> Result<lock::Handle> {
        lock::lock(&lock::leaf_lock_name(&self.tree_id, leaf_offset), self.config.lock_timeout)
    }

    fn materialize_window(&self, image: &LeafImage, leaf_offset: u64, leaf_byte_length: u64) -> Result<Vec<(Key, Vec<EntryValue>)>> {
        image
            .entries
            .iter()
            .map(|e| {
                let values = search::materialize(self.source, leaf_offset, leaf_byte_length, &e.values, self.metadata_count)?;
                Ok((e.key.clone(), values))
            })
            .collect()
    }

    /// `add(key, value)`: append to an existing key's value list, or
    /// insert a new entry in sorted position. Rejects a duplicate key on
    /// a unique-keys tree (§4.H `add`).
    pub fn add(&mut self, key: Key, value: EntryValue) -> Result<()> {
        let _tree_guard = self.tree_guard()?;
        let (parent, leaf_offset, image, byte_length) =
            navigator::find_leaf_with_parent(self.source, self.root_offset, &key, &self.config, self.metadata_count)?;
        let _leaf_guard = self.leaf_guard(leaf_offset)?;

        if self.config.unique && image.entries.iter().any(|e| e.key == key) {
            return Err(Error::DuplicateKey(format!("{:?}", key)));
        }

        let mut window = self.materialize_window(&image, leaf_offset, byte_length)?;
        match window.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => {
                let idx = window.partition_point(|(k, _)| *k < key);
                window.insert(idx, (key, vec![value]));
            }
        }

        self.commit_leaf(parent, leaf_offset, byte_length, &image, window)
    }

    /// `remove(key, recordPointer)`: drop one value from `key`'s list
    /// (identified by its record pointer on a non-unique tree; the only
    /// value on a unique one), dropping the entry entirely once its
    /// value list empties. Returns the removed value (§4.H `remove`).
    pub fn remove(&mut self, key: &Key, record_pointer: Option<&[u8]>) -> Result<EntryValue> {
        let _tree_guard = self.tree_guard()?;
        let (parent, leaf_offset, image, byte_length) =
            navigator::find_leaf_with_parent(self.source, self.root_offset, key, &self.config, self.metadata_count)?;
        let _leaf_guard = self.leaf_guard(leaf_offset)?;

        let mut window = self.materialize_window(&image, leaf_offset, byte_length)?;
        let pos = window
            .iter()
            .position(|(k, _)| k == key)
            .ok_or_else(|| Error::KeyNotFound(format!("{:?}", key)))?;

        let removed = {
            let (_, values) = &mut window[pos];
            let value_idx = match record_pointer {
                Some(rp) => values
                    .iter()
                    .position(|v| v.record_pointer == rp)
                    .ok_or_else(|| Error::ValueNotFound(format!("{:?}", key)))?,
                None => 0,
            };
            values.remove(value_idx)
        };
        if window[pos].1.is_empty() {
            window.remove(pos);
        }

        self.commit_leaf(parent, leaf_offset, byte_length, &image, window)?;
        Ok(removed)
    }

    /// `update(key, recordPointer, value)`: replace the value matching
    /// `recordPointer` in `key`'s value list (§4.H `update`).
    pub fn update(&mut self, key: &Key, record_pointer: &[u8], new_value: EntryValue) -> Result<()> {
        let _tree_guard = self.tree_guard()?;
        let (parent, leaf_offset, image, byte_length) =
            navigator::find_leaf_with_parent(self.source, self.root_offset, key, &self.config, self.metadata_count)?;
        let _leaf_guard = self.leaf_guard(leaf_offset)?;

        let mut window = self.materialize_window(&image, leaf_offset, byte_length)?;
        let (_, values) = window
            .iter_mut()
            .find(|(k, _)| k == key)
            .ok_or_else(|| Error::KeyNotFound(format!("{:?}", key)))?;
        let value_idx = values
            .iter()
            .position(|v| v.record_pointer == record_pointer)
            .ok_or_else(|| Error::ValueNotFound(format!("{:?}", key)))?;
        values[value_idx] = new_value;

        self.commit_leaf(parent, leaf_offset, byte_length, &image, window)
    }

    /// `ext_data.addValue`: attach one more value to `key`'s value list.
    /// Implemented as a thin wrapper over the same leaf-replan path as
    /// [Mutator::add]: both mutate one entry's value list and must keep
    /// the entry's `total_values` counter consistent with whatever
    /// ext_data region the replan produces, so there is no in-place
    /// shortcut that skips rewriting that counter (§4.H `ext_data`).
    pub fn ext_data_add_value(&mut self, key: &Key, value: EntryValue) -> Result<()> {
        let _tree_guard = self.tree_guard()?;
        let (parent, leaf_offset, image, byte_length) =
            navigator::find_leaf_with_parent(self.source, self.root_offset, key, &self.config, self.metadata_count)?;
        let _leaf_guard = self.leaf_guard(leaf_offset)?;

        let mut window = self.materialize_window(&image, leaf_offset, byte_length)?;
        let (_, values) = window
            .iter_mut()
            .find(|(k, _)| k == key)
            .ok_or_else(|| Error::KeyNotFound(format!("{:?}", key)))?;
        values.push(value);

        self.commit_leaf(parent, leaf_offset, byte_length, &image, window)
    }

    /// `ext_data.removeValue`: detach one value from `key`'s value list
    /// by record pointer, returning it.
    pub fn ext_data_remove_value(&mut self, key: &Key, record_pointer: &[u8]) -> Result<EntryValue> {
        let _tree_guard = self.tree_guard()?;
        let (parent, leaf_offset, image, byte_length) =
            navigator::find_leaf_with_parent(self.source, self.root_offset, key, &self.config, self.metadata_count)?;
        let _leaf_guard = self.leaf_guard(leaf_offset)?;

        let mut window = self.materialize_window(&image, leaf_offset, byte_length)?;
        let (_, values) = window
            .iter_mut()
            .find(|(k, _)| k == key)
            .ok_or_else(|| Error::KeyNotFound(format!("{:?}", key)))?;
        let idx = values
            .iter()
            .position(|v| v.record_pointer == record_pointer)
            .ok_or_else(|| Error::ValueNotFound(format!("{:?}", key)))?;
        let removed = values.remove(idx);

        self.commit_leaf(parent, leaf_offset, byte_length, &image, window)?;
        Ok(removed)
    }

    /// Dispatch a replanned leaf window to the rebuild path, or to a
    /// split if it overflows `max_entries` (§4.H `rebuild-leaf`,
    /// `split-leaf`). A leaf left with zero entries by a `remove` is not
    /// merged with a sibling — merge-on-underflow is out of scope, the
    /// same stance the teacher's `llrb`/`mvcc` trees take on deletes.
    fn commit_leaf(
        &mut self,
        parent: Option<ParentLink>,
        old_leaf_offset: u64,
        old_byte_length: u64,
        old_image: &LeafImage,
        window: Vec<(Key, Vec<EntryValue>)>,
    ) -> Result<()> {
        if window.len() > self.config.max_entries as usize {
            debug!(
                target: "mutator", "{:?}, leaf at {} overflows ({} entries > {}), splitting",
                self.tree_id, old_leaf_offset, window.len(), self.config.max_entries
            );
            self.split_leaf(parent, old_leaf_offset, old_byte_length, old_image, window)
        } else {
            self.rebuild_leaf(parent, old_leaf_offset, old_byte_length, old_image, window)
        }
    }

    /// Replan a leaf's content with [crate::builder::plan_leaf] and
    /// write it back: in place if it still fits the region the old leaf
    /// plus its ext_data occupied, otherwise via a fresh allocation with
    /// the old region released and every pointer to this leaf patched
    /// (its neighbors' links, and its parent's child offset or the
    /// tree's root) (§4.H `rebuild-leaf`).
    fn rebuild_leaf(
        &mut self,
        parent: Option<ParentLink>,
        old_leaf_offset: u64,
        old_byte_length: u64,
        old_image: &LeafImage,
        window: Vec<(Key, Vec<EntryValue>)>,
    ) -> Result<()> {
        let inline_limit = builder::inline_limit(&self.config);
        let plan = builder::plan_leaf(&window, &self.config, inline_limit)?;
        let (body_len, free_bytes) = builder::leaf_size(&plan, &self.config)?;
        let new_region_len = body_len as u64 + free_bytes as u64 + plan.ext_total;

        let old_ext_total = old_image.ext_data.map(|(total, _)| total as u64).unwrap_or(0);
        let old_region_len = old_byte_length + old_ext_total;

        let (leaf_offset, region_len, moved) = if new_region_len <= old_region_len {
            (old_leaf_offset, old_region_len, false)
        } else {
            let (offset, reserved) = self.allocator.request(new_region_len)?;
            self.allocator.release(old_leaf_offset, old_region_len);
            (offset, reserved, true)
        };
        let free_bytes = free_bytes + (region_len - new_region_len) as usize;

        let offset_width = self.config.offset_width();
        let prev_abs = navigator::leaf_prev_absolute(old_leaf_offset, old_image, offset_width)?;
        let next_abs = navigator::leaf_next_absolute(old_leaf_offset, old_image, offset_width)?;

        self.write_leaf_region(leaf_offset, free_bytes, &plan, prev_abs, next_abs)?;

        if moved {
            debug!(
                target: "mutator", "{:?}, leaf outgrew its region, relocated {} -> {}",
                self.tree_id, old_leaf_offset, leaf_offset
            );
            if let Some(prev) = prev_abs {
                self.patch_leaf_next(prev, leaf_offset)?;
            }
            if let Some(next) = next_abs {
                self.patch_leaf_prev(next, leaf_offset)?;
            }
            match parent {
                Some(p) => self.patch_parent_child(p, old_leaf_offset, leaf_offset)?,
                None => self.root_offset = leaf_offset,
            }
        }
        Ok(())
    }

    /// Split an overflowing leaf's replanned window at its midpoint into
    /// two leaves, reusing the old region for the left half when it
    /// fits and always allocating fresh for the right half, then link
    /// both into the leaf list and either patch the parent with a new
    /// pivot or synthesize a new root if the leaf had none (§4.H
    /// `split-leaf`).
    fn split_leaf(
        &mut self,
        parent: Option<ParentLink>,
        old_leaf_offset: u64,
        old_byte_length: u64,
        old_image: &LeafImage,
        window: Vec<(Key, Vec<EntryValue>)>,
    ) -> Result<()> {
        let mut window = window;
        let mid = window.len() / 2;
        let right_window = window.split_off(mid);
        let left_window = window;

        let inline_limit = builder::inline_limit(&self.config);
        let left_plan = builder::plan_leaf(&left_window, &self.config, inline_limit)?;
        let right_plan = builder::plan_leaf(&right_window, &self.config, inline_limit)?;
        let (left_body, left_free) = builder::leaf_size(&left_plan, &self.config)?;
        let (right_body, right_free) = builder::leaf_size(&right_plan, &self.config)?;
        let left_region_len = left_body as u64 + left_free as u64 + left_plan.ext_total;
        let right_region_len = right_body as u64 + right_free as u64 + right_plan.ext_total;

        let old_ext_total = old_image.ext_data.map(|(total, _)| total as u64).unwrap_or(0);
        let old_region_len = old_byte_length + old_ext_total;

        let (left_offset, left_reserved) = if left_region_len <= old_region_len {
            (old_leaf_offset, old_region_len)
        } else {
            self.allocator.request(left_region_len)?
        };
        let (right_offset, right_reserved) = self.allocator.request(right_region_len)?;
        if left_offset != old_leaf_offset {
            self.allocator.release(old_leaf_offset, old_region_len);
        }

        let offset_width = self.config.offset_width();
        let prev_abs = navigator::leaf_prev_absolute(old_leaf_offset, old_image, offset_width)?;
        let next_abs = navigator::leaf_next_absolute(old_leaf_offset, old_image, offset_width)?;

        let left_free = left_free + (left_reserved - left_region_len) as usize;
        let right_free = right_free + (right_reserved - right_region_len) as usize;
        self.write_leaf_region(left_offset, left_free, &left_plan, prev_abs, Some(right_offset))?;
        self.write_leaf_region(right_offset, right_free, &right_plan, Some(left_offset), next_abs)?;

        if let Some(prev) = prev_abs {
            self.patch_leaf_next(prev, left_offset)?;
        }
        if let Some(next) = next_abs {
            self.patch_leaf_prev(next, right_offset)?;
        }

        let right_first_key = right_plan.entries.first().map(|e| e.key.clone()).unwrap_or(Key::Absent);

        match parent {
            Some(p) => self.insert_parent_pivot(p, old_leaf_offset, left_offset, right_first_key, right_offset),
            None => self.synthesize_root(right_first_key, left_offset, right_offset),
        }
    }

    fn write_leaf_region(
        &mut self,
        leaf_offset: u64,
        free_bytes: usize,
        plan: &LeafPlan,
        prev_abs: Option<u64>,
        next_abs: Option<u64>,
    ) -> Result<()> {
        let offset_width = self.config.offset_width();
        let prev_field_start = leaf_offset + 9;
        let next_field_start = leaf_offset + 9 + offset_width.byte_len() as u64;
        let prev_rel = prev_abs.map(|a| a as i64 - prev_field_start as i64).unwrap_or(0);
        let next_rel = next_abs.map(|a| a as i64 - next_field_start as i64).unwrap_or(0);

        let ext_header = builder::leaf_ext_header(plan);
        let leaf_image = LeafImage {
            prev_offset: prev_rel,
            next_offset: next_rel,
            ext_data: ext_header,
            entries: plan.entries.clone(),
        };
        let mut out = leaf_image.encode(self.config.small_leaves, offset_width, free_bytes)?;
        for (block, free) in &plan.ext_blocks {
            out.extend(block.encode(*free)?);
        }
        self.source.write_at(leaf_offset, &out)
    }

    fn patch_leaf_next(&mut self, neighbor_offset: u64, new_target: u64) -> Result<()> {
        let offset_width = self.config.offset_width();
        let field_start = neighbor_offset + 9 + offset_width.byte_len() as u64;
        let relative = new_target as i64 - field_start as i64;
        let mut buf = Vec::new();
        offset::encode(relative, offset_width, &mut buf)?;
        self.source.write_at(field_start, &buf)
    }

    fn patch_leaf_prev(&mut self, neighbor_offset: u64, new_target: u64) -> Result<()> {
        let offset_width = self.config.offset_width();
        let field_start = neighbor_offset + 9;
        let relative = new_target as i64 - field_start as i64;
        let mut buf = Vec::new();
        offset::encode(relative, offset_width, &mut buf)?;
        self.source.write_at(field_start, &buf)
    }

    /// Re-encode a node's pivot/gt offsets with absolute target
    /// `new_child_abs` substituted wherever `old_child_abs` appeared,
    /// keeping the node at its existing offset and reusing whatever
    /// free-space budget its original encode left behind.
    fn patch_parent_child(&mut self, parent: ParentLink, old_child_abs: u64, new_child_abs: u64) -> Result<()> {
        let mut pivots_abs = Vec::with_capacity(parent.image.pivots.len());
        for i in 0..parent.image.pivots.len() {
            let abs = navigator::node_child_absolute(parent.node_offset, &parent.image, Some(i))?;
            let abs = if abs == old_child_abs { new_child_abs } else { abs };
            pivots_abs.push((parent.image.pivots[i].0.clone(), abs));
        }
        let gt_abs = navigator::node_child_absolute(parent.node_offset, &parent.image, None)?;
        let gt_abs = if gt_abs == old_child_abs { new_child_abs } else { gt_abs };

        let new_body_len = parent.image.body_len_without_padding()?;
        let old_total = self.read_total_len(parent.node_offset)?;
        if new_body_len > old_total {
            return Err(Error::NoSpace(format!(
                "parent node at offset {} needs {} bytes but only has {}",
                parent.node_offset, new_body_len, old_total
            )));
        }
        let free_bytes = old_total - new_body_len;
        let out = self.encode_node_at(parent.node_offset, &pivots_abs, gt_abs, free_bytes)?;
        self.source.write_at(parent.node_offset, &out)
    }

    /// Insert a new pivot splitting `old_child_abs` into `left_abs` (kept
    /// at the old child's position) and `right_abs` (inserted
    /// immediately after it, keyed on `right_key`). Fails fast if the
    /// parent has no room for another pivot or its free-space budget is
    /// exhausted — growing an internal node by relocating it would also
    /// require patching its own parent, recursively; that cascade is out
    /// of scope, so a full rebuild is the documented escape hatch
    /// (§4.H `split-leaf`, §9).
    fn insert_parent_pivot(&mut self, parent: ParentLink, old_child_abs: u64, left_abs: u64, right_key: Key, right_abs: u64) -> Result<()> {
        if parent.image.pivots.len() + 1 > self.config.max_entries as usize {
            return Err(Error::NoSpace(format!(
                "parent node at offset {} is full; a full rebuild is required to add another pivot",
                parent.node_offset
            )));
        }

        let mut pivots_abs = Vec::with_capacity(parent.image.pivots.len() + 1);
        let mut gt_abs = navigator::node_child_absolute(parent.node_offset, &parent.image, None)?;
        let mut inserted = false;
        for i in 0..parent.image.pivots.len() {
            let abs = navigator::node_child_absolute(parent.node_offset, &parent.image, Some(i))?;
            if abs == old_child_abs {
                pivots_abs.push((right_key.clone(), left_abs));
                pivots_abs.push((parent.image.pivots[i].0.clone(), right_abs));
                inserted = true;
            } else {
                pivots_abs.push((parent.image.pivots[i].0.clone(), abs));
            }
        }
        if !inserted {
            pivots_abs.push((right_key, left_abs));
            gt_abs = right_abs;
        }

        let probe = NodeImage {
            pivots: pivots_abs.iter().cloned().map(|(k, _)| (k, 0i64)).collect(),
            gt_offset: 0,
        };
        let new_body_len = probe.body_len_without_padding()?;
        let old_total = self.read_total_len(parent.node_offset)?;
        if new_body_len > old_total {
            return Err(Error::NoSpace(format!(
                "parent node at offset {} needs {} bytes but only has {}; a full rebuild is required",
                parent.node_offset, new_body_len, old_total
            )));
        }
        let free_bytes = old_total - new_body_len;
        let out = self.encode_node_at(parent.node_offset, &pivots_abs, gt_abs, free_bytes)?;
        self.source.write_at(parent.node_offset, &out)
    }

    /// A split leaf with no parent is the tree's current root; replace
    /// it with a freshly allocated single-pivot node (§4.H `split-leaf`).
    fn synthesize_root(&mut self, pivot_key: Key, left_abs: u64, right_abs: u64) -> Result<()> {
        let probe = NodeImage {
            pivots: vec![(pivot_key.clone(), 0)],
            gt_offset: 0,
        };
        let body_len = probe.body_len_without_padding()?;
        let free_bytes = compute_free_bytes(1, self.config.max_entries as usize, body_len, None);
        let region_len = (body_len + free_bytes) as u64;
        let (offset, reserved) = self.allocator.request(region_len)?;
        let free_bytes = free_bytes + (reserved - region_len) as usize;

        let out = self.encode_node_at(offset, &[(pivot_key, left_abs)], right_abs, free_bytes)?;
        self.source.write_at(offset, &out)?;
        debug!(target: "mutator", "{:?}, synthesized new root at {} over {}/{}", self.tree_id, offset, left_abs, right_abs);
        self.root_offset = offset;
        Ok(())
    }

    fn read_total_len(&self, offset: u64) -> Result<usize> {
        let prefix = self.source.read_at(offset, 4)?;
        if prefix.len() < 4 {
            return Err(Error::Eof(format!("truncated length prefix at offset {}", offset)));
        }
        Ok(u32::from_be_bytes(prefix.as_slice().try_into().unwrap()) as usize)
    }

    /// Encode a node at `node_offset` given each pivot's and the
    /// gt-child's *absolute* target, resolving them to the relative
    /// offsets the on-disk format stores (same field-end arithmetic as
    /// [crate::navigator::node_child_absolute], run in reverse).
    fn encode_node_at(&self, node_offset: u64, pivots_abs: &[(Key, u64)], gt_abs: u64, free_bytes: usize) -> Result<Vec<u8>> {
        let mut field_end = node_offset + 10;
        let mut resolved_pivots = Vec::with_capacity(pivots_abs.len());
        for (key, child_abs) in pivots_abs {
            let mut scratch = Vec::new();
            key.encode(&mut scratch)?;
            field_end += scratch.len() as u64 + NODE_OFFSET_WIDTH.byte_len() as u64;
            resolved_pivots.push((key.clone(), *child_abs as i64 - field_end as i64));
        }
        let gt_field_end = field_end + NODE_OFFSET_WIDTH.byte_len() as u64;
        let gt_offset = gt_abs as i64 - gt_field_end as i64;
        let image = NodeImage { pivots: resolved_pivots, gt_offset };
        image.encode(free_bytes)
    }
}

#[cfg(test)]
#[path = "mutator_test.rs"]
mod mutator_test;
