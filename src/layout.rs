//! Module `layout` is the binary layout builder (component E): produces
//! node, leaf, and ext_data-block byte images with configurable
//! free-space padding, and decodes them back.

use crate::config::{LEAF_FLAG_HAS_EXT_DATA, LEAF_FLAG_IS_LEAF};
use crate::entry::{EntryValue, LeafEntry};
use crate::error::{Error, Result};
use crate::key::{try_u8, Key};
use crate::offset::{self, OffsetWidth};

/// Node pivot/gt-child offsets are always the wide (48-bit) encoding,
/// independent of the tree's `large_pointers` flag — §4.E states node
/// offsets are "all large" unconditionally, unlike leaf links and
/// ext_data pointers which follow the flag (see DESIGN.md).
/// Node pivot/gt-child offsets are always 48-bit, regardless of
/// [crate::config::Config::large_pointers] (§4.E "All offsets are
/// large"). Shared with `navigator` and `builder`, which resolve and
/// produce these offsets respectively.
pub(crate) const NODE_OFFSET_WIDTH: OffsetWidth = OffsetWidth::W47;

/// §4.E padding policy. With no `max_length`, pads to roughly
/// `(maxEntries − n) × avgEntrySize × 1.1` so later in-place growth has
/// room; with `max_length`, pads out to exactly that size.
pub fn compute_free_bytes(
    entry_count: usize,
    max_entries: usize,
    body_len_without_padding: usize,
    max_length: Option<usize>,
) -> usize {
    if let Some(max_len) = max_length {
        return max_len.saturating_sub(body_len_without_padding);
    }
    if entry_count == 0 || max_entries <= entry_count {
        return 0;
    }
    let avg_size = body_len_without_padding as f64 / entry_count as f64;
    let free = ((max_entries - entry_count) as f64 * avg_size * 1.1).ceil();
    free as usize
}

/// One internal node's pivots plus its trailing greater-than-or-equal
/// child offset (§3 "Internal node").
#[derive(Clone, Debug, PartialEq)]
pub struct NodeImage {
    pub pivots: Vec<(Key, i64)>,
    pub gt_offset: i64,
}

impl NodeImage {
    pub fn encode(&self, free_bytes: usize) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        body.push(0u8); // is-leaf = 0
        body.extend_from_slice(&(free_bytes as u32).to_be_bytes());
        body.push(try_u8(self.pivots.len(), "node pivot count")?);
        for (key, lt_offset) in &self.pivots {
            key.encode(&mut body)?;
            offset::encode(*lt_offset, NODE_OFFSET_WIDTH, &mut body)?;
        }
        offset::encode(self.gt_offset, NODE_OFFSET_WIDTH, &mut body)?;
        body.extend(std::iter::repeat(0u8).take(free_bytes));

        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&((4 + body.len()) as u32).to_be_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Byte length a fresh encode of this image would occupy, absent
    /// any free-space padding — used to size padding before encoding.
    pub fn body_len_without_padding(&self) -> Result<usize> {
        let mut probe = Vec::new();
        probe.push(0u8);
        probe.extend_from_slice(&0u32.to_be_bytes());
        probe.push(try_u8(self.pivots.len(), "node pivot count")?);
        for (key, lt_offset) in &self.pivots {
            key.encode(&mut probe)?;
            offset::encode(*lt_offset, NODE_OFFSET_WIDTH, &mut probe)?;
        }
        offset::encode(self.gt_offset, NODE_OFFSET_WIDTH, &mut probe)?;
        Ok(4 + probe.len())
    }

    pub fn decode(buf: &[u8]) -> Result<(NodeImage, usize)> {
        if buf.len() < 10 {
            return Err(Error::EncodingError("truncated node header".into()));
        }
        let total_len = u32::from_be_bytes(buf[0..4].try_into().unwrap()) as usize;
        let is_leaf = buf[4];
        if is_leaf != 0 {
            return Err(Error::EncodingError("expected node, found leaf flag".into()));
        }
        let _free_len = u32::from_be_bytes(buf[5..9].try_into().unwrap());
        let count = buf[9] as usize;

        let mut offset_in = 10;
        let mut pivots = Vec::with_capacity(count);
        for _ in 0..count {
            let (key, n) = Key::decode(&buf[offset_in..])?;
            offset_in += n;
            let lt_offset = offset::decode(&buf[offset_in..], NODE_OFFSET_WIDTH)?;
            offset_in += NODE_OFFSET_WIDTH.byte_len();
            pivots.push((key, lt_offset));
        }
        let gt_offset = offset::decode(&buf[offset_in..], NODE_OFFSET_WIDTH)?;

        Ok((NodeImage { pivots, gt_offset }, total_len))
    }
}

/// One leaf's entries plus its doubly-linked-list pointers and optional
/// ext_data region header (§3 "Leaf").
#[derive(Clone, Debug, PartialEq)]
pub struct LeafImage {
    pub prev_offset: i64,
    pub next_offset: i64,
    pub ext_data: Option<(u32, u32)>,
    pub entries: Vec<LeafEntry>,
}

impl LeafImage {
    pub fn encode(&self, small_leaves: bool, offset_width: OffsetWidth, free_bytes: usize) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        let mut flags = LEAF_FLAG_IS_LEAF;
        if self.ext_data.is_some() {
            flags |= LEAF_FLAG_HAS_EXT_DATA;
        }
        body.push(flags);
        body.extend_from_slice(&(free_bytes as u32).to_be_bytes());
        offset::encode(self.prev_offset, offset_width, &mut body)?;
        offset::encode(self.next_offset, offset_width, &mut body)?;
        if let Some((total, free)) = self.ext_data {
            body.extend_from_slice(&total.to_be_bytes());
            body.extend_from_slice(&free.to_be_bytes());
        }
        body.push(try_u8(self.entries.len(), "leaf entry count")?);
        for entry in &self.entries {
            entry.encode(small_leaves, offset_width, &mut body)?;
        }
        body.extend(std::iter::repeat(0u8).take(free_bytes));

        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&((4 + body.len()) as u32).to_be_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn body_len_without_padding(&self, small_leaves: bool, offset_width: OffsetWidth) -> Result<usize> {
        let mut probe = Vec::new();
        probe.push(0u8);
        probe.extend_from_slice(&0u32.to_be_bytes());
        offset::encode(self.prev_offset, offset_width, &mut probe)?;
        offset::encode(self.next_offset, offset_width, &mut probe)?;
        if self.ext_data.is_some() {
            probe.extend_from_slice(&0u32.to_be_bytes());
            probe.extend_from_slice(&0u32.to_be_bytes());
        }
        probe.push(try_u8(self.entries.len(), "leaf entry count")?);
        for entry in &self.entries {
            entry.encode(small_leaves, offset_width, &mut probe)?;
        }
        Ok(4 + probe.len())
    }

    pub fn decode(
        buf: &[u8],
        small_leaves: bool,
        offset_width: OffsetWidth,
        metadata_count: usize,
    ) -> Result<(LeafImage, usize)> {
        if buf.len() < 9 {
            return Err(Error::EncodingError("truncated leaf header".into()));
        }
        let total_len = u32::from_be_bytes(buf[0..4].try_into().unwrap()) as usize;
        let flags = buf[4];
        if flags & LEAF_FLAG_IS_LEAF == 0 {
            return Err(Error::EncodingError("expected leaf, found node flag".into()));
        }
        let has_ext = flags & LEAF_FLAG_HAS_EXT_DATA != 0;
        let _free_len = u32::from_be_bytes(buf[5..9].try_into().unwrap());

        let mut offset_in = 9;
        let prev_offset = offset::decode(&buf[offset_in..], offset_width)?;
        offset_in += offset_width.byte_len();
        let next_offset = offset::decode(&buf[offset_in..], offset_width)?;
        offset_in += offset_width.byte_len();

        let ext_data = if has_ext {
            let total = u32::from_be_bytes(buf[offset_in..offset_in + 4].try_into().unwrap());
            offset_in += 4;
            let free = u32::from_be_bytes(buf[offset_in..offset_in + 4].try_into().unwrap());
            offset_in += 4;
            Some((total, free))
        } else {
            None
        };

        let count = buf[offset_in] as usize;
        offset_in += 1;

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let (entry, n) = LeafEntry::decode(&buf[offset_in..], small_leaves, offset_width, metadata_count)?;
            entries.push(entry);
            offset_in += n;
        }

        Ok((
            LeafImage {
                prev_offset,
                next_offset,
                ext_data,
                entries,
            },
            total_len,
        ))
    }
}

/// Ext_data sideband block (§3 "Ext_data block", §4.E): holds a value
/// list too large for the small-leaf inline budget.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtDataBlock {
    pub values: Vec<EntryValue>,
}

impl ExtDataBlock {
    pub fn encode(&self, free_bytes: usize) -> Result<Vec<u8>> {
        let mut values_bytes = Vec::new();
        for value in &self.values {
            value.encode(&mut values_bytes)?;
        }
        let total_len = 4 + 4 + 4 + values_bytes.len() + free_bytes;
        let mut out = Vec::with_capacity(total_len);
        out.extend_from_slice(&(total_len as u32).to_be_bytes());
        out.extend_from_slice(&(free_bytes as u32).to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // forward pointer, reserved
        out.extend_from_slice(&values_bytes);
        out.extend(std::iter::repeat(0u8).take(free_bytes));
        Ok(out)
    }

    pub fn decode(buf: &[u8], metadata_count: usize) -> Result<(ExtDataBlock, u32, usize)> {
        if buf.len() < 12 {
            return Err(Error::EncodingError("truncated ext_data block header".into()));
        }
        let block_len = u32::from_be_bytes(buf[0..4].try_into().unwrap()) as usize;
        let free_len = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        let values_section_len = block_len
            .checked_sub(12 + free_len as usize)
            .ok_or_else(|| Error::EncodingError("ext_data free length exceeds block length".into()))?;

        let mut cursor = 12;
        let end = 12 + values_section_len;
        let mut values = Vec::new();
        while cursor < end {
            let (value, n) = EntryValue::decode(&buf[cursor..end], metadata_count)?;
            values.push(value);
            cursor += n;
        }
        Ok((ExtDataBlock { values }, free_len, block_len))
    }
}

#[cfg(test)]
#[path = "layout_test.rs"]
mod layout_test;
