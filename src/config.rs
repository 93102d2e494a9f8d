//! Module `config` carries the on-disk tree header (part of component E)
//! and the in-process [Config] used to create or open a tree — the
//! ambient configuration layer the distilled design leaves as "loading
//! is out of scope" but every concrete tree still needs (§4.E, §6).

use std::time::Duration;

use crate::error::{Error, Result};
use crate::key::try_u8;

const FLAG_UNIQUE_KEYS: u8 = 1 << 0;
const FLAG_HAS_METADATA: u8 = 1 << 1;
const FLAG_HAS_FREE_SPACE: u8 = 1 << 2;
const FLAG_HAS_FILL_FACTOR: u8 = 1 << 3;
const FLAG_SMALL_LEAVES: u8 = 1 << 4;
const FLAG_LARGE_POINTERS: u8 = 1 << 5;

/// The tree-flags byte (§6): one bit per optional header field or layout
/// variant. Stored verbatim as the header's flag-mask byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeFlags(u8);

impl TreeFlags {
    pub fn from_byte(byte: u8) -> TreeFlags {
        TreeFlags(byte)
    }

    pub fn to_byte(self) -> u8 {
        self.0
    }

    pub fn unique_keys(self) -> bool {
        self.0 & FLAG_UNIQUE_KEYS != 0
    }

    pub fn has_metadata(self) -> bool {
        self.0 & FLAG_HAS_METADATA != 0
    }

    pub fn has_free_space(self) -> bool {
        self.0 & FLAG_HAS_FREE_SPACE != 0
    }

    pub fn has_fill_factor(self) -> bool {
        self.0 & FLAG_HAS_FILL_FACTOR != 0
    }

    pub fn small_leaves(self) -> bool {
        self.0 & FLAG_SMALL_LEAVES != 0
    }

    pub fn large_pointers(self) -> bool {
        self.0 & FLAG_LARGE_POINTERS != 0
    }

    fn set(mut self, bit: u8, on: bool) -> TreeFlags {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
        self
    }

    pub fn with_unique_keys(self, on: bool) -> TreeFlags {
        self.set(FLAG_UNIQUE_KEYS, on)
    }

    pub fn with_metadata(self, on: bool) -> TreeFlags {
        self.set(FLAG_HAS_METADATA, on)
    }

    pub fn with_free_space(self, on: bool) -> TreeFlags {
        self.set(FLAG_HAS_FREE_SPACE, on)
    }

    pub fn with_fill_factor(self, on: bool) -> TreeFlags {
        self.set(FLAG_HAS_FILL_FACTOR, on)
    }

    pub fn with_small_leaves(self, on: bool) -> TreeFlags {
        self.set(FLAG_SMALL_LEAVES, on)
    }

    pub fn with_large_pointers(self, on: bool) -> TreeFlags {
        self.set(FLAG_LARGE_POINTERS, on)
    }
}

/// Leaf flag-mask bits (§6), distinct from [TreeFlags] and stored per-leaf.
pub const LEAF_FLAG_IS_LEAF: u8 = 1 << 0;
pub const LEAF_FLAG_HAS_EXT_DATA: u8 = 1 << 1;

/// Entry val-length high bit in small-leaf mode: "an ext_data pointer
/// follows instead of an inline value list" (§6).
pub const VAL_LEN_EXT_DATA_FLAG: u8 = 1 << 7;
pub const VAL_LEN_MASK: u8 = !VAL_LEN_EXT_DATA_FLAG;

/// The tree header (§3, §4.E): written once at offset 0 and rewritten
/// whenever `byte_length` or `free_byte_length` change.
#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    pub byte_length: u32,
    pub flags: TreeFlags,
    pub max_entries: u8,
    pub fill_factor: Option<u8>,
    pub free_byte_length: Option<u32>,
    pub metadata_key_names: Option<Vec<String>>,
}

impl Header {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.byte_length.to_be_bytes());
        buf.push(self.flags.to_byte());
        buf.push(self.max_entries);

        if self.flags.has_fill_factor() {
            let fill_factor = self
                .fill_factor
                .ok_or_else(|| Error::EncodingError("fill-factor flag set but value missing".into()))?;
            buf.push(fill_factor);
        }

        if self.flags.has_free_space() {
            let free = self
                .free_byte_length
                .ok_or_else(|| Error::EncodingError("free-space flag set but value missing".into()))?;
            buf.extend_from_slice(&free.to_be_bytes());
        }

        if self.flags.has_metadata() {
            let names = self
                .metadata_key_names
                .as_ref()
                .ok_or_else(|| Error::EncodingError("metadata flag set but key names missing".into()))?;
            let mut block = Vec::new();
            block.push(try_u8(names.len(), "metadata key count")?);
            for name in names {
                let bytes = name.as_bytes();
                block.push(try_u8(bytes.len(), "metadata key name length")?);
                block.extend_from_slice(bytes);
            }
            buf.extend_from_slice(&(block.len() as u32).to_be_bytes());
            buf.extend_from_slice(&block);
        }

        Ok(buf)
    }

    /// Decode a header from the front of `buf`, returning it plus the
    /// number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Header, usize)> {
        if buf.len() < 6 {
            return Err(Error::EncodingError("truncated tree header".into()));
        }
        let byte_length = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let flags = TreeFlags::from_byte(buf[4]);
        let max_entries = buf[5];
        let mut offset = 6;

        let fill_factor = if flags.has_fill_factor() {
            let v = *buf
                .get(offset)
                .ok_or_else(|| Error::EncodingError("truncated fill factor".into()))?;
            offset += 1;
            Some(v)
        } else {
            None
        };

        let free_byte_length = if flags.has_free_space() {
            let slice = buf
                .get(offset..offset + 4)
                .ok_or_else(|| Error::EncodingError("truncated free-byte length".into()))?;
            offset += 4;
            Some(u32::from_be_bytes(slice.try_into().unwrap()))
        } else {
            None
        };

        let metadata_key_names = if flags.has_metadata() {
            let len_slice = buf
                .get(offset..offset + 4)
                .ok_or_else(|| Error::EncodingError("truncated metadata block length".into()))?;
            let block_len = u32::from_be_bytes(len_slice.try_into().unwrap()) as usize;
            offset += 4;
            let block = buf
                .get(offset..offset + block_len)
                .ok_or_else(|| Error::EncodingError("truncated metadata block".into()))?;
            offset += block_len;

            let count = block[0] as usize;
            let mut names = Vec::with_capacity(count);
            let mut cursor = 1;
            for _ in 0..count {
                let name_len = block[cursor] as usize;
                cursor += 1;
                let name = std::str::from_utf8(&block[cursor..cursor + name_len])
                    .map_err(|e| Error::EncodingError(format!("invalid utf8 metadata key name: {}", e)))?
                    .to_string();
                cursor += name_len;
                names.push(name);
            }
            Some(names)
        } else {
            None
        };

        Ok((
            Header {
                byte_length,
                flags,
                max_entries,
                fill_factor,
                free_byte_length,
                metadata_key_names,
            },
            offset,
        ))
    }
}

/// In-process configuration used to create or open a tree (component O).
/// Mirrors the ambient `Config` the teacher keeps alongside its on-disk
/// format (`robt_config.rs`), adapted to this engine's header fields.
#[derive(Clone, Debug)]
pub struct Config {
    pub unique: bool,
    pub metadata_keys: Vec<String>,
    pub max_entries: u8,
    pub fill_factor: u8,
    pub small_leaves: bool,
    pub large_pointers: bool,
    pub add_free_space: bool,
    pub auto_grow: bool,
    /// Chunk size the [crate::source::Reader] buffers reads in.
    pub read_chunk_size: u64,
    /// High-water mark, in bytes, for the [crate::source::Writer]'s
    /// internal buffer before it drains and reports backpressure.
    pub write_high_water_mark: usize,
    /// Bounded queue depth for the streaming builder's background
    /// flusher thread (component K), mirroring the teacher's
    /// `flush_queue_size`.
    pub flush_queue_size: usize,
    /// Default timeout for named lock acquisition (component L).
    pub lock_timeout: Duration,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            unique: true,
            metadata_keys: Vec::new(),
            max_entries: 64,
            fill_factor: 95,
            small_leaves: true,
            large_pointers: false,
            add_free_space: true,
            auto_grow: true,
            read_chunk_size: crate::source::DEFAULT_CHUNK_SIZE,
            write_high_water_mark: crate::source::DEFAULT_HIGH_WATER_MARK,
            flush_queue_size: 16,
            lock_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn flags(&self) -> TreeFlags {
        TreeFlags::default()
            .with_unique_keys(self.unique)
            .with_metadata(!self.metadata_keys.is_empty())
            .with_free_space(true)
            .with_fill_factor(true)
            .with_small_leaves(self.small_leaves)
            .with_large_pointers(self.large_pointers)
    }

    pub fn offset_width(&self) -> crate::offset::OffsetWidth {
        if self.large_pointers {
            crate::offset::OffsetWidth::W47
        } else {
            crate::offset::OffsetWidth::W31
        }
    }

    /// entries-per-leaf = max(minNode, floor(maxEntries * fillFactor / 100)),
    /// per §4.D step 2.
    pub fn entries_per_leaf(&self) -> usize {
        let min_node = 1usize;
        let computed = (self.max_entries as usize * self.fill_factor as usize) / 100;
        computed.max(min_node)
    }

    /// parent fan-out = maxEntries + 1, per §4.D step 2.
    pub fn fan_out(&self) -> usize {
        self.max_entries as usize + 1
    }

    /// Minimum pivots per parent = max(1, floor(maxEntries/2)), per §4.D
    /// step 5.
    pub fn min_pivots_per_parent(&self) -> usize {
        (self.max_entries as usize / 2).max(1)
    }

    pub fn to_header(&self, byte_length: u32, free_byte_length: u32) -> Header {
        Header {
            byte_length,
            flags: self.flags(),
            max_entries: self.max_entries,
            fill_factor: Some(self.fill_factor),
            free_byte_length: Some(free_byte_length),
            metadata_key_names: if self.metadata_keys.is_empty() {
                None
            } else {
                Some(self.metadata_keys.clone())
            },
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
