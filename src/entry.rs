//! Module `entry` codes leaf entries and their value lists (part of
//! component E): `(record pointer, metadata tuple)` values, inlined or
//! redirected through an ext_data block.

use crate::config::VAL_LEN_EXT_DATA_FLAG;
use crate::error::{Error, Result};
use crate::key::{try_u8, Key, MetaTuple};
use crate::offset::OffsetWidth;

/// One `(record pointer, metadata)` value attached to an entry (§3).
#[derive(Clone, Debug, PartialEq)]
pub struct EntryValue {
    pub record_pointer: Vec<u8>,
    pub metadata: MetaTuple,
}

impl EntryValue {
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<usize> {
        let start = buf.len();
        crate::key::validate_record_pointer(&self.record_pointer)?;
        buf.push(try_u8(self.record_pointer.len(), "record pointer length")?);
        buf.extend_from_slice(&self.record_pointer);
        self.metadata.encode(buf)?;
        Ok(buf.len() - start)
    }

    pub fn decode(buf: &[u8], metadata_count: usize) -> Result<(EntryValue, usize)> {
        if buf.is_empty() {
            return Err(Error::EncodingError("truncated entry value".into()));
        }
        let rp_len = buf[0] as usize;
        let rp_end = 1 + rp_len;
        let rp = buf
            .get(1..rp_end)
            .ok_or_else(|| Error::EncodingError("truncated record pointer".into()))?
            .to_vec();
        let (metadata, meta_len) = MetaTuple::decode(&buf[rp_end..], metadata_count)?;
        Ok((
            EntryValue {
                record_pointer: rp,
                metadata,
            },
            rp_end + meta_len,
        ))
    }
}

/// An entry's materialized value list: inlined in the leaf body, or
/// redirected to an ext_data block when it outgrows the small-leaf
/// budget (§3 "Leaf entry", §4.H `ext_data`).
#[derive(Clone, Debug, PartialEq)]
pub enum ValueList {
    Inline(Vec<EntryValue>),
    ExtRef { total_values: u32, ptr: u64 },
}

impl ValueList {
    pub fn total_values(&self) -> u32 {
        match self {
            ValueList::Inline(values) => values.len() as u32,
            ValueList::ExtRef { total_values, .. } => *total_values,
        }
    }

    fn encode_body(&self, offset_width: OffsetWidth, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            ValueList::Inline(values) => {
                buf.extend_from_slice(&(values.len() as u32).to_be_bytes());
                for value in values {
                    value.encode(buf)?;
                }
            }
            ValueList::ExtRef { total_values, ptr } => {
                buf.extend_from_slice(&total_values.to_be_bytes());
                encode_unsigned(*ptr, offset_width, buf)?;
            }
        }
        Ok(())
    }
}

fn encode_unsigned(value: u64, width: OffsetWidth, buf: &mut Vec<u8>) -> Result<()> {
    let n = width.byte_len();
    if value > width.max_magnitude() {
        return Err(Error::OffsetOverflow(value as i64));
    }
    let mut digits = vec![0u8; n];
    let mut remainder = value;
    for i in (0..n).rev() {
        digits[i] = (remainder % 256) as u8;
        remainder /= 256;
    }
    buf.extend_from_slice(&digits);
    Ok(())
}

fn decode_unsigned(buf: &[u8], width: OffsetWidth) -> Result<u64> {
    let n = width.byte_len();
    if buf.len() < n {
        return Err(Error::EncodingError("truncated ext_data pointer".into()));
    }
    let mut value: u64 = 0;
    for &byte in &buf[..n] {
        value = value * 256 + byte as u64;
    }
    Ok(value)
}

/// One leaf entry: `(key, value list)` (§3).
#[derive(Clone, Debug, PartialEq)]
pub struct LeafEntry {
    pub key: Key,
    pub values: ValueList,
}

impl LeafEntry {
    /// Encode `(key, val-length, value-section)`. `small_leaves` selects
    /// a 1-byte (with high-bit ext flag) or 4-byte val-length field.
    pub fn encode(&self, small_leaves: bool, offset_width: OffsetWidth, buf: &mut Vec<u8>) -> Result<usize> {
        let start = buf.len();
        self.key.encode(buf)?;

        let mut body = Vec::new();
        self.values.encode_body(offset_width, &mut body)?;
        let is_ext = matches!(self.values, ValueList::ExtRef { .. });

        if small_leaves {
            let len = try_u8(body.len(), "small-leaf value-section length")?;
            if len & VAL_LEN_EXT_DATA_FLAG != 0 {
                return Err(Error::EncodingError(
                    "value-section length collides with ext_data flag bit".into(),
                ));
            }
            let flagged = if is_ext { len | VAL_LEN_EXT_DATA_FLAG } else { len };
            buf.push(flagged);
        } else {
            let len = body.len() as u32;
            let flagged = if is_ext { len | 0x8000_0000 } else { len };
            buf.extend_from_slice(&flagged.to_be_bytes());
        }
        buf.extend_from_slice(&body);
        Ok(buf.len() - start)
    }

    /// Decode one entry; `metadata_count` comes from the tree header's
    /// declared metadata schema.
    pub fn decode(
        buf: &[u8],
        small_leaves: bool,
        offset_width: OffsetWidth,
        metadata_count: usize,
    ) -> Result<(LeafEntry, usize)> {
        let (key, key_len) = Key::decode(buf)?;
        let mut offset = key_len;

        let (body_len, is_ext, header_len) = if small_leaves {
            let byte = *buf
                .get(offset)
                .ok_or_else(|| Error::EncodingError("truncated val-length byte".into()))?;
            let is_ext = byte & VAL_LEN_EXT_DATA_FLAG != 0;
            ((byte & !VAL_LEN_EXT_DATA_FLAG) as usize, is_ext, 1)
        } else {
            let slice = buf
                .get(offset..offset + 4)
                .ok_or_else(|| Error::EncodingError("truncated val-length field".into()))?;
            let raw = u32::from_be_bytes(slice.try_into().unwrap());
            let is_ext = raw & 0x8000_0000 != 0;
            ((raw & 0x7FFF_FFFF) as usize, is_ext, 4)
        };
        offset += header_len;

        let body = buf
            .get(offset..offset + body_len)
            .ok_or_else(|| Error::EncodingError("truncated value section".into()))?;
        offset += body_len;

        let values = if is_ext {
            if body.len() < 4 {
                return Err(Error::EncodingError("truncated ext_data redirect".into()));
            }
            let total_values = u32::from_be_bytes(body[0..4].try_into().unwrap());
            let ptr = decode_unsigned(&body[4..], offset_width)?;
            ValueList::ExtRef { total_values, ptr }
        } else {
            if body.len() < 4 {
                return Err(Error::EncodingError("truncated inline value count".into()));
            }
            let count = u32::from_be_bytes(body[0..4].try_into().unwrap()) as usize;
            let mut values = Vec::with_capacity(count);
            let mut cursor = 4;
            for _ in 0..count {
                let (value, n) = EntryValue::decode(&body[cursor..], metadata_count)?;
                values.push(value);
                cursor += n;
            }
            ValueList::Inline(values)
        };

        Ok((LeafEntry { key, values }, offset))
    }
}

#[cfg(test)]
#[path = "entry_test.rs"]
mod entry_test;
