//! Module `key` implements the typed key codec (component A): encode and
//! decode keys and metadata-tuple values as `tag + length + payload`, and
//! the deterministic cross-type comparator every other component relies on.

use std::cmp::Ordering;
use std::convert::TryInto;

use crate::error::{Error, Result};

const TAG_ABSENT: u8 = 0;
const TAG_STRING: u8 = 1;
const TAG_NUMBER: u8 = 2;
const TAG_BOOLEAN: u8 = 3;
const TAG_DATE: u8 = 4;

/// Maximum encoded length of a string key, record pointer, or metadata
/// string value.
pub const MAX_PAYLOAD_LEN: usize = 255;

/// A typed key (or metadata value). Ordered by [Key::cmp]: `Absent` sorts
/// before everything, then `Bool`, then `Num`/`Date` (compared as numbers
/// against each other), then `Str`.
#[derive(Clone, Debug)]
pub enum Key {
    Absent,
    Str(String),
    Num(f64),
    Bool(bool),
    Date(i64),
}

impl Key {
    fn class_rank(&self) -> u8 {
        match self {
            Key::Absent => 0,
            Key::Bool(_) => 1,
            Key::Num(_) | Key::Date(_) => 2,
            Key::Str(_) => 3,
        }
    }

    /// Numeric projection used to compare `Num` against `Date` within the
    /// shared class-2 rank: dates compare as their epoch-millisecond value.
    fn numeric_value(&self) -> Option<f64> {
        match self {
            Key::Num(n) => Some(*n),
            Key::Date(ms) => Some(*ms as f64),
            _ => None,
        }
    }

    /// Encode this key as `tag(1) + len(1) + payload(len)`, appending to
    /// `buf`. Returns the number of bytes appended.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<usize> {
        let start = buf.len();
        match self {
            Key::Absent => {
                buf.push(TAG_ABSENT);
                buf.push(0);
            }
            Key::Str(s) => {
                let bytes = s.as_bytes();
                if bytes.len() > MAX_PAYLOAD_LEN {
                    return Err(Error::EncodingError(format!(
                        "string key of {} bytes exceeds {} byte limit",
                        bytes.len(),
                        MAX_PAYLOAD_LEN
                    )));
                }
                buf.push(TAG_STRING);
                buf.push(bytes.len() as u8);
                buf.extend_from_slice(bytes);
            }
            Key::Num(n) => {
                if n.is_nan() {
                    return Err(Error::EncodingError("NaN is not an orderable key".into()));
                }
                let trimmed = trim_trailing_zeros(&n.to_be_bytes());
                buf.push(TAG_NUMBER);
                buf.push(trimmed.len() as u8);
                buf.extend_from_slice(trimmed);
            }
            Key::Bool(b) => {
                buf.push(TAG_BOOLEAN);
                buf.push(1);
                buf.push(if *b { 1 } else { 0 });
            }
            Key::Date(ms) => {
                let trimmed = trim_trailing_zeros(&ms.to_be_bytes());
                buf.push(TAG_DATE);
                buf.push(trimmed.len() as u8);
                buf.extend_from_slice(trimmed);
            }
        }
        Ok(buf.len() - start)
    }

    /// Decode a key from the front of `buf`. Returns the decoded key and
    /// the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Key, usize)> {
        if buf.len() < 2 {
            return Err(Error::EncodingError("truncated key header".into()));
        }
        let tag = buf[0];
        let len = buf[1] as usize;
        if buf.len() < 2 + len {
            return Err(Error::EncodingError("truncated key payload".into()));
        }
        let payload = &buf[2..2 + len];
        let key = match tag {
            TAG_ABSENT => Key::Absent,
            TAG_STRING => {
                let s = std::str::from_utf8(payload)
                    .map_err(|e| Error::EncodingError(format!("invalid utf8 key: {}", e)))?;
                Key::Str(s.to_string())
            }
            TAG_NUMBER => Key::Num(f64::from_be_bytes(pad_to_8(payload))),
            TAG_BOOLEAN => {
                if payload.is_empty() {
                    return Err(Error::EncodingError("empty boolean key".into()));
                }
                Key::Bool(payload[0] != 0)
            }
            TAG_DATE => Key::Date(i64::from_be_bytes(pad_to_8(payload))),
            other => return Err(Error::EncodingError(format!("unknown key tag {}", other))),
        };
        Ok((key, 2 + len))
    }
}

fn trim_trailing_zeros(bytes: &[u8; 8]) -> &[u8] {
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1] == 0 {
        end -= 1;
    }
    &bytes[..end]
}

fn pad_to_8(payload: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    let n = payload.len().min(8);
    out[..n].copy_from_slice(&payload[..n]);
    out
}

impl PartialEq for Key {
    fn eq(&self, other: &Key) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Key) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Key) -> Ordering {
        let (a, b) = (self.class_rank(), other.class_rank());
        if a != b {
            return a.cmp(&b);
        }
        match (self, other) {
            (Key::Absent, Key::Absent) => Ordering::Equal,
            (Key::Bool(x), Key::Bool(y)) => x.cmp(y),
            (Key::Str(x), Key::Str(y)) => x.as_bytes().cmp(y.as_bytes()),
            _ => {
                // Both in the Num/Date class rank; compare numerically.
                let x = self.numeric_value().unwrap();
                let y = other.numeric_value().unwrap();
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        }
    }
}

/// An ordered list of typed values, one per declared metadata key. Encoded
/// and decoded as a back-to-back sequence of [Key] codecs; the schema
/// (count and names) lives in the tree header, not in the tuple itself.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetaTuple(pub Vec<Key>);

impl MetaTuple {
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<usize> {
        let start = buf.len();
        for value in &self.0 {
            value.encode(buf)?;
        }
        Ok(buf.len() - start)
    }

    /// Decode exactly `count` values from the front of `buf`.
    pub fn decode(buf: &[u8], count: usize) -> Result<(MetaTuple, usize)> {
        let mut offset = 0;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            let (key, n) = Key::decode(&buf[offset..])?;
            values.push(key);
            offset += n;
        }
        Ok((MetaTuple(values), offset))
    }
}

/// Validate a record pointer's length against the 255-byte payload limit
/// shared with the key codec (§3 Record pointer).
pub fn validate_record_pointer(rp: &[u8]) -> Result<()> {
    if rp.len() > MAX_PAYLOAD_LEN {
        return Err(Error::EncodingError(format!(
            "record pointer of {} bytes exceeds {} byte limit",
            rp.len(),
            MAX_PAYLOAD_LEN
        )));
    }
    Ok(())
}

pub(crate) fn try_u8(n: usize, msg: &str) -> Result<u8> {
    n.try_into()
        .map_err(|_| Error::EncodingError(format!("{}: {} does not fit in a byte", msg, n)))
}

#[cfg(test)]
#[path = "key_test.rs"]
mod key_test;
