//! Module `search` is the search engine (component G): executes the
//! typed comparison operators over an on-disk tree, choosing a traversal
//! strategy per operator and materializing ext_data-backed value lists
//! on demand (§4.G).

use regex::Regex;

use crate::config::Config;
use crate::entry::{EntryValue, ValueList};
use crate::error::{Error, Result};
use crate::key::Key;
use crate::layout::{ExtDataBlock, LeafImage};
use crate::navigator;
use crate::source::{ByteSource, Reader};

/// A typed comparison operator (§4.G). `Like`/`Matches` operate on string
/// keys; applied to a non-string key they simply never match.
#[derive(Clone, Debug)]
pub enum Operator {
    Eq(Key),
    Ne(Key),
    Lt(Key),
    Le(Key),
    Gt(Key),
    Ge(Key),
    In(Vec<Key>),
    NotIn(Vec<Key>),
    Between(Key, Key),
    NotBetween(Key, Key),
    Like(String),
    NotLike(String),
    Matches(String),
    NotMatches(String),
    Exists(Key),
    NotExists(Key),
}

/// What the caller wants back; any subset may be requested in a single
/// pass over the matched entries (§4.G).
#[derive(Clone, Debug, Default)]
pub struct SearchRequest {
    pub want_entries: bool,
    pub want_keys: bool,
    pub want_values: bool,
    pub want_count: bool,
    /// Applied per-entry-value: values whose record pointer doesn't
    /// equal this filter are dropped before projection.
    pub record_pointer_filter: Option<Vec<u8>>,
}

#[derive(Clone, Debug, Default)]
pub struct SearchResponse {
    pub entries: Option<Vec<(Key, Vec<EntryValue>)>>,
    pub keys: Option<Vec<Key>>,
    pub values: Option<Vec<EntryValue>>,
    pub count: Option<u64>,
}

struct Matched {
    key: Key,
    values: Vec<EntryValue>,
}

fn key_as_str(key: &Key) -> Option<&str> {
    match key {
        Key::Str(s) => Some(s.as_str()),
        _ => None,
    }
}

fn literal_prefix(pattern: &str) -> &str {
    let end = pattern.find(&['*', '?'][..]).unwrap_or(pattern.len());
    &pattern[..end]
}

fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '.' | '+' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$' | '\\' => {
                re.push('\\');
                re.push(ch);
            }
            _ => re.push(ch),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| Error::EncodingError(format!("invalid like pattern: {}", e)))
}

/// Resolve a value list to its concrete values, reading the ext_data
/// block when `values` is a redirect. Shared with the mutator (component
/// H), which must materialize a leaf's current values before replanning
/// them around an edit.
pub(crate) fn materialize(
    source: &dyn ByteSource,
    leaf_offset: u64,
    leaf_byte_length: u64,
    values: &ValueList,
    metadata_count: usize,
) -> Result<Vec<EntryValue>> {
    match values {
        ValueList::Inline(v) => Ok(v.clone()),
        ValueList::ExtRef { ptr, .. } => {
            let ext_offset = navigator::ext_data_absolute(leaf_offset, leaf_byte_length, *ptr);
            let mut reader = Reader::init(source);
            reader.seek(ext_offset);
            let header = reader.get(4)?;
            let block_len = u32::from_be_bytes(header.as_slice().try_into().unwrap()) as usize;
            let whole = source.read_at(ext_offset, block_len)?;
            let (block, _free, _len) = ExtDataBlock::decode(&whole, metadata_count)?;
            Ok(block.values)
        }
    }
}

fn collect_leaf(
    source: &dyn ByteSource,
    leaf_offset: u64,
    leaf_byte_length: u64,
    image: &LeafImage,
    metadata_count: usize,
    mut keep: impl FnMut(&Key) -> bool,
    out: &mut Vec<Matched>,
) -> Result<()> {
    for entry in &image.entries {
        if !keep(&entry.key) {
            continue;
        }
        let values = materialize(source, leaf_offset, leaf_byte_length, &entry.values, metadata_count)?;
        out.push(Matched { key: entry.key.clone(), values });
    }
    Ok(())
}

fn full_scan(
    source: &dyn ByteSource,
    root_offset: u64,
    config: &Config,
    metadata_count: usize,
    mut keep: impl FnMut(&Key) -> bool,
) -> Result<Vec<Matched>> {
    let mut out = Vec::new();
    let (mut offset, mut image, mut byte_length) = navigator::get_first_leaf(source, root_offset, config, metadata_count)?;
    loop {
        collect_leaf(source, offset, byte_length, &image, metadata_count, &mut keep, &mut out)?;
        match navigator::get_next(source, offset, &image, config, metadata_count)? {
            Some((next_offset, next_image, next_len)) => {
                offset = next_offset;
                image = next_image;
                byte_length = next_len;
            }
            None => break,
        }
    }
    Ok(out)
}

fn forward_walk(
    source: &dyn ByteSource,
    root_offset: u64,
    start_key: &Key,
    config: &Config,
    metadata_count: usize,
    mut leaf_keep: impl FnMut(&Key) -> bool,
    mut stop: impl FnMut(&Key) -> bool,
) -> Result<Vec<Matched>> {
    let mut out = Vec::new();
    let (mut offset, mut image, mut byte_length) = navigator::find_leaf(source, root_offset, start_key, config, metadata_count)?;
    'outer: loop {
        for entry in &image.entries {
            if stop(&entry.key) {
                break 'outer;
            }
            if !leaf_keep(&entry.key) {
                continue;
            }
            let values = materialize(source, offset, byte_length, &entry.values, metadata_count)?;
            out.push(Matched { key: entry.key.clone(), values });
        }
        match navigator::get_next(source, offset, &image, config, metadata_count)? {
            Some((next_offset, next_image, next_len)) => {
                offset = next_offset;
                image = next_image;
                byte_length = next_len;
            }
            None => break,
        }
    }
    Ok(out)
}

fn backward_walk(
    source: &dyn ByteSource,
    root_offset: u64,
    start_key: &Key,
    config: &Config,
    metadata_count: usize,
    leaf_keep: impl Fn(&Key) -> bool,
) -> Result<Vec<Matched>> {
    let (offset, image, byte_length) = navigator::find_leaf(source, root_offset, start_key, config, metadata_count)?;
    let mut out = Vec::new();
    collect_leaf(source, offset, byte_length, &image, metadata_count, |k| leaf_keep(k), &mut out)?;

    let mut cursor = navigator::get_previous(source, offset, &image, config, metadata_count)?;
    while let Some((prev_offset, prev_image, prev_len)) = cursor {
        collect_leaf(source, prev_offset, prev_len, &prev_image, metadata_count, |_| true, &mut out)?;
        cursor = navigator::get_previous(source, prev_offset, &prev_image, config, metadata_count)?;
    }
    out.reverse();
    Ok(out)
}

fn point_lookup(source: &dyn ByteSource, root_offset: u64, key: &Key, config: &Config, metadata_count: usize) -> Result<Vec<Matched>> {
    let (offset, image, byte_length) = navigator::find_leaf(source, root_offset, key, config, metadata_count)?;
    let mut out = Vec::new();
    collect_leaf(source, offset, byte_length, &image, metadata_count, |k| k == key, &mut out)?;
    Ok(out)
}

/// `in`: sort and de-duplicate the needle list, jump-seek each via
/// [crate::navigator::find_leaf], opportunistically consuming further
/// needles that fall inside the loaded leaf before seeking again (§4.G).
fn in_lookup(source: &dyn ByteSource, root_offset: u64, needles: &[Key], config: &Config, metadata_count: usize) -> Result<Vec<Matched>> {
    let mut sorted: Vec<Key> = needles.to_vec();
    sorted.sort();
    sorted.dedup();

    let mut out = Vec::new();
    let mut i = 0;
    while i < sorted.len() {
        let (offset, image, byte_length) = navigator::find_leaf(source, root_offset, &sorted[i], config, metadata_count)?;
        let leaf_last_key = image.entries.last().map(|e| e.key.clone());

        while i < sorted.len() {
            let needle = &sorted[i];
            if let Some(entry) = image.entries.iter().find(|e| &e.key == needle) {
                let values = materialize(source, offset, byte_length, &entry.values, metadata_count)?;
                out.push(Matched { key: needle.clone(), values });
            }
            match &leaf_last_key {
                Some(last) if needle <= last => i += 1,
                _ => break,
            }
        }
        if leaf_last_key.is_none() {
            i += 1;
        }
    }
    Ok(out)
}

/// Binary-search membership test over a sorted, de-duplicated needle
/// list: the sub-linear stand-in for a hashed lookup (§9 open question
/// b) — [Key] carries an `f64` case that cannot soundly implement
/// `Hash` alongside its custom `Eq`, so a sorted slice plays that role
/// instead of `std::collections::HashSet`.
fn sorted_contains(sorted: &[Key], needle: &Key) -> bool {
    sorted.binary_search(needle).is_ok()
}

/// `like`: when the pattern has a literal prefix before its first
/// wildcard, seek to that prefix and stop once keys run past it
/// (lexicographic runs are contiguous); otherwise fall back to a full
/// scan (§4.G).
fn like_scan(
    source: &dyn ByteSource,
    root_offset: u64,
    pattern: &str,
    config: &Config,
    metadata_count: usize,
    negate: bool,
) -> Result<Vec<Matched>> {
    let re = glob_to_regex(pattern)?;
    let prefix = literal_prefix(pattern);
    let test = |key: &Key| -> bool {
        let matched = key_as_str(key).map(|s| re.is_match(s)).unwrap_or(false);
        matched != negate
    };

    if negate || prefix.is_empty() {
        return full_scan(source, root_offset, config, metadata_count, test);
    }

    let start_key = Key::Str(prefix.to_string());
    forward_walk(
        source,
        root_offset,
        &start_key,
        config,
        metadata_count,
        test,
        move |key| match key_as_str(key) {
            Some(s) => !s.starts_with(prefix),
            None => true,
        },
    )
}

fn project(matched: Vec<Matched>, request: &SearchRequest) -> SearchResponse {
    let filtered: Vec<Matched> = match &request.record_pointer_filter {
        None => matched,
        Some(rp) => matched
            .into_iter()
            .map(|m| Matched {
                key: m.key,
                values: m.values.into_iter().filter(|v| &v.record_pointer == rp).collect(),
            })
            .collect(),
    };

    let mut response = SearchResponse::default();
    if request.want_count {
        response.count = Some(filtered.iter().map(|m| m.values.len() as u64).sum());
    }
    if request.want_keys {
        response.keys = Some(filtered.iter().map(|m| m.key.clone()).collect());
    }
    if request.want_values {
        response.values = Some(filtered.iter().flat_map(|m| m.values.clone()).collect());
    }
    if request.want_entries {
        response.entries = Some(filtered.into_iter().map(|m| (m.key, m.values)).collect());
    }
    response
}

/// Execute `op` against the tree rooted at `root_offset` and project the
/// requested subset of the result (§4.G, §6 `search`).
pub fn search(
    source: &dyn ByteSource,
    root_offset: u64,
    config: &Config,
    metadata_count: usize,
    op: &Operator,
    request: &SearchRequest,
) -> Result<SearchResponse> {
    let matched = match op {
        Operator::Eq(key) | Operator::Exists(key) => point_lookup(source, root_offset, key, config, metadata_count)?,
        Operator::Ne(key) => full_scan(source, root_offset, config, metadata_count, |k| k != key)?,
        // "key is absent" is a predicate about the tree, not about any row
        // in it, so it never has matched entries to materialize; a caller
        // asking for a count still gets a meaningful 0.
        Operator::NotExists(_) => Vec::new(),
        Operator::Lt(bound) => backward_walk(source, root_offset, bound, config, metadata_count, |k| k < bound)?,
        Operator::Le(bound) => backward_walk(source, root_offset, bound, config, metadata_count, |k| k <= bound)?,
        Operator::Gt(bound) => forward_walk(source, root_offset, bound, config, metadata_count, |k| k > bound, |_| false)?,
        Operator::Ge(bound) => forward_walk(source, root_offset, bound, config, metadata_count, |k| k >= bound, |_| false)?,
        Operator::Between(lo, hi) => {
            let hi = hi.clone();
            let hi_stop = hi.clone();
            forward_walk(source, root_offset, lo, config, metadata_count, move |k| k <= &hi, move |k| k > &hi_stop)?
        }
        Operator::NotBetween(lo, hi) => full_scan(source, root_offset, config, metadata_count, |k| k < lo || k > hi)?,
        Operator::In(needles) => in_lookup(source, root_offset, needles, config, metadata_count)?,
        Operator::NotIn(needles) => {
            let mut sorted: Vec<Key> = needles.clone();
            sorted.sort();
            sorted.dedup();
            full_scan(source, root_offset, config, metadata_count, |k| !sorted_contains(&sorted, k))?
        }
        Operator::Like(pattern) => like_scan(source, root_offset, pattern, config, metadata_count, false)?,
        Operator::NotLike(pattern) => like_scan(source, root_offset, pattern, config, metadata_count, true)?,
        Operator::Matches(pattern) => {
            let re = Regex::new(pattern).map_err(|e| Error::EncodingError(format!("invalid regex: {}", e)))?;
            full_scan(source, root_offset, config, metadata_count, move |k| {
                key_as_str(k).map(|s| re.is_match(s)).unwrap_or(false)
            })?
        }
        Operator::NotMatches(pattern) => {
            let re = Regex::new(pattern).map_err(|e| Error::EncodingError(format!("invalid regex: {}", e)))?;
            full_scan(source, root_offset, config, metadata_count, move |k| {
                !key_as_str(k).map(|s| re.is_match(s)).unwrap_or(false)
            })?
        }
    };
    Ok(project(matched, request))
}

#[cfg(test)]
#[path = "search_test.rs"]
mod search_test;
