//! Module `alloc` is the free-space allocator (component I): best-fit
//! over reclaimed regions, tail growth, optional auto-grow, and the
//! 50%-reclaimed safety trip that signals a rebuild is overdue.

use log::{debug, warn};

use crate::error::{Error, Result};

/// A free-space allocator over one tree's byte region.
///
/// Tracks the tree's current total length, the free tail past the last
/// live record, and a list of reclaimed `{offset, length}` regions freed
/// by rebuild/split (§4.I).
#[derive(Clone, Debug)]
pub struct Allocator {
    original_total_length: u64,
    total_length: u64,
    free_tail_length: u64,
    reclaimed: Vec<(u64, u64)>,
    auto_grow: bool,
}

impl Allocator {
    pub fn new(total_length: u64, free_tail_length: u64, auto_grow: bool) -> Allocator {
        Allocator {
            original_total_length: total_length,
            total_length,
            free_tail_length,
            reclaimed: Vec::new(),
            auto_grow,
        }
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn free_tail_length(&self) -> u64 {
        self.free_tail_length
    }

    pub fn reclaimed_regions(&self) -> &[(u64, u64)] {
        &self.reclaimed
    }

    fn reclaimed_sum(&self) -> u64 {
        self.reclaimed.iter().map(|(_, len)| len).sum()
    }

    /// Request `n` contiguous bytes; returns `(offset, length)` of the
    /// reserved region. `length` is always `>= n` (best-fit regions may
    /// be larger than requested).
    pub fn request(&mut self, n: u64) -> Result<(u64, u64)> {
        if self.reclaimed_sum() * 2 > self.original_total_length {
            warn!(
                target: "alloc", "reclaimed {} bytes exceeds 50% of original length {}, rebuild overdue",
                self.reclaimed_sum(), self.original_total_length
            );
            return Err(Error::RebuildRequired(format!(
                "reclaimed {} bytes exceeds 50% of original length {}",
                self.reclaimed_sum(),
                self.original_total_length
            )));
        }

        if let Some(idx) = self.best_fit_index(n) {
            let region = self.reclaimed.remove(idx);
            return Ok(region);
        }

        if self.free_tail_length >= n {
            return Ok(self.carve_tail(n));
        }

        if self.auto_grow {
            let grow = n - self.free_tail_length;
            debug!(target: "alloc", "growing tree region by {} bytes to satisfy a {}-byte request", grow, n);
            self.total_length += grow;
            self.free_tail_length += grow;
            return Ok(self.carve_tail(n));
        }

        Err(Error::NoSpace(format!(
            "requested {} bytes, tail has {} and auto-grow is disabled",
            n, self.free_tail_length
        )))
    }

    fn carve_tail(&mut self, n: u64) -> (u64, u64) {
        let offset = self.total_length - self.free_tail_length;
        self.free_tail_length -= n;
        (offset, n)
    }

    fn best_fit_index(&self, n: u64) -> Option<usize> {
        self.reclaimed
            .iter()
            .enumerate()
            .filter(|(_, (_, len))| *len >= n)
            .min_by_key(|(_, (_, len))| *len)
            .map(|(idx, _)| idx)
    }

    /// Release a previously-allocated region. Contiguous-with-tail
    /// releases extend the tail instead of growing the reclaimed list.
    pub fn release(&mut self, offset: u64, length: u64) {
        let tail_start = self.total_length - self.free_tail_length;
        if offset + length == tail_start {
            self.free_tail_length += length;
        } else {
            self.reclaimed.push((offset, length));
        }
    }
}

#[cfg(test)]
#[path = "alloc_test.rs"]
mod alloc_test;
