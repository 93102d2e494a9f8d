//! Module `lock` is the named lock registry (component L): re-entrancy
//! free mutexes keyed by a caller-provided name (tree id, optionally
//! qualified by leaf id), with FIFO waiters and a timeout.
//!
//! Modeled as a process-wide map, mirroring the teacher's use of
//! `lazy_static` for global registries (`thread.rs`, `file_lock.rs`)
//! but built on `std::sync::{Mutex, Condvar}` rather than the teacher's
//! spin-latch `gate.rs`, since FIFO-with-timeout needs blocking wait,
//! not busy-spin.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use log::debug;

use crate::error::{Error, Result};

lazy_static! {
    static ref REGISTRY: Mutex<HashMap<String, Arc<NamedLock>>> = Mutex::new(HashMap::new());
}

struct LockInner {
    held: bool,
    next_ticket: u64,
    now_serving: u64,
    abandoned: HashSet<u64>,
}

struct NamedLock {
    inner: Mutex<LockInner>,
    cond: std::sync::Condvar,
}

impl NamedLock {
    fn new() -> NamedLock {
        NamedLock {
            inner: Mutex::new(LockInner {
                held: false,
                next_ticket: 0,
                now_serving: 0,
                abandoned: HashSet::new(),
            }),
            cond: std::sync::Condvar::new(),
        }
    }

    fn acquire(&self, name: &str, timeout: Duration) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        let my_ticket = guard.next_ticket;
        guard.next_ticket += 1;
        let deadline = Instant::now() + timeout;

        loop {
            if !guard.held && guard.now_serving == my_ticket {
                guard.held = true;
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                self.abandon(&mut guard, my_ticket);
                debug!(target: "lock", "{:?} timed out waiting on ticket {}", name, my_ticket);
                return Err(Error::LockTimeout(name.to_string()));
            }
            let (next_guard, _) = self.cond.wait_timeout(guard, deadline - now).unwrap();
            guard = next_guard;
        }
    }

    fn abandon(&self, guard: &mut LockInner, ticket: u64) {
        if guard.now_serving == ticket {
            self.advance_past(guard);
        } else {
            guard.abandoned.insert(ticket);
        }
        self.cond.notify_all();
    }

    fn advance_past(&self, guard: &mut LockInner) {
        guard.now_serving += 1;
        while guard.abandoned.remove(&guard.now_serving) {
            guard.now_serving += 1;
        }
    }

    fn release(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.held = false;
        self.advance_past(&mut guard);
        self.cond.notify_all();
    }
}

/// A held named lock. Releases on [Handle::release] or, as a safety
/// net, on drop.
pub struct Handle {
    name: String,
    lock: Arc<NamedLock>,
    released: bool,
}

impl Handle {
    pub fn release(mut self) {
        self.lock.release();
        self.released = true;
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if !self.released {
            self.lock.release();
        }
    }
}

/// Acquire the named lock, waiting up to `timeout` in FIFO order among
/// concurrent waiters. Fails with [Error::LockTimeout] if not granted in
/// time.
pub fn lock(name: &str, timeout: Duration) -> Result<Handle> {
    let named = {
        let mut registry = REGISTRY.lock().unwrap();
        registry
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(NamedLock::new()))
            .clone()
    };
    named.acquire(name, timeout)?;
    Ok(Handle {
        name: name.to_string(),
        lock: named,
        released: false,
    })
}

/// Compose the registry key for a leaf-scoped lock, qualifying the tree
/// id with the leaf's byte offset (its identity, per §4.H concurrency
/// notes: "Leaf-level locks (keyed by leaf identity)").
pub fn leaf_lock_name(tree_id: &str, leaf_offset: u64) -> String {
    format!("{}/leaf:{}", tree_id, leaf_offset)
}

#[cfg(test)]
#[path = "lock_test.rs"]
mod lock_test;
