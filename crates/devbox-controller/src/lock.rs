//! Per-Devbox try-locks.
//!
//! At most one reconcile pass runs per identity. A second attempt for the same
//! identity gets `None` back immediately and is expected to requeue itself.
//! Entries are created lazily and evicted once idle for longer than a TTL.

use devbox_core::ObjectKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
struct LockEntry {
    held: bool,
    last_released: Instant,
}

#[derive(Debug, Default)]
pub struct LockTable {
    entries: Mutex<HashMap<ObjectKey, LockEntry>>,
}

/// Held lock; released on drop
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    table: &'a LockTable,
    key: ObjectKey,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking acquire. Returns `None` while another holder is in flight.
    pub fn try_acquire(&self, key: &ObjectKey) -> Option<LockGuard<'_>> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.clone()).or_insert_with(|| LockEntry {
            held: false,
            last_released: Instant::now(),
        });

        if entry.held {
            return None;
        }
        entry.held = true;

        Some(LockGuard {
            table: self,
            key: key.clone(),
        })
    }

    fn release(&self, key: &ObjectKey) {
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.held = false;
            entry.last_released = Instant::now();
        }
    }

    pub fn is_held(&self, key: &ObjectKey) -> bool {
        self.entries.lock().get(key).is_some_and(|e| e.held)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop entries with no holder that were released more than `ttl` ago
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.held || e.last_released.elapsed() < ttl);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = entries.len(), "Evicted idle devbox locks");
        }
        evicted
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.table.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let table = LockTable::new();
        let key = ObjectKey::new("ns-a", "box");

        let guard = table.try_acquire(&key).unwrap();
        assert!(table.try_acquire(&key).is_none());
        assert!(table.is_held(&key));

        drop(guard);
        assert!(!table.is_held(&key));
        assert!(table.try_acquire(&key).is_some());
    }

    #[test]
    fn test_distinct_keys_do_not_contend() {
        let table = LockTable::new();
        let _a = table.try_acquire(&ObjectKey::new("ns-a", "a")).unwrap();
        let _b = table.try_acquire(&ObjectKey::new("ns-a", "b")).unwrap();
        let _c = table.try_acquire(&ObjectKey::new("ns-b", "a")).unwrap();
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_evict_idle_keeps_held_entries() {
        let table = LockTable::new();
        let held = ObjectKey::new("ns-a", "held");
        let idle = ObjectKey::new("ns-a", "idle");

        let _guard = table.try_acquire(&held).unwrap();
        drop(table.try_acquire(&idle).unwrap());

        assert_eq!(table.evict_idle(Duration::ZERO), 1);
        assert!(table.is_held(&held));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_only_one_thread_wins() {
        let table = Arc::new(LockTable::new());
        let key = ObjectKey::new("ns-a", "box");
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                let key = key.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    let guard = table.try_acquire(&key);
                    let won = guard.is_some();
                    barrier.wait();
                    won
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
