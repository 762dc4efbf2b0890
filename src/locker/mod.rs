// # Chunk locker (C3)
//
// A process-wide `(family, chunk) -> owner` registry. Ported from the
// original `ChunkLocker::lock/release/locked` semantics: a two-map design
// (`chunk -> owner` and `owner -> chunks`) so that releasing everything held
// by one owner doesn't require scanning the whole table.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

use crate::catalog::Chunk;

/// Thread-safe `(family, chunk) -> owner` registry (spec §4.3).
pub struct ChunkLocker {
    inner: Mutex<Locks>,
}

#[derive(Default)]
struct Locks {
    chunk_to_owner: HashMap<Chunk, String>,
    owner_to_chunks: HashMap<String, HashSet<Chunk>>,
}

impl ChunkLocker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Locks::default()),
        }
    }

    /// Returns `true` if `chunk` was free or already held by `owner`; `false`
    /// if held by someone else. Matches the source's `lock()`.
    pub fn lock(&self, chunk: Chunk, owner: &str) -> bool {
        let mut locks = self.inner.lock();
        match locks.chunk_to_owner.get(&chunk) {
            Some(current) if current == owner => true,
            Some(_) => false,
            None => {
                locks.chunk_to_owner.insert(chunk.clone(), owner.to_string());
                locks
                    .owner_to_chunks
                    .entry(owner.to_string())
                    .or_default()
                    .insert(chunk);
                true
            }
        }
    }

    /// Drops the lock on `chunk` regardless of who holds it. Returns the
    /// owner that was released, if any.
    pub fn release_chunk(&self, chunk: &Chunk) -> Option<String> {
        let mut locks = self.inner.lock();
        let owner = locks.chunk_to_owner.remove(chunk)?;
        if let Some(chunks) = locks.owner_to_chunks.get_mut(&owner) {
            chunks.remove(chunk);
            if chunks.is_empty() {
                locks.owner_to_chunks.remove(&owner);
            }
        }
        Some(owner)
    }

    /// Drops every chunk held by `owner` and returns the list that was held.
    pub fn release_owner(&self, owner: &str) -> Vec<Chunk> {
        let mut locks = self.inner.lock();
        let Some(chunks) = locks.owner_to_chunks.remove(owner) else {
            return Vec::new();
        };
        for chunk in &chunks {
            locks.chunk_to_owner.remove(chunk);
        }
        chunks.into_iter().collect()
    }

    /// Snapshot of the chunks currently held by `owner`.
    pub fn locked(&self, owner: &str) -> Vec<Chunk> {
        self.inner
            .lock()
            .owner_to_chunks
            .get(owner)
            .map(|chunks| chunks.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn owner_of(&self, chunk: &Chunk) -> Option<String> {
        self.inner.lock().chunk_to_owner.get(chunk).cloned()
    }
}

impl Default for ChunkLocker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(n: u64) -> Chunk {
        Chunk {
            family: "LSST".to_string(),
            number: n,
        }
    }

    #[test]
    fn lock_c_a_then_lock_c_a_returns_true() {
        let locker = ChunkLocker::new();
        assert!(locker.lock(chunk(7), "A"));
        assert!(locker.lock(chunk(7), "A"));
    }

    #[test]
    fn lock_c_b_returns_false_when_held_by_a() {
        let locker = ChunkLocker::new();
        assert!(locker.lock(chunk(7), "A"));
        assert!(!locker.lock(chunk(7), "B"));
    }

    #[test]
    fn release_owner_frees_it() {
        let locker = ChunkLocker::new();
        locker.lock(chunk(7), "A");
        let released = locker.release_owner("A");
        assert_eq!(released, vec![chunk(7)]);
        assert!(locker.lock(chunk(7), "B"));
    }

    #[test]
    fn release_chunk_with_mismatched_caller_still_drops_it() {
        let locker = ChunkLocker::new();
        locker.lock(chunk(7), "A");
        assert_eq!(locker.release_chunk(&chunk(7)), Some("A".to_string()));
        assert!(locker.locked("A").is_empty());
    }

    #[test]
    fn release_chunk_on_unheld_chunk_is_a_no_op() {
        let locker = ChunkLocker::new();
        assert_eq!(locker.release_chunk(&chunk(99)), None);
    }

    #[test]
    fn owner_bucket_removed_when_empty() {
        let locker = ChunkLocker::new();
        locker.lock(chunk(1), "A");
        locker.lock(chunk(2), "A");
        locker.release_chunk(&chunk(1));
        locker.release_chunk(&chunk(2));
        assert!(locker.locked("A").is_empty());
    }
}
