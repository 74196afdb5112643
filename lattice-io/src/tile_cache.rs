//! Shared cache of unfiltered tile bytes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use ahash::AHashMap;

/// Cache key: the tile's file URI and its byte offset within that file.
type Key = (String, u64);

/// Byte-budgeted cache of unfiltered tile payloads, shared across readers.
///
/// Inserts are idempotent per key: a second insert for a key already present
/// is a no-op, so concurrent readers decoding the same tile cannot clobber
/// each other. Eviction is oldest-insert-first once the byte budget is
/// exceeded.
pub struct TileCache {
    inner: Mutex<Inner>,
    max_bytes: usize,
}

struct Inner {
    entries: AHashMap<Key, Arc<Vec<u8>>>,
    order: VecDeque<Key>,
    bytes: usize,
}

impl TileCache {
    pub fn new(max_bytes: usize) -> TileCache {
        TileCache {
            inner: Mutex::new(Inner {
                entries: AHashMap::new(),
                order: VecDeque::new(),
                bytes: 0,
            }),
            max_bytes,
        }
    }

    /// Returns the cached unfiltered bytes for `(uri, offset)`, if present.
    pub fn lookup(&self, uri: &str, offset: u64) -> Option<Arc<Vec<u8>>> {
        let inner = self.inner.lock().expect("cache lock");
        inner.entries.get(&(uri.to_string(), offset)).cloned()
    }

    /// Inserts the unfiltered bytes for `(uri, offset)` unless already cached.
    pub fn insert(&self, uri: &str, offset: u64, bytes: Arc<Vec<u8>>) {
        if bytes.len() > self.max_bytes {
            return;
        }
        let key = (uri.to_string(), offset);
        let mut inner = self.inner.lock().expect("cache lock");
        if inner.entries.contains_key(&key) {
            return;
        }
        inner.bytes += bytes.len();
        inner.order.push_back(key.clone());
        inner.entries.insert(key, bytes);
        while inner.bytes > self.max_bytes {
            let victim = inner.order.pop_front().expect("eviction victim");
            if let Some(evicted) = inner.entries.remove(&victim) {
                inner.bytes -= evicted.len();
            }
        }
    }

    /// Current number of cached tiles.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::TileCache;

    #[test]
    fn insert_is_idempotent_per_key() {
        let cache = TileCache::new(1024);
        cache.insert("f", 0, Arc::new(vec![1, 2, 3]));
        cache.insert("f", 0, Arc::new(vec![9, 9, 9]));
        assert_eq!(cache.lookup("f", 0).unwrap().as_slice(), &[1, 2, 3]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_offsets_are_distinct_entries() {
        let cache = TileCache::new(1024);
        cache.insert("f", 0, Arc::new(vec![1]));
        cache.insert("f", 64, Arc::new(vec![2]));
        assert_eq!(cache.lookup("f", 64).unwrap().as_slice(), &[2]);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn evicts_oldest_when_over_budget() {
        let cache = TileCache::new(8);
        cache.insert("f", 0, Arc::new(vec![0u8; 4]));
        cache.insert("f", 4, Arc::new(vec![0u8; 4]));
        cache.insert("f", 8, Arc::new(vec![0u8; 4]));
        assert!(cache.lookup("f", 0).is_none());
        assert!(cache.lookup("f", 8).is_some());
    }

    #[test]
    fn oversized_payload_is_not_cached() {
        let cache = TileCache::new(4);
        cache.insert("f", 0, Arc::new(vec![0u8; 16]));
        assert!(cache.is_empty());
    }
}
