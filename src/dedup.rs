// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity & dedup cache: O(1) "has this (path, mtime, size) already
//! been indexed?" decisions.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::store::IndexStore;

/// Map of `path -> (mtime, size)` for every committed document.
///
/// Fails open: a path the cache has never seen always needs reindexing.
/// The pipeline records entries only after the enclosing commit succeeds,
/// so the cache never claims knowledge of writes that could still be lost.
#[derive(Debug, Default)]
pub struct DedupCache {
    entries: RwLock<HashMap<String, (i64, u64)>>,
}

impl DedupCache {
    pub fn new() -> DedupCache {
        DedupCache::default()
    }

    /// Rebuild from the stored fields of every live document.
    pub fn rebuild(store: &IndexStore) -> Result<DedupCache> {
        let cache = DedupCache::new();
        cache.record_all(store.stored_identities()?);
        Ok(cache)
    }

    /// True when the file must be (re)indexed: unknown path, or a known
    /// path whose observed mtime or size differs from the committed one.
    pub fn needs_reindex(&self, path: &str, mtime: i64, size: u64) -> bool {
        let entries = self.entries.read().expect("dedup cache lock poisoned");
        match entries.get(path) {
            Some(&(seen_mtime, seen_size)) => seen_mtime != mtime || seen_size != size,
            None => true,
        }
    }

    pub fn record(&self, path: String, mtime: i64, size: u64) {
        let mut entries = self.entries.write().expect("dedup cache lock poisoned");
        entries.insert(path, (mtime, size));
    }

    pub fn record_all<I>(&self, records: I)
    where
        I: IntoIterator<Item = (String, i64, u64)>,
    {
        let mut entries = self.entries.write().expect("dedup cache lock poisoned");
        for (path, mtime, size) in records {
            entries.insert(path, (mtime, size));
        }
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .expect("dedup cache lock poisoned")
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("dedup cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::DedupCache;

    #[test]
    fn unknown_path_needs_reindex() {
        let cache = DedupCache::new();
        assert!(cache.needs_reindex("/tmp/a.txt", 100, 5));
    }

    #[test]
    fn matching_entry_is_unchanged() {
        let cache = DedupCache::new();
        cache.record("/tmp/a.txt".into(), 100, 5);
        assert!(!cache.needs_reindex("/tmp/a.txt", 100, 5));
    }

    #[test]
    fn differing_mtime_or_size_needs_reindex() {
        let cache = DedupCache::new();
        cache.record("/tmp/a.txt".into(), 100, 5);
        assert!(cache.needs_reindex("/tmp/a.txt", 101, 5));
        assert!(cache.needs_reindex("/tmp/a.txt", 100, 6));
    }

    #[test]
    fn record_all_overwrites_prior_entries() {
        let cache = DedupCache::new();
        cache.record("/tmp/a.txt".into(), 100, 5);
        cache.record_all(vec![("/tmp/a.txt".into(), 200, 9)]);
        assert!(!cache.needs_reindex("/tmp/a.txt", 200, 9));
        assert!(cache.needs_reindex("/tmp/a.txt", 100, 5));
    }
}
