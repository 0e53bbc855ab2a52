// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core façade presented to the shell: open, dedup query, stage,
//! commit, search, reset.

use anyhow::{Context, Result};
use std::fs;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::warn;

use crate::dedup::DedupCache;
use crate::errors::IndexCorruptionError;
use crate::planner::{self, SearchHit, SearchRequest};
use crate::scanner::FileMeta;
use crate::store::{IndexStore, StoreSettings};

/// One open index plus its dedup cache.
///
/// Dedup records for staged writes are held back until the commit that
/// makes them durable succeeds, so the cache never reports a write the
/// index could still lose. Result vectors free on drop; there is no
/// separate release call.
pub struct Engine {
    store: RwLock<IndexStore>,
    dedup: DedupCache,
    pending: Mutex<Vec<(String, i64, u64)>>,
}

impl Engine {
    /// Open or create the index under `dir`. Idempotent; a corrupt index
    /// is wiped and recreated empty so the caller always gets a working
    /// (if freshly rebuilt) engine.
    pub fn open(dir: &Path, settings: StoreSettings) -> Result<Engine> {
        let store = match IndexStore::open(dir, settings) {
            Ok(store) => store,
            Err(err) if err.downcast_ref::<IndexCorruptionError>().is_some() => {
                warn!("rebuilding corrupt index: {err:#}");
                remove_index_dir(dir)?;
                IndexStore::open(dir, settings)?
            }
            Err(err) => return Err(err),
        };

        let dedup = DedupCache::rebuild(&store).context("failed to rebuild dedup cache")?;

        Ok(Engine {
            store: RwLock::new(store),
            dedup,
            pending: Mutex::new(Vec::new()),
        })
    }

    /// True when the file is new or its `(mtime, size)` differ from the
    /// committed document. O(1); fails open on cache miss.
    pub fn should_reindex(&self, meta: &FileMeta) -> bool {
        self.dedup.needs_reindex(&meta.path, meta.mtime, meta.size)
    }

    /// Stage a write superseding any prior document with the same path.
    /// Invisible to searches until [`Engine::commit_and_refresh`].
    pub fn add_or_update(&self, meta: &FileMeta, content: Option<&str>) -> Result<()> {
        self.read_store().add_or_replace(meta, content)?;
        self.pending
            .lock()
            .expect("pending records mutex poisoned")
            .push((meta.path.clone(), meta.mtime, meta.size));
        Ok(())
    }

    /// Flush staged writes and refresh the reader. On success the dedup
    /// cache absorbs every staged record; on failure staged documents stay
    /// in the writer for the next attempt.
    pub fn commit_and_refresh(&self) -> Result<()> {
        self.read_store().commit()?;
        let drained = mem::take(
            &mut *self
                .pending
                .lock()
                .expect("pending records mutex poisoned"),
        );
        self.dedup.record_all(drained);
        Ok(())
    }

    pub fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        planner::search(&self.read_store(), request)
    }

    /// Delete the on-disk index and start empty. The only path that ever
    /// removes documents; incremental crawls tolerate stale entries.
    pub fn reset(&self) -> Result<()> {
        let mut store = self.store.write().expect("index store lock poisoned");
        store.reset()?;
        self.dedup.clear();
        self.pending
            .lock()
            .expect("pending records mutex poisoned")
            .clear();
        Ok(())
    }

    pub fn num_docs(&self) -> u64 {
        self.read_store().num_docs()
    }

    pub fn index_dir(&self) -> PathBuf {
        self.read_store().dir().to_path_buf()
    }

    pub fn dedup_len(&self) -> usize {
        self.dedup.len()
    }

    fn read_store(&self) -> std::sync::RwLockReadGuard<'_, IndexStore> {
        self.store.read().expect("index store lock poisoned")
    }
}

fn remove_index_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            Err(err).with_context(|| format!("failed deleting index directory {}", dir.display()))
        }
    }
}
