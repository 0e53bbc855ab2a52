// SPDX-License-Identifier: MIT OR Apache-2.0

//! On-disk inverted index: open, stage writes, commit, reset.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tantivy::directory::MmapDirectory;
use tantivy::merge_policy::LogMergePolicy;
use tantivy::schema::Value;
use tantivy::{DocAddress, Index, IndexReader, IndexWriter, TantivyDocument, Term};

use crate::errors::IndexCorruptionError;
use crate::scanner::FileMeta;
use crate::schema::{build_schema, Fields};

const MIN_WRITER_HEAP_BYTES: usize = 16 * 1024 * 1024;

/// Writer sizing. `writer_threads == 0` means one per CPU.
#[derive(Debug, Clone, Copy)]
pub struct StoreSettings {
    pub writer_threads: usize,
    pub writer_heap_bytes: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            writer_threads: 0,
            writer_heap_bytes: 384 * 1024 * 1024,
        }
    }
}

/// One open index directory. Owns the tantivy index, a reader whose
/// snapshot advances only on `commit`, and a mutex-guarded writer.
///
/// Instances are independent; a process may hold several.
pub struct IndexStore {
    dir: PathBuf,
    settings: StoreSettings,
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: Fields,
}

impl IndexStore {
    /// Open or create the index under `dir`. Idempotent across restarts.
    /// An existing directory that cannot be opened as an index surfaces
    /// [`IndexCorruptionError`]; recovery is `reset` and rebuild.
    pub fn open(dir: &Path, settings: StoreSettings) -> Result<IndexStore> {
        let schema = build_schema();
        fs::create_dir_all(dir)
            .with_context(|| format!("failed creating index directory: {}", dir.display()))?;

        let directory = MmapDirectory::open(dir)
            .with_context(|| format!("failed opening index directory: {}", dir.display()))?;
        let index = Index::open_or_create(directory, schema.clone()).map_err(|err| {
            anyhow::Error::new(IndexCorruptionError {
                index_dir: dir.to_path_buf(),
                detail: err.to_string(),
            })
        })?;

        let reader = index.reader().context("failed to create index reader")?;

        let threads = if settings.writer_threads == 0 {
            num_cpus::get().max(1)
        } else {
            settings.writer_threads
        };
        let writer = index
            .writer_with_num_threads(threads, settings.writer_heap_bytes.max(MIN_WRITER_HEAP_BYTES))
            .context("failed to create index writer")?;

        let mut merge_policy = LogMergePolicy::default();
        merge_policy.set_level_log_size(1.2);
        writer.set_merge_policy(Box::new(merge_policy));

        let fields = Fields::resolve(&schema)?;

        Ok(IndexStore {
            dir: dir.to_path_buf(),
            settings,
            index,
            reader,
            writer: Mutex::new(writer),
            fields,
        })
    }

    /// Stage a document, superseding any prior document with the same
    /// `path`. Not visible to searches until `commit` returns.
    pub fn add_or_replace(&self, meta: &FileMeta, content: Option<&str>) -> Result<()> {
        let writer = self.writer.lock().expect("index writer mutex poisoned");

        writer.delete_term(Term::from_field_text(self.fields.path, &meta.path));

        let mut doc = TantivyDocument::new();
        doc.add_text(self.fields.path, &meta.path);
        doc.add_text(self.fields.name_tok, &meta.name);
        doc.add_text(self.fields.name_raw, meta.name.to_lowercase());
        if let Some(ext) = &meta.ext {
            doc.add_text(self.fields.ext, ext.to_lowercase());
        }
        doc.add_i64(self.fields.mtime, meta.mtime);
        doc.add_u64(self.fields.size, meta.size);
        doc.add_u64(self.fields.inode, meta.inode);
        doc.add_u64(self.fields.dev, meta.dev);
        if let Some(content) = content {
            if !content.is_empty() {
                doc.add_text(self.fields.content, content);
            }
        }

        writer
            .add_document(doc)
            .context("failed adding document to index")?;
        Ok(())
    }

    /// Flush staged writes into an on-disk segment, then advance the
    /// reader snapshot. Either succeeds atomically or leaves the prior
    /// visible state unchanged.
    pub fn commit(&self) -> Result<()> {
        {
            let mut writer = self.writer.lock().expect("index writer mutex poisoned");
            writer.commit().context("index commit failed")?;
        }
        self.reader
            .reload()
            .context("failed to reload index reader")?;
        Ok(())
    }

    /// Delete the on-disk index and reinitialize an empty one.
    pub fn reset(&mut self) -> Result<()> {
        let dir = self.dir.clone();
        if let Err(err) = fs::remove_dir_all(&dir) {
            if err.kind() != std::io::ErrorKind::NotFound {
                return Err(err)
                    .with_context(|| format!("failed deleting index directory: {}", dir.display()));
            }
        }
        *self = IndexStore::open(&dir, self.settings)?;
        Ok(())
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn index(&self) -> &Index {
        &self.index
    }

    pub(crate) fn reader(&self) -> &IndexReader {
        &self.reader
    }

    pub(crate) fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Walk every live document and return `(path, mtime, size)` from the
    /// stored fields. Used to rebuild the dedup cache at startup.
    pub(crate) fn stored_identities(&self) -> Result<Vec<(String, i64, u64)>> {
        let searcher = self.reader.searcher();
        let mut out = Vec::new();

        for (segment_ord, segment_reader) in searcher.segment_readers().iter().enumerate() {
            for doc_id in segment_reader.doc_ids_alive() {
                let address = DocAddress {
                    segment_ord: segment_ord as u32,
                    doc_id,
                };
                let doc: TantivyDocument = searcher.doc(address).with_context(|| {
                    format!("failed to fetch doc {} in segment {}", doc_id, segment_ord)
                })?;

                let path = doc
                    .get_first(self.fields.path)
                    .and_then(|value| value.as_str())
                    .ok_or_else(|| anyhow!("indexed document missing path"))?
                    .to_string();
                let mtime = doc
                    .get_first(self.fields.mtime)
                    .and_then(|value| value.as_i64())
                    .ok_or_else(|| anyhow!("indexed document missing mtime"))?;
                let size = doc
                    .get_first(self.fields.size)
                    .and_then(|value| value.as_u64())
                    .ok_or_else(|| anyhow!("indexed document missing size"))?;

                out.push((path, mtime, size));
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::{IndexStore, StoreSettings};
    use crate::scanner::FileMeta;
    use tempfile::tempdir;

    fn meta(path: &str, mtime: i64, size: u64) -> FileMeta {
        FileMeta {
            path: path.into(),
            name: path.rsplit('/').next().unwrap_or(path).into(),
            ext: path.rsplit('.').next().map(|e| e.into()),
            mtime,
            size,
            inode: 0,
            dev: 0,
            is_placeholder: false,
        }
    }

    #[test]
    fn writes_become_visible_after_commit() {
        let dir = tempdir().unwrap();
        let store = IndexStore::open(dir.path(), StoreSettings::default()).unwrap();

        store
            .add_or_replace(&meta("/tmp/a.txt", 100, 5), Some("hello world"))
            .unwrap();
        assert_eq!(store.num_docs(), 0);

        store.commit().unwrap();
        assert_eq!(store.num_docs(), 1);
    }

    #[test]
    fn replacing_a_path_keeps_one_document() {
        let dir = tempdir().unwrap();
        let store = IndexStore::open(dir.path(), StoreSettings::default()).unwrap();

        store
            .add_or_replace(&meta("/tmp/a.txt", 100, 5), Some("first"))
            .unwrap();
        store.commit().unwrap();
        store
            .add_or_replace(&meta("/tmp/a.txt", 200, 9), Some("second"))
            .unwrap();
        store.commit().unwrap();

        assert_eq!(store.num_docs(), 1);
        let identities = store.stored_identities().unwrap();
        assert_eq!(identities, vec![("/tmp/a.txt".to_string(), 200, 9)]);
    }

    #[test]
    fn reset_empties_the_index() {
        let dir = tempdir().unwrap();
        let mut store = IndexStore::open(dir.path(), StoreSettings::default()).unwrap();

        store
            .add_or_replace(&meta("/tmp/a.txt", 100, 5), None)
            .unwrap();
        store.commit().unwrap();
        assert_eq!(store.num_docs(), 1);

        store.reset().unwrap();
        assert_eq!(store.num_docs(), 0);

        store
            .add_or_replace(&meta("/tmp/b.txt", 100, 5), None)
            .unwrap();
        store.commit().unwrap();
        assert_eq!(store.num_docs(), 1);
    }

    #[test]
    fn open_is_idempotent() {
        let dir = tempdir().unwrap();
        {
            let store = IndexStore::open(dir.path(), StoreSettings::default()).unwrap();
            store
                .add_or_replace(&meta("/tmp/a.txt", 100, 5), None)
                .unwrap();
            store.commit().unwrap();
        }
        let store = IndexStore::open(dir.path(), StoreSettings::default()).unwrap();
        assert_eq!(store.num_docs(), 1);
    }
}
