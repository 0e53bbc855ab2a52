// SPDX-License-Identifier: MIT OR Apache-2.0

//! Root enumeration: file metadata extraction and recency bucketing.

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::UNIX_EPOCH;
use tracing::debug;

const DAY_SECS: i64 = 86_400;

/// Metadata for one enumerated regular file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileMeta {
    pub path: String,
    pub name: String,
    pub ext: Option<String>,
    pub mtime: i64,
    pub size: u64,
    pub inode: u64,
    pub dev: u64,
    /// Entry exists but its bytes are not locally materialized
    /// (synced-but-not-downloaded). Indexed by name only.
    pub is_placeholder: bool,
}

impl FileMeta {
    pub fn from_path(path: &Path) -> Result<FileMeta> {
        let metadata = fs::symlink_metadata(path)
            .with_context(|| format!("failed to stat {}", path.display()))?;

        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let ext = path
            .extension()
            .map(|s| s.to_string_lossy().to_lowercase())
            .filter(|s| !s.is_empty());

        let mtime = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|dur| dur.as_secs() as i64)
            .unwrap_or_default();

        #[cfg(unix)]
        use std::os::unix::fs::MetadataExt;

        #[cfg(unix)]
        let (inode, dev) = (metadata.ino(), metadata.dev());
        #[cfg(not(unix))]
        let (inode, dev) = (0, 0);

        // Dataless cloud placeholders report a length but occupy no blocks.
        #[cfg(unix)]
        let is_placeholder = metadata.blocks() == 0 && metadata.len() > 0;
        #[cfg(not(unix))]
        let is_placeholder = false;

        Ok(FileMeta {
            path: path.to_string_lossy().to_string(),
            name,
            ext,
            mtime,
            size: metadata.len(),
            inode,
            dev,
            is_placeholder,
        })
    }
}

/// Recency class assigned to a file by its age, crawl scheduling only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecencyBucket {
    Days90,
    Days180,
    Days365,
    Older,
}

impl RecencyBucket {
    pub const ALL: [RecencyBucket; 4] = [
        RecencyBucket::Days90,
        RecencyBucket::Days180,
        RecencyBucket::Days365,
        RecencyBucket::Older,
    ];

    pub fn of(now: i64, mtime: i64) -> RecencyBucket {
        let age = now.saturating_sub(mtime);
        if age <= 90 * DAY_SECS {
            RecencyBucket::Days90
        } else if age <= 180 * DAY_SECS {
            RecencyBucket::Days180
        } else if age <= 365 * DAY_SECS {
            RecencyBucket::Days365
        } else {
            RecencyBucket::Older
        }
    }

    pub fn index(self) -> usize {
        match self {
            RecencyBucket::Days90 => 0,
            RecencyBucket::Days180 => 1,
            RecencyBucket::Days365 => 2,
            RecencyBucket::Older => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RecencyBucket::Days90 => "90d",
            RecencyBucket::Days180 => "180d",
            RecencyBucket::Days365 => "365d",
            RecencyBucket::Older => "older",
        }
    }
}

/// Order crawl roots: a root named "Documents" sorts before the rest,
/// remaining ties break lexicographically.
pub fn order_roots(mut roots: Vec<PathBuf>) -> Vec<PathBuf> {
    roots.sort_by(|a, b| {
        is_documents(b)
            .cmp(&is_documents(a))
            .then_with(|| a.cmp(b))
    });
    roots
}

fn is_documents(path: &Path) -> bool {
    path.file_name()
        .map(|name| name == "Documents")
        .unwrap_or(false)
}

/// Enumerate regular files under `root` depth-first, skipping hidden
/// entries and following no symlinks. `cap` bounds the number of entries
/// visited (initial-phase limit); `cancel` aborts the walk cooperatively.
///
/// Entries are stat'd in parallel and returned sorted by path so that
/// ingestion order is deterministic.
pub fn walk_root(root: &Path, cap: Option<usize>, cancel: &AtomicBool) -> Result<Vec<FileMeta>> {
    let metadata = fs::metadata(root)
        .with_context(|| format!("failed to open crawl root {}", root.display()))?;
    if !metadata.is_dir() {
        anyhow::bail!("crawl root is not a directory: {}", root.display());
    }

    let mut builder = WalkBuilder::new(root);
    builder.standard_filters(false);
    builder.hidden(true);
    builder.follow_links(false);

    let mut visited = 0usize;
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in builder.build() {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!("enumeration error under {}: {err}", root.display());
                continue;
            }
        };
        visited += 1;
        if let Some(cap) = cap {
            if visited > cap {
                break;
            }
        }
        if entry
            .file_type()
            .map(|file_type| file_type.is_file())
            .unwrap_or(false)
        {
            paths.push(entry.into_path());
        }
    }

    let mut entries: Vec<FileMeta> = paths
        .par_iter()
        .filter_map(|path| match FileMeta::from_path(path) {
            Ok(meta) => Some(meta),
            Err(err) => {
                debug!("skipping {}: {err:#}", path.display());
                None
            }
        })
        .collect();

    entries.par_sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// Group enumerated files into the four recency buckets, preserving
/// enumeration order within each bucket.
pub fn bucketize(files: Vec<FileMeta>, now: i64) -> [Vec<FileMeta>; 4] {
    let mut buckets: [Vec<FileMeta>; 4] = Default::default();
    for meta in files {
        buckets[RecencyBucket::of(now, meta.mtime).index()].push(meta);
    }
    buckets
}
