// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pipeline state persisted outside the index.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Prefs {
    /// Unix seconds of the last successful crawl completion; the
    /// incremental-mode cutoff.
    pub last_completed_at: Option<i64>,
    /// Full-mode resume state: root path -> next bucket index to process.
    pub bucket_progress: BTreeMap<String, usize>,
    /// Defer incremental crawls to the 02:00-04:00 local window.
    pub schedule_window_enabled: Option<bool>,
}

/// Load/save wrapper around the prefs JSON file. Every mutation persists
/// immediately with an atomic write.
#[derive(Debug)]
pub struct PrefsStore {
    path: PathBuf,
    prefs: Prefs,
}

impl PrefsStore {
    /// Missing or unreadable files start from defaults.
    pub fn load(path: PathBuf) -> PrefsStore {
        let prefs = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|err| {
                debug!("ignoring malformed prefs at {}: {err}", path.display());
                Prefs::default()
            }),
            Err(_) => Prefs::default(),
        };
        PrefsStore { path, prefs }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_completed_at(&self) -> Option<i64> {
        self.prefs.last_completed_at
    }

    pub fn set_last_completed_at(&mut self, at: i64) -> Result<()> {
        self.prefs.last_completed_at = Some(at);
        self.save()
    }

    pub fn clear_last_completed_at(&mut self) -> Result<()> {
        self.prefs.last_completed_at = None;
        self.save()
    }

    pub fn bucket_progress(&self, root: &str) -> Option<usize> {
        self.prefs.bucket_progress.get(root).copied()
    }

    pub fn set_bucket_progress(&mut self, root: &str, next_bucket: usize) -> Result<()> {
        self.prefs
            .bucket_progress
            .insert(root.to_string(), next_bucket);
        self.save()
    }

    pub fn clear_bucket_progress(&mut self) -> Result<()> {
        if self.prefs.bucket_progress.is_empty() {
            return Ok(());
        }
        self.prefs.bucket_progress.clear();
        self.save()
    }

    pub fn schedule_window_enabled(&self, default: bool) -> bool {
        self.prefs.schedule_window_enabled.unwrap_or(default)
    }

    pub fn set_schedule_window_enabled(&mut self, enabled: bool) -> Result<()> {
        self.prefs.schedule_window_enabled = Some(enabled);
        self.save()
    }

    pub fn snapshot(&self) -> Prefs {
        self.prefs.clone()
    }

    fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.prefs)?;
        atomic_write_bytes(&self.path, content.as_bytes())
    }
}

/// Write via a temp file in the same directory, fsync, then rename so a
/// crash never leaves a half-written file behind.
pub(crate) fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let Some(parent) = path.parent() else {
        anyhow::bail!("cannot atomically write {} without parent", path.display());
    };
    std::fs::create_dir_all(parent)?;

    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    let tmp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("scour"),
        std::process::id(),
        nonce
    );
    let tmp_path = parent.join(tmp_name);

    {
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;
        file.write_all(bytes)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync {}", tmp_path.display()))?;
    }

    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to move {} into place", tmp_path.display()))?;
    Ok(())
}
