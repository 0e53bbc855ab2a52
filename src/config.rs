// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration file support for scour
//!
//! Loads configuration from .scour.toml in the current directory or
//! ~/.config/scour/config.toml.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::pipeline::CrawlSettings;
use crate::sampler::SamplePolicy;
use crate::store::StoreSettings;

/// Configuration recognized by the core. Every field has a default so a
/// missing or partial file is never an error.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Absolute path for the on-disk index. Defaults to the platform
    /// data directory.
    pub index_dir: Option<PathBuf>,
    /// Per-crawl content coverage.
    pub sampling: SamplePolicy,
    /// Defer auto-triggered incremental crawls to 02:00-04:00 local.
    pub schedule_window_enabled: bool,
    /// Rate limit for auto-triggered incremental crawls.
    pub auto_incremental_min_interval_s: u64,
    /// Per-root visit cap for the initial phase.
    pub initial_phase_enumeration_cap: usize,
    pub initial_commit_interval_s: u64,
    pub background_commit_interval_s: u64,
    /// Index writer heap budget; the crawl's backpressure bound.
    pub writer_heap_bytes: usize,
    /// 0 means one writer thread per CPU.
    pub writer_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        let store = StoreSettings::default();
        Self {
            index_dir: None,
            sampling: SamplePolicy::default(),
            schedule_window_enabled: false,
            auto_incremental_min_interval_s: 60,
            initial_phase_enumeration_cap: 20_000,
            initial_commit_interval_s: 2,
            background_commit_interval_s: 1_800,
            writer_heap_bytes: store.writer_heap_bytes,
            writer_threads: store.writer_threads,
        }
    }
}

impl Config {
    /// Load configuration from files.
    ///
    /// Precedence (highest to lowest):
    /// 1. .scour.toml in current directory
    /// 2. ~/.config/scour/config.toml
    pub fn load() -> Self {
        if let Some(config) = Self::load_from_path(&PathBuf::from(".scour.toml")) {
            return config;
        }

        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".config").join("scour").join("config.toml");
            if let Some(config) = Self::load_from_path(&config_path) {
                return config;
            }
        }

        Self::default()
    }

    fn load_from_path(path: &PathBuf) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match toml::from_str(&content) {
            Ok(config) => Some(config),
            Err(err) => {
                eprintln!("Warning: Failed to parse {}: {}", path.display(), err);
                None
            }
        }
    }

    /// Platform data directory holding the index and prefs.
    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("scour")
    }

    pub fn resolved_index_dir(&self) -> PathBuf {
        self.index_dir
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("index"))
    }

    pub fn prefs_path(&self) -> PathBuf {
        match &self.index_dir {
            Some(dir) => dir
                .parent()
                .map(|parent| parent.join("prefs.json"))
                .unwrap_or_else(|| dir.join("prefs.json")),
            None => Self::data_dir().join("prefs.json"),
        }
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            writer_threads: self.writer_threads,
            writer_heap_bytes: self.writer_heap_bytes,
        }
    }

    pub fn crawl_settings(&self) -> CrawlSettings {
        CrawlSettings {
            sampling: self.sampling.clone(),
            initial_enumeration_cap: self.initial_phase_enumeration_cap,
            initial_commit_interval: Duration::from_secs(self.initial_commit_interval_s),
            initial_commit_batch: 1_000,
            background_commit_interval: Duration::from_secs(self.background_commit_interval_s),
            auto_min_interval: Duration::from_secs(self.auto_incremental_min_interval_s),
            schedule_window_default: self.schedule_window_enabled,
        }
    }
}
