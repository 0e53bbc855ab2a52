// SPDX-License-Identifier: MIT OR Apache-2.0

//! Crawl pipeline: drives enumeration, dedup, sampling and commits.

use chrono::{Local, NaiveDateTime, Timelike};
use serde::Serialize;
use std::collections::HashSet;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::errors::is_transient;
use crate::prefs::PrefsStore;
use crate::sampler::{self, SamplePolicy};
use crate::scanner::{self, FileMeta, RecencyBucket};

const WINDOW_START_HOUR: u32 = 2;
const WINDOW_END_HOUR: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlMode {
    /// Skip files at or below the last-completed cutoff.
    Incremental,
    /// Reindex all buckets, with per-root resume across interruptions.
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlPhase {
    Initial,
    Background,
}

impl CrawlPhase {
    /// Recency buckets a phase is responsible for, in processing order.
    pub fn buckets(self) -> &'static [RecencyBucket] {
        match self {
            CrawlPhase::Initial => &[RecencyBucket::Days90],
            CrawlPhase::Background => &[
                RecencyBucket::Days180,
                RecencyBucket::Days365,
                RecencyBucket::Older,
            ],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CrawlPhase::Initial => "initial",
            CrawlPhase::Background => "background",
        }
    }
}

/// Observable pipeline state, published to subscribers on every change.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlSnapshot {
    pub is_running: bool,
    pub phase: Option<CrawlPhase>,
    pub status: String,
    pub files_indexed: u64,
    pub last_completed_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub sampling: SamplePolicy,
    pub initial_enumeration_cap: usize,
    pub initial_commit_interval: Duration,
    pub initial_commit_batch: usize,
    pub background_commit_interval: Duration,
    pub auto_min_interval: Duration,
    /// Used when the prefs file carries no explicit choice.
    pub schedule_window_default: bool,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            sampling: SamplePolicy::default(),
            initial_enumeration_cap: 20_000,
            initial_commit_interval: Duration::from_secs(2),
            initial_commit_batch: 1_000,
            background_commit_interval: Duration::from_secs(1_800),
            auto_min_interval: Duration::from_secs(60),
            schedule_window_default: false,
        }
    }
}

struct ScheduledStart {
    cancel: Arc<AtomicBool>,
    armed: Arc<AtomicBool>,
}

struct CrawlState {
    is_running: bool,
    phase: Option<CrawlPhase>,
    status: String,
    files_indexed: u64,
    worker: Option<JoinHandle<()>>,
    timer: Option<ScheduledStart>,
}

struct Shared {
    engine: Arc<Engine>,
    settings: CrawlSettings,
    prefs: Mutex<PrefsStore>,
    state: Mutex<CrawlState>,
    cancel: AtomicBool,
    placeholders: RwLock<HashSet<String>>,
    subscribers: Mutex<Vec<Sender<CrawlSnapshot>>>,
    last_attempt: Mutex<Option<Instant>>,
}

/// The crawl pipeline. One crawl worker runs at a time; queries stay
/// concurrent with it through the engine's reader snapshots.
pub struct Crawler {
    shared: Arc<Shared>,
}

impl Crawler {
    pub fn new(engine: Arc<Engine>, prefs: PrefsStore, settings: CrawlSettings) -> Crawler {
        Crawler {
            shared: Arc::new(Shared {
                engine,
                settings,
                prefs: Mutex::new(prefs),
                state: Mutex::new(CrawlState {
                    is_running: false,
                    phase: None,
                    status: "idle".to_string(),
                    files_indexed: 0,
                    worker: None,
                    timer: None,
                }),
                cancel: AtomicBool::new(false),
                placeholders: RwLock::new(HashSet::new()),
                subscribers: Mutex::new(Vec::new()),
                last_attempt: Mutex::new(None),
            }),
        }
    }

    /// Begin a crawl. Returns false when one is already in progress.
    pub fn start(&self, roots: Vec<PathBuf>, mode: CrawlMode, phase: CrawlPhase, scheduled: bool) -> bool {
        start_crawl(&self.shared, roots, mode, phase, scheduled)
    }

    /// Cooperatively halt the current crawl. The worker performs a
    /// best-effort commit of ingested work before going idle.
    pub fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::SeqCst);
    }

    /// Wipe the index and start a full initial-phase crawl.
    pub fn reset_and_start(&self, roots: Vec<PathBuf>) -> anyhow::Result<()> {
        self.cancel();
        self.wait();
        self.shared.engine.reset()?;
        {
            let mut prefs = lock_prefs(&self.shared);
            prefs.clear_last_completed_at()?;
            prefs.clear_bucket_progress()?;
        }
        start_crawl(
            &self.shared,
            roots,
            CrawlMode::Full,
            CrawlPhase::Initial,
            false,
        );
        Ok(())
    }

    /// Rate-limited auto-trigger: refuses while a crawl is running or one
    /// was attempted within the minimum interval; defers to the nightly
    /// window when that preference is enabled. Returns true when a crawl
    /// actually started.
    pub fn request_incremental_if_needed(&self, roots: Vec<PathBuf>) -> bool {
        if self.is_running() {
            return false;
        }
        {
            let last = self
                .shared
                .last_attempt
                .lock()
                .expect("last-attempt mutex poisoned");
            if let Some(at) = *last {
                if at.elapsed() < self.shared.settings.auto_min_interval {
                    return false;
                }
            }
        }
        if self.schedule_window_enabled() {
            let delay = delay_until_window(Local::now().naive_local());
            if !delay.is_zero() {
                arm_scheduled_start(&self.shared, roots, delay);
                return false;
            }
        }
        start_crawl(
            &self.shared,
            roots,
            CrawlMode::Incremental,
            CrawlPhase::Initial,
            false,
        )
    }

    pub fn is_running(&self) -> bool {
        lock_state(&self.shared).is_running
    }

    pub fn snapshot(&self) -> CrawlSnapshot {
        snapshot_of(&self.shared)
    }

    /// Receive a snapshot after every observable state change.
    pub fn subscribe(&self) -> Receiver<CrawlSnapshot> {
        let (tx, rx) = mpsc::channel();
        self.shared
            .subscribers
            .lock()
            .expect("subscriber list mutex poisoned")
            .push(tx);
        rx
    }

    /// Block until the current crawl worker (if any) exits, then return
    /// the terminal snapshot.
    pub fn wait(&self) -> CrawlSnapshot {
        let handle = lock_state(&self.shared).worker.take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        snapshot_of(&self.shared)
    }

    /// Paths currently flagged as cloud placeholders.
    pub fn placeholders(&self) -> HashSet<String> {
        self.shared
            .placeholders
            .read()
            .expect("placeholder set lock poisoned")
            .clone()
    }

    pub fn schedule_window_enabled(&self) -> bool {
        lock_prefs(&self.shared).schedule_window_enabled(self.shared.settings.schedule_window_default)
    }

    pub fn set_schedule_window(&self, enabled: bool) -> anyhow::Result<()> {
        lock_prefs(&self.shared).set_schedule_window_enabled(enabled)?;
        if !enabled {
            self.clear_scheduled_start();
        }
        Ok(())
    }

    pub fn scheduled_start_armed(&self) -> bool {
        lock_state(&self.shared)
            .timer
            .as_ref()
            .map(|timer| timer.armed.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn clear_scheduled_start(&self) {
        let mut state = lock_state(&self.shared);
        if let Some(timer) = state.timer.take() {
            timer.cancel.store(true, Ordering::SeqCst);
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.shared.engine
    }
}

fn lock_state(shared: &Shared) -> MutexGuard<'_, CrawlState> {
    shared.state.lock().expect("crawl state mutex poisoned")
}

fn lock_prefs(shared: &Shared) -> MutexGuard<'_, PrefsStore> {
    shared.prefs.lock().expect("prefs mutex poisoned")
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0)
}

fn snapshot_of(shared: &Shared) -> CrawlSnapshot {
    let state = lock_state(shared);
    let last_completed_at = lock_prefs(shared).last_completed_at();
    CrawlSnapshot {
        is_running: state.is_running,
        phase: state.phase,
        status: state.status.clone(),
        files_indexed: state.files_indexed,
        last_completed_at,
    }
}

fn publish(shared: &Shared) {
    let snapshot = snapshot_of(shared);
    let mut subscribers = shared
        .subscribers
        .lock()
        .expect("subscriber list mutex poisoned");
    subscribers.retain(|tx| tx.send(snapshot.clone()).is_ok());
}

fn start_crawl(
    shared: &Arc<Shared>,
    roots: Vec<PathBuf>,
    mode: CrawlMode,
    phase: CrawlPhase,
    scheduled: bool,
) -> bool {
    // Reap a finished worker outside the lock so its final state
    // transition can never deadlock against us.
    let stale = {
        let mut state = lock_state(shared);
        if state.is_running {
            return false;
        }
        state.worker.take()
    };
    if let Some(handle) = stale {
        let _ = handle.join();
    }

    {
        let mut state = lock_state(shared);
        if state.is_running {
            return false;
        }
        shared.cancel.store(false, Ordering::SeqCst);
        state.is_running = true;
        state.phase = Some(phase);
        state.status = if scheduled {
            "starting (scheduled)".to_string()
        } else {
            "starting".to_string()
        };
        state.files_indexed = 0;

        let worker_shared = Arc::clone(shared);
        state.worker = Some(thread::spawn(move || {
            run_crawl(worker_shared, roots, mode, phase);
        }));
    }

    *shared
        .last_attempt
        .lock()
        .expect("last-attempt mutex poisoned") = Some(Instant::now());
    publish(shared);
    true
}

enum CrawlOutcome {
    Completed,
    Cancelled,
}

fn run_crawl(shared: Arc<Shared>, roots: Vec<PathBuf>, mode: CrawlMode, phase: CrawlPhase) {
    let mut phase = phase;
    loop {
        match crawl_phase(&shared, &roots, mode, phase) {
            Ok(CrawlOutcome::Completed) => {
                if phase == CrawlPhase::Initial {
                    phase = CrawlPhase::Background;
                    {
                        let mut state = lock_state(&shared);
                        state.phase = Some(CrawlPhase::Background);
                        state.status = "background".to_string();
                    }
                    publish(&shared);
                    continue;
                }

                let completed_at = now_unix();
                {
                    let mut prefs = lock_prefs(&shared);
                    if mode == CrawlMode::Full {
                        if let Err(err) = prefs.clear_bucket_progress() {
                            warn!("failed clearing bucket progress: {err:#}");
                        }
                    }
                    if let Err(err) = prefs.set_last_completed_at(completed_at) {
                        warn!("failed recording completion time: {err:#}");
                    }
                }
                finish(&shared, "complete");
                return;
            }
            Ok(CrawlOutcome::Cancelled) => {
                finish(&shared, "cancelled");
                return;
            }
            Err(err) => {
                warn!("crawl failed: {err:#}");
                finish(&shared, &format!("failed: {err}"));
                return;
            }
        }
    }
}

fn finish(shared: &Shared, status: &str) {
    {
        let mut state = lock_state(shared);
        state.is_running = false;
        state.phase = None;
        state.status = status.to_string();
    }
    publish(shared);
}

fn crawl_phase(
    shared: &Shared,
    roots: &[PathBuf],
    mode: CrawlMode,
    phase: CrawlPhase,
) -> anyhow::Result<CrawlOutcome> {
    let since = match mode {
        CrawlMode::Incremental => lock_prefs(shared).last_completed_at(),
        CrawlMode::Full => None,
    };
    let now = now_unix();
    let ordered = scanner::order_roots(roots.to_vec());
    let cap = match phase {
        CrawlPhase::Initial => Some(shared.settings.initial_enumeration_cap),
        CrawlPhase::Background => None,
    };

    let mut committer = Committer::new(shared, phase);

    for root in &ordered {
        if shared.cancel.load(Ordering::Relaxed) {
            committer.flush_pending();
            return Ok(CrawlOutcome::Cancelled);
        }

        let root_key = root.to_string_lossy().to_string();
        let files = match scanner::walk_root(root, cap, &shared.cancel) {
            Ok(files) => files,
            Err(err) => {
                warn!("abandoning root {}: {err:#}", root.display());
                continue;
            }
        };
        let mut buckets = scanner::bucketize(files, now);

        let resume_at = match mode {
            CrawlMode::Full => lock_prefs(shared).bucket_progress(&root_key).unwrap_or(0),
            CrawlMode::Incremental => 0,
        };

        for bucket in phase.buckets() {
            if shared.cancel.load(Ordering::Relaxed) {
                committer.flush_pending();
                return Ok(CrawlOutcome::Cancelled);
            }
            if bucket.index() < resume_at {
                continue;
            }

            {
                let mut state = lock_state(shared);
                state.status = format!(
                    "indexing {} [{} {}]",
                    root.display(),
                    phase.label(),
                    bucket.label()
                );
            }
            publish(shared);

            for meta in mem::take(&mut buckets[bucket.index()]) {
                if shared.cancel.load(Ordering::Relaxed) {
                    committer.flush_pending();
                    return Ok(CrawlOutcome::Cancelled);
                }
                if let Err(err) = ingest_file(shared, &meta, since, &mut committer) {
                    if is_transient(&err) {
                        debug!("skipping {}: {err:#}", meta.path);
                    } else {
                        warn!("skipping {}: {err:#}", meta.path);
                    }
                }
                committer.maybe_commit();
            }

            // Buckets end with an unconditional commit so results appear
            // progressively.
            committer.flush();
            if mode == CrawlMode::Full {
                if let Err(err) = lock_prefs(shared).set_bucket_progress(&root_key, bucket.index() + 1) {
                    warn!("failed saving bucket progress for {root_key}: {err:#}");
                }
            }
        }
    }

    Ok(CrawlOutcome::Completed)
}

fn ingest_file(
    shared: &Shared,
    meta: &FileMeta,
    since: Option<i64>,
    committer: &mut Committer<'_>,
) -> anyhow::Result<()> {
    if let Some(cutoff) = since {
        if meta.mtime <= cutoff {
            return Ok(());
        }
    }

    {
        let mut placeholders = shared
            .placeholders
            .write()
            .expect("placeholder set lock poisoned");
        if meta.is_placeholder {
            placeholders.insert(meta.path.clone());
        } else {
            placeholders.remove(&meta.path);
        }
    }

    if meta.size == 0 && !meta.is_placeholder {
        return Ok(());
    }
    if !shared.engine.should_reindex(meta) {
        return Ok(());
    }

    // Placeholders have no local bytes; index them by name alone.
    let content = if meta.is_placeholder {
        None
    } else {
        sampler::sample_path(Path::new(&meta.path), &shared.settings.sampling)?
    };

    shared.engine.add_or_update(meta, content.as_deref())?;
    committer.note_ingest();
    lock_state(shared).files_indexed += 1;
    Ok(())
}

/// Commit cadence within a phase: every interval or every N ingests in
/// the initial phase, interval-only in background. A failed commit keeps
/// the staged writes for the next attempt.
struct Committer<'a> {
    shared: &'a Shared,
    interval: Duration,
    batch_limit: Option<usize>,
    last_commit: Instant,
    pending: usize,
}

impl<'a> Committer<'a> {
    fn new(shared: &'a Shared, phase: CrawlPhase) -> Committer<'a> {
        let (interval, batch_limit) = match phase {
            CrawlPhase::Initial => (
                shared.settings.initial_commit_interval,
                Some(shared.settings.initial_commit_batch),
            ),
            CrawlPhase::Background => (shared.settings.background_commit_interval, None),
        };
        Committer {
            shared,
            interval,
            batch_limit,
            last_commit: Instant::now(),
            pending: 0,
        }
    }

    fn note_ingest(&mut self) {
        self.pending += 1;
    }

    fn maybe_commit(&mut self) {
        if self.pending == 0 {
            return;
        }
        let batch_due = self
            .batch_limit
            .map(|limit| self.pending >= limit)
            .unwrap_or(false);
        if batch_due || self.last_commit.elapsed() >= self.interval {
            self.flush();
        }
    }

    /// Best-effort commit of whatever was ingested (cancellation path).
    fn flush_pending(&mut self) {
        if self.pending > 0 {
            self.flush();
        }
    }

    fn flush(&mut self) {
        match self.shared.engine.commit_and_refresh() {
            Ok(()) => {
                self.pending = 0;
                self.last_commit = Instant::now();
                publish(self.shared);
            }
            Err(err) => {
                warn!("commit failed; staged writes retained: {err:#}");
                self.last_commit = Instant::now();
            }
        }
    }
}

fn arm_scheduled_start(shared: &Arc<Shared>, roots: Vec<PathBuf>, delay: Duration) {
    let mut state = lock_state(shared);
    let already_armed = state
        .timer
        .as_ref()
        .map(|timer| timer.armed.load(Ordering::SeqCst))
        .unwrap_or(false);
    if already_armed {
        return;
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let armed = Arc::new(AtomicBool::new(true));
    let timer_cancel = Arc::clone(&cancel);
    let timer_armed = Arc::clone(&armed);
    let weak: Weak<Shared> = Arc::downgrade(shared);

    thread::spawn(move || {
        let deadline = Instant::now() + delay;
        loop {
            if timer_cancel.load(Ordering::SeqCst) {
                timer_armed.store(false, Ordering::SeqCst);
                return;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining.min(Duration::from_millis(500)));
        }
        timer_armed.store(false, Ordering::SeqCst);
        if let Some(shared) = weak.upgrade() {
            start_crawl(
                &shared,
                roots,
                CrawlMode::Incremental,
                CrawlPhase::Initial,
                true,
            );
        }
    });

    state.timer = Some(ScheduledStart { cancel, armed });
}

/// Time until the next 02:00-04:00 local window opens; zero inside it.
pub(crate) fn delay_until_window(now: NaiveDateTime) -> Duration {
    let hour = now.time().hour();
    if (WINDOW_START_HOUR..WINDOW_END_HOUR).contains(&hour) {
        return Duration::ZERO;
    }
    let Some(today_open) = now.date().and_hms_opt(WINDOW_START_HOUR, 0, 0) else {
        return Duration::ZERO;
    };
    let target = if now < today_open {
        today_open
    } else {
        today_open + chrono::Duration::days(1)
    };
    (target - now).to_std().unwrap_or(Duration::ZERO)
}
