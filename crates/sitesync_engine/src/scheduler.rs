//! The sync scheduler: cycle orchestration and background scheduling.
//!
//! A cycle is probe, push, then pull. Pushing first means a site's own
//! edits are on the hub before the site takes in anyone else's, so the
//! batch it then downloads already reflects how its edits fared against
//! the rest of the fleet. A push failure skips the pull; merging remote
//! state while local records are stuck would let the hub overwrite edits
//! it never saw.
//!
//! ## Key Invariants
//!
//! - At most one cycle runs at a time. Concurrent triggers, manual or
//!   scheduled, are ignored while one is in flight.
//! - An offline cycle is a probe and nothing else. Manual triggers while
//!   offline are the same no-op.
//! - A failed cycle waits `retry_backoff` before the next automatic
//!   attempt instead of the full interval.
//! - A batch that keeps failing to merge is dead-lettered after
//!   `max_merge_attempts` and the pull suspends until
//!   [`SyncScheduler::resume`]; without that, the scheduler would
//!   re-download the same poisoned batch forever. Pushing continues
//!   while suspended, so local records still reach the hub.

use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityMonitor, ConnectivityStatus};
use crate::error::{SyncError, SyncResult};
use crate::merge::MergeEngine;
use crate::outbox::ChangeTracker;
use crate::transport::RemoteTransport;
use parking_lot::{Condvar, Mutex, RwLock};
use sitesync_protocol::{ChangeRecord, DownloadRequest, LocalChange, UploadRequest, Watermark};
use sitesync_store::Store;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The current state of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Online or not yet checked; no cycle running.
    Idle,
    /// A cycle is running.
    Syncing,
    /// The last probe found the hub unreachable.
    Offline,
}

impl SyncState {
    /// Returns true while a cycle is running.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, SyncState::Syncing)
    }
}

/// Counters accumulated across cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles that ran to completion.
    pub cycles_completed: u64,
    /// Cycles that failed in push or pull.
    pub cycles_failed: u64,
    /// Outbox records accepted by the hub.
    pub records_pushed: u64,
    /// Consolidated changes received from the hub.
    pub changes_pulled: u64,
    /// Downloaded changes that touched entities with pending local records.
    pub conflicts_contested: u64,
    /// When the last successful cycle finished.
    pub last_sync_time: Option<Instant>,
    /// Last cycle failure, cleared by the next successful cycle.
    pub last_error: Option<String>,
}

/// What one triggered cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The cycle ran: pushed records, pulled and merged changes.
    Completed {
        /// Outbox records the hub accepted.
        pushed: usize,
        /// Consolidated changes received.
        pulled: usize,
        /// Changes that touched entities with pending local records.
        contested: usize,
    },
    /// The probe found the hub unreachable; nothing else ran.
    Offline,
    /// Another cycle was already in flight; this trigger was ignored.
    Skipped,
    /// The pull is parked behind a dead-lettered batch; only push ran.
    Suspended,
}

/// Diagnostic record for a batch that repeatedly failed to merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// Watermark the poisoned batch was downloaded from.
    pub since: Watermark,
    /// Entity named by the merge failure.
    pub entity: Option<String>,
    /// The merge failure message.
    pub message: String,
    /// How many times the batch was attempted.
    pub attempts: u32,
}

/// One self-consistent snapshot for status surfaces.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    /// Scheduler state.
    pub state: SyncState,
    /// Cached connectivity, as of the last probe.
    pub connectivity: ConnectivityStatus,
    /// Outbox records awaiting upload.
    pub pending_outbox: usize,
    /// Watermark of the last merged batch.
    pub watermark: Watermark,
    /// Present while sync is suspended behind a poisoned batch.
    pub dead_letter: Option<DeadLetter>,
    /// Cycle counters.
    pub stats: SyncStats,
}

/// Orchestrates sync cycles for one site.
///
/// Owns the change tracker, merge engine, and connectivity monitor around
/// a shared store and transport. Cycles run on demand through
/// [`SyncScheduler::sync_now`] or periodically once [`SyncScheduler::start`]
/// spawns the background worker.
pub struct SyncScheduler<T: RemoteTransport + 'static> {
    inner: Arc<Inner<T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Inner<T> {
    config: SyncConfig,
    store: Arc<Store>,
    tracker: ChangeTracker,
    merge: MergeEngine,
    transport: Arc<T>,
    monitor: ConnectivityMonitor<T>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    in_flight: AtomicBool,
    merge_failures: AtomicU32,
    dead_letter: RwLock<Option<DeadLetter>>,
    suspended: AtomicBool,
    shutdown: AtomicBool,
    kicked: Mutex<bool>,
    timer: Condvar,
}

impl<T: RemoteTransport + 'static> SyncScheduler<T> {
    /// Creates a scheduler over a shared store and a transport.
    pub fn new(config: SyncConfig, store: Arc<Store>, transport: T) -> Self {
        let transport = Arc::new(transport);
        let monitor = ConnectivityMonitor::new(
            Arc::clone(&transport),
            config.site_id,
            config.probe_timeout,
        );
        let inner = Inner {
            tracker: ChangeTracker::new(Arc::clone(&store)),
            merge: MergeEngine::new(Arc::clone(&store)),
            store,
            transport,
            monitor,
            config,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            in_flight: AtomicBool::new(false),
            merge_failures: AtomicU32::new(0),
            dead_letter: RwLock::new(None),
            suspended: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            kicked: Mutex::new(false),
            timer: Condvar::new(),
        };
        Self {
            inner: Arc::new(inner),
            worker: Mutex::new(None),
        }
    }

    /// Records a local change through the scheduler's tracker.
    pub fn record(&self, change: LocalChange) -> SyncResult<ChangeRecord> {
        self.inner.tracker.record(change)
    }

    /// The change tracker, for direct outbox access.
    #[must_use]
    pub fn tracker(&self) -> &ChangeTracker {
        &self.inner.tracker
    }

    /// The shared store.
    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.inner.store
    }

    /// Current scheduler state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        *self.inner.state.read()
    }

    /// Cycle counters so far.
    #[must_use]
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// One self-consistent status snapshot.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            state: self.state(),
            connectivity: self.inner.monitor.status(),
            pending_outbox: self.inner.tracker.pending_count(),
            watermark: self.inner.store.watermark(),
            dead_letter: self.inner.dead_letter.read().clone(),
            stats: self.stats(),
        }
    }

    /// The dead letter, if sync is suspended behind one.
    #[must_use]
    pub fn dead_letter(&self) -> Option<DeadLetter> {
        self.inner.dead_letter.read().clone()
    }

    /// Runs one cycle on the calling thread and blocks until it finishes.
    ///
    /// Returns `Ok(CycleOutcome::Offline)` when the hub is unreachable,
    /// `Ok(CycleOutcome::Skipped)` when a cycle is already in flight, and
    /// `Ok(CycleOutcome::Suspended)` when a dead letter parked the pull
    /// after the push ran. Push, pull, and merge failures come back as
    /// errors.
    pub fn sync_now(&self) -> SyncResult<CycleOutcome> {
        self.inner.run_cycle()
    }

    /// Clears the dead letter and resumes the pull.
    ///
    /// The next cycle re-downloads the same batch; call this after the bad
    /// data on the hub was repaired.
    pub fn resume(&self) {
        self.inner.merge_failures.store(0, Ordering::SeqCst);
        *self.inner.dead_letter.write() = None;
        self.inner.suspended.store(false, Ordering::SeqCst);
        self.inner.kick();
        info!("sync resumed, dead letter cleared");
    }

    /// Spawns the background worker that runs cycles on the configured
    /// interval. Does nothing if the worker is already running.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        self.inner.shutdown.store(false, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        *worker = Some(thread::spawn(move || inner.run_loop()));
    }

    /// Stops the background worker and waits for it to exit.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.kick();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl<T: RemoteTransport + 'static> Drop for SyncScheduler<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T: RemoteTransport + 'static> std::fmt::Debug for SyncScheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("state", &self.state())
            .field("suspended", &self.inner.suspended.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<T: RemoteTransport + 'static> Inner<T> {
    /// The background loop: wait, cycle, repeat.
    fn run_loop(&self) {
        info!(
            "sync scheduler started, interval {:?}",
            self.config.sync_interval
        );
        let mut wait = self.config.sync_interval;
        loop {
            {
                let mut kicked = self.kicked.lock();
                if !*kicked {
                    self.timer.wait_for(&mut kicked, wait);
                }
                *kicked = false;
            }

            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            wait = match self.run_cycle() {
                Ok(_) => self.config.sync_interval,
                Err(error) => {
                    warn!("sync cycle failed: {error}");
                    self.config.retry_backoff
                }
            };
        }
        debug!("sync scheduler stopped");
    }

    /// Wakes the background loop early.
    fn kick(&self) {
        let mut kicked = self.kicked.lock();
        *kicked = true;
        self.timer.notify_all();
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Runs one cycle unless one is already in flight.
    fn run_cycle(&self) -> SyncResult<CycleOutcome> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("cycle already in flight, ignoring trigger");
            return Ok(CycleOutcome::Skipped);
        }
        let result = self.cycle();
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    /// Probe, push, pull. Caller holds the in-flight guard.
    fn cycle(&self) -> SyncResult<CycleOutcome> {
        if !self.monitor.check_now().is_online() {
            self.set_state(SyncState::Offline);
            debug!("hub unreachable, skipping cycle");
            return Ok(CycleOutcome::Offline);
        }

        self.set_state(SyncState::Syncing);
        let started = Instant::now();

        let pushed = match self.push_pending() {
            Ok(count) => count,
            // A failed push skips the pull: merging remote state while
            // local records are stuck would hand newer hub versions a win
            // over edits the hub has not seen.
            Err(error) => return self.fail_cycle(error),
        };

        if self.suspended.load(Ordering::SeqCst) {
            // The pull stays parked behind the dead letter so the same
            // poisoned batch is not re-downloaded. Pushed counts still land
            // in the stats.
            self.set_state(SyncState::Idle);
            self.stats.write().records_pushed += pushed as u64;
            debug!("pull suspended behind dead letter, pushed {pushed}");
            return Ok(CycleOutcome::Suspended);
        }

        let (pulled, contested) = match self.pull_consolidated() {
            Ok(counts) => counts,
            Err(error) => return self.fail_cycle(error),
        };

        self.set_state(SyncState::Idle);
        self.merge_failures.store(0, Ordering::SeqCst);
        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.records_pushed += pushed as u64;
            stats.changes_pulled += pulled as u64;
            stats.conflicts_contested += contested as u64;
            stats.last_sync_time = Some(Instant::now());
            stats.last_error = None;
        }
        info!(
            "cycle finished in {:?}: {} pushed, {} pulled, {} contested",
            started.elapsed(),
            pushed,
            pulled,
            contested
        );
        Ok(CycleOutcome::Completed {
            pushed,
            pulled,
            contested,
        })
    }

    /// Uploads pending records until the outbox drains or the hub rejects.
    fn push_pending(&self) -> SyncResult<usize> {
        let mut total = 0usize;
        loop {
            let batch = self.tracker.pending_batch(self.config.upload_batch_size);
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len();

            let request = UploadRequest::new(self.config.site_id, batch);
            let receipt = self.transport.upload(&request)?;

            let accepted = self.tracker.mark_flushed(&receipt.accepted)?;
            total += accepted;
            for rejected in &receipt.rejected {
                warn!("hub rejected record {}: {}", rejected.id, rejected.reason);
            }

            // Partial acceptance ends the push; rejected records stay
            // pending and the cycle moves on to the pull.
            if accepted < batch_len {
                break;
            }
        }
        Ok(total)
    }

    /// Downloads and merges batches until the hub has nothing newer.
    fn pull_consolidated(&self) -> SyncResult<(usize, usize)> {
        let mut pulled = 0usize;
        let mut contested = 0usize;
        loop {
            let since = self.store.watermark();
            let request = DownloadRequest::new(
                self.config.site_id,
                since,
                self.config.download_batch_size,
            );
            let batch = self.transport.download(&request)?;

            let pending = self.tracker.pending_entities();
            let outcome = self
                .merge
                .apply_batch(&batch.changes, batch.watermark, &pending)?;
            pulled += batch.changes.len();
            contested += outcome.contested;

            if !batch.has_more {
                break;
            }
            if batch.changes.is_empty() && batch.watermark <= since {
                return Err(SyncError::Protocol(
                    "hub reports more changes but the watermark did not advance".into(),
                ));
            }
        }
        Ok((pulled, contested))
    }

    /// Books a failed cycle and tracks merge failures toward dead-letter.
    fn fail_cycle(&self, error: SyncError) -> SyncResult<CycleOutcome> {
        self.set_state(SyncState::Idle);
        {
            let mut stats = self.stats.write();
            stats.cycles_failed += 1;
            stats.last_error = Some(error.to_string());
        }

        if let SyncError::Merge { entity, message } = &error {
            // The watermark did not advance, so the next cycle re-downloads
            // the same batch; consecutive merge failures mean the same batch
            // keeps poisoning the pull.
            let attempts = self.merge_failures.fetch_add(1, Ordering::SeqCst) + 1;
            if attempts >= self.config.max_merge_attempts {
                warn!(
                    "dead-lettering batch after {attempts} merge failures: {entity}: {message}"
                );
                *self.dead_letter.write() = Some(DeadLetter {
                    since: self.store.watermark(),
                    entity: Some(entity.clone()),
                    message: message.clone(),
                    attempts,
                });
                self.suspended.store(true, Ordering::SeqCst);
            }
        }
        Err(error)
    }
}
