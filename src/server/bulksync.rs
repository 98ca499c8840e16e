//! Bulk sync worker: one bounded full synchronization pass of the cache
//! store, driven step by step on a blocking thread.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::server::{GlobalStatus, PpKind, StatSink, WorkerHandle};
use crate::store::{SyncResult, SyncStore};
use crate::utils::{CacheSyncError, Clock, ConfigFile};

use serde::Deserialize;

use tokio::sync::watch;

/// Configuration parameters struct, parsed from the `[cache]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkSyncConfig {
    /// Entries modified within this many seconds before the pass starts are
    /// left for the regular write path. Required.
    pub sync_time: Option<u64>,
}

impl BulkSyncConfig {
    /// Parses the `[cache]` section and returns the required `sync_time`.
    pub fn sync_time_from(path: &Path) -> Result<u64, CacheSyncError> {
        let file = ConfigFile::load(path)?;
        let section = file.section("cache")?;
        let config =
            parsed_config!(section.as_deref() => BulkSyncConfig; sync_time)?;
        match config.sync_time {
            Some(sync_time) => Ok(sync_time),
            None => logged_err!(
                "missing config 'cache.sync_time' in '{}'",
                path.display()
            ),
        }
    }
}

/// How a bulk sync pass ended.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum BulkSyncOutcome {
    /// The store reported the whole pass done.
    Completed,

    /// The store returned an unexpected code or an error.
    Failed,

    /// Stop was requested before the pass finished.
    Stopped,
}

impl fmt::Display for BulkSyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BulkSyncOutcome::Completed => write!(f, "completed"),
            BulkSyncOutcome::Failed => write!(f, "failed"),
            BulkSyncOutcome::Stopped => write!(f, "stopped"),
        }
    }
}

/// Collaborators of the bulk sync worker.
#[derive(Clone)]
pub struct BulkSyncDeps {
    pub store: Arc<dyn SyncStore>,
    pub status: Arc<GlobalStatus>,
    pub stats: Arc<dyn StatSink>,
    pub clock: Arc<dyn Clock>,
}

/// One bulk sync pass.
pub struct BulkSyncer {
    sync_time: u64,
    deps: BulkSyncDeps,
}

impl BulkSyncer {
    pub fn new(sync_time: u64, deps: BulkSyncDeps) -> Self {
        BulkSyncer { sync_time, deps }
    }

    /// The modification time bound of a pass starting now.
    pub fn deadline(&self) -> u64 {
        self.deps.clock.now() + self.sync_time + 1
    }

    /// Runs the pass to its end, checking `rx_stop` before every step.
    /// Blocks the calling thread.
    pub fn run(self, rx_stop: watch::Receiver<bool>) -> BulkSyncOutcome {
        let deadline = self.deadline();
        pf_info!("bulk sync start, deadline {}", deadline);

        if let Err(e) = self.deps.store.sync() {
            pf_error!("bulk sync prepare failed: {}", e);
            return BulkSyncOutcome::Failed;
        }

        let gate = self.deps.status.can_sync();
        let mut steps: u64 = 0;
        loop {
            if *rx_stop.borrow() {
                pf_info!("bulk sync stopped after {} steps", steps);
                return BulkSyncOutcome::Stopped;
            }

            match self.deps.store.sync_once(deadline, &gate) {
                Ok(SyncResult::Ok) => {
                    pf_info!("bulk sync succ after {} steps", steps);
                    return BulkSyncOutcome::Completed;
                }
                Ok(res) if res.is_continuation() => steps += 1,
                Ok(res) => {
                    pf_error!("bulk sync error, sync_once returned {}", res);
                    self.deps.stats.pp_report(PpKind::CacheErr, 1);
                    return BulkSyncOutcome::Failed;
                }
                Err(e) => {
                    pf_error!("bulk sync error: {}", e);
                    return BulkSyncOutcome::Failed;
                }
            }
        }
    }
}

/// Lifecycle handle of the bulk sync worker.
pub struct BulkSyncThread {
    config_path: PathBuf,

    /// Seconds, as of the last init or reload.
    sync_time: Arc<AtomicU64>,

    deps: BulkSyncDeps,
    worker: WorkerHandle<BulkSyncOutcome>,

    /// Set once the pass has been launched; it never runs twice.
    launched: AtomicBool,
}

impl BulkSyncThread {
    /// Reads `[cache] sync_time`; a missing value fails init.
    pub fn new_and_setup(
        config_path: &Path,
        deps: BulkSyncDeps,
    ) -> Result<Self, CacheSyncError> {
        let sync_time = BulkSyncConfig::sync_time_from(config_path)?;
        pf_debug!("bulk sync init succ, sync_time {}s", sync_time);
        Ok(BulkSyncThread {
            config_path: config_path.to_path_buf(),
            sync_time: Arc::new(AtomicU64::new(sync_time)),
            deps,
            worker: WorkerHandle::new("bulk sync"),
            launched: AtomicBool::new(false),
        })
    }

    /// Re-reads `sync_time`. A pass already running keeps its deadline.
    pub fn reload(&self) -> Result<(), CacheSyncError> {
        let sync_time = BulkSyncConfig::sync_time_from(&self.config_path)?;
        self.sync_time.store(sync_time, Ordering::Release);
        pf_debug!("bulk sync reload succ, sync_time {}s", sync_time);
        Ok(())
    }

    pub fn sync_time(&self) -> u64 {
        self.sync_time.load(Ordering::Acquire)
    }

    /// Starts the pass on a blocking thread unless it has been launched
    /// before. Returns true if started by this call.
    pub fn create_thread(&self) -> Result<bool, CacheSyncError> {
        if self.launched.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        let syncer = BulkSyncer::new(self.sync_time(), self.deps.clone());
        let started = self
            .worker
            .create_blocking(move |rx_stop| syncer.run(rx_stop));
        if started.is_err() {
            self.launched.store(false, Ordering::Release);
        }
        started
    }

    pub fn request_stop(&self) {
        self.worker.request_stop();
    }

    /// Waits for the pass to end. `None` if it was never started or its
    /// outcome was already taken.
    pub async fn await_stopped(&self) -> Option<BulkSyncOutcome> {
        self.worker.await_stopped().await
    }

    pub fn is_started(&self) -> bool {
        self.worker.is_started()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }
}
