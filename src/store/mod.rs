//! The shared in-memory cache store, as seen by the bulk sync worker.

mod memmap;
mod writeback;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::utils::CacheSyncError;

pub use memmap::MemHashMap;
pub use writeback::{FileWriteBack, WriteBack};

/// Result code of one store synchronization step.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum SyncResult {
    /// The whole pass has been completed.
    Ok,

    /// An entry was written back; more may remain.
    NeedSync,

    /// The visited entry did not need writing back.
    NoNeedSync,

    /// The visited entry holds a key without value.
    OnlyKey,

    /// Any other store-specific code; treated as an error by callers.
    Other(i32),
}

impl SyncResult {
    /// True for the codes that mean "keep iterating".
    pub fn is_continuation(&self) -> bool {
        matches!(
            self,
            SyncResult::NeedSync | SyncResult::NoNeedSync | SyncResult::OnlyKey
        )
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyncResult::Ok => write!(f, "OK"),
            SyncResult::NeedSync => write!(f, "NEED_SYNC"),
            SyncResult::NoNeedSync => write!(f, "NONEED_SYNC"),
            SyncResult::OnlyKey => write!(f, "ONLY_KEY"),
            SyncResult::Other(code) => write!(f, "code {}", code),
        }
    }
}

/// Permission gate handed to each synchronization step, controlling whether
/// entries may currently be written back. Owned by the global status.
#[derive(Debug)]
pub struct CanSync {
    enabled: AtomicBool,
}

impl CanSync {
    pub fn new() -> Self {
        CanSync {
            enabled: AtomicBool::new(true),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Whether the entry with given key may be written back now.
    pub fn allows(&self, _key: &str) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

impl Default for CanSync {
    fn default() -> Self {
        Self::new()
    }
}

/// Synchronization entry points of the cache store. Implementations are
/// internally synchronized; calls block the caller.
pub trait SyncStore: Send + Sync {
    /// Prepares a new full synchronization pass.
    fn sync(&self) -> Result<(), CacheSyncError>;

    /// Performs one step of the current pass, writing back at most one
    /// dirty entry last modified before `deadline` (unix seconds).
    fn sync_once(
        &self,
        deadline: u64,
        gate: &CanSync,
    ) -> Result<SyncResult, CacheSyncError>;
}
