//! In-memory hash map store with dirty tracking and resumable write-back.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::store::{CanSync, SyncResult, SyncStore, WriteBack};
use crate::utils::{CacheSyncError, Clock};

/// Code returned by `sync_once()` when the write-back sink fails.
pub const SYNC_ERR_WRITEBACK: i32 = -1;

#[derive(Debug, Clone)]
struct Entry {
    /// `None` for a key-only entry.
    value: Option<String>,

    /// Modified since last written back.
    dirty: bool,

    /// Unix seconds of the last modification.
    modified: u64,
}

#[derive(Debug, Default)]
struct Inner {
    map: HashMap<String, Entry>,

    /// Keys still to be visited by the current synchronization pass.
    cursor: VecDeque<String>,
}

/// The in-memory cache store.
pub struct MemHashMap {
    inner: Mutex<Inner>,
    writeback: Arc<dyn WriteBack>,
    clock: Arc<dyn Clock>,
}

impl MemHashMap {
    pub fn new(writeback: Arc<dyn WriteBack>, clock: Arc<dyn Clock>) -> Self {
        MemHashMap {
            inner: Mutex::new(Inner::default()),
            writeback,
            clock,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, CacheSyncError> {
        self.inner
            .lock()
            .map_err(|e| CacheSyncError::msg(e.to_string()))
    }

    /// Puts a value, marking the entry dirty. Returns the old value.
    pub fn set(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Option<String>, CacheSyncError> {
        let modified = self.clock.now();
        let old = self.lock()?.map.insert(
            key.into(),
            Entry {
                value: Some(value.into()),
                dirty: true,
                modified,
            },
        );
        Ok(old.and_then(|e| e.value))
    }

    /// Records a key whose value is not cached. Key-only entries are never
    /// written back.
    pub fn set_only_key(&self, key: &str) -> Result<(), CacheSyncError> {
        let modified = self.clock.now();
        self.lock()?.map.insert(
            key.into(),
            Entry {
                value: None,
                dirty: false,
                modified,
            },
        );
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, CacheSyncError> {
        Ok(self.lock()?.map.get(key).and_then(|e| e.value.clone()))
    }

    /// Removes an entry. Returns true if it existed.
    pub fn erase(&self, key: &str) -> Result<bool, CacheSyncError> {
        Ok(self.lock()?.map.remove(key).is_some())
    }

    pub fn len(&self) -> Result<usize, CacheSyncError> {
        Ok(self.lock()?.map.len())
    }

    pub fn is_empty(&self) -> Result<bool, CacheSyncError> {
        Ok(self.len()? == 0)
    }

    pub fn dirty_count(&self) -> Result<usize, CacheSyncError> {
        Ok(self.lock()?.map.values().filter(|e| e.dirty).count())
    }
}

impl SyncStore for MemHashMap {
    fn sync(&self) -> Result<(), CacheSyncError> {
        let mut inner = self.lock()?;
        let mut keys: Vec<String> = inner.map.keys().cloned().collect();
        keys.sort();
        pf_debug!("sync pass prepared over {} entries", keys.len());
        inner.cursor = keys.into();
        Ok(())
    }

    fn sync_once(
        &self,
        deadline: u64,
        gate: &CanSync,
    ) -> Result<SyncResult, CacheSyncError> {
        // pick the next entry under the lock, write back outside of it
        let (key, value, modified) = {
            let mut inner = self.lock()?;
            let Some(key) = inner.cursor.pop_front() else {
                return Ok(SyncResult::Ok);
            };
            let Some(entry) = inner.map.get(&key) else {
                return Ok(SyncResult::NoNeedSync); // erased meanwhile
            };
            let Some(value) = entry.value.clone() else {
                return Ok(SyncResult::OnlyKey);
            };
            if !entry.dirty || entry.modified >= deadline || !gate.allows(&key)
            {
                return Ok(SyncResult::NoNeedSync);
            }
            (key, value, entry.modified)
        };

        if let Err(e) = self.writeback.write_back(&key, &value) {
            pf_error!("write-back of key '{}' failed: {}", key, e);
            return Ok(SyncResult::Other(SYNC_ERR_WRITEBACK));
        }

        // only clear the dirty flag if not modified again meanwhile
        let mut inner = self.lock()?;
        if let Some(entry) = inner.map.get_mut(&key) {
            if entry.modified == modified
                && entry.value.as_deref() == Some(value.as_str())
            {
                entry.dirty = false;
            }
        }
        Ok(SyncResult::NeedSync)
    }
}
