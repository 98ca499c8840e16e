//! Process-wide server status shared by request handlers and the background
//! workers: server role, slave-creation window, and the lag checkpoint.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::store::CanSync;

/// Role this cache server currently plays in replication.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum ServerType {
    Master,
    Slave,
}

impl ServerType {
    /// Parses a role name, case-insensitively.
    pub fn parse_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "master" => Some(ServerType::Master),
            "slave" => Some(ServerType::Slave),
            _ => None,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            ServerType::Master => 0,
            ServerType::Slave => 1,
        }
    }

    fn from_u8(v: u8) -> Self {
        if v == 1 {
            ServerType::Slave
        } else {
            ServerType::Master
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ServerType::Master => write!(f, "MASTER"),
            ServerType::Slave => write!(f, "SLAVE"),
        }
    }
}

/// Pair of binlog timestamps describing replication progress.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub struct LagCheckpoint {
    /// Latest binlog entry timestamp known on the master (or applied here).
    pub last_binlog_time: u32,

    /// Timestamp up to which this node has confirmed synchronization.
    pub last_sync_time: u32,
}

impl LagCheckpoint {
    /// Replication lag in seconds. Not clamped: a sync time ahead of the
    /// known binlog time yields a negative lag.
    pub fn lag(&self) -> i64 {
        i64::from(self.last_binlog_time) - i64::from(self.last_sync_time)
    }
}

/// Global server status handle. Cloned around as `Arc<GlobalStatus>`.
#[derive(Debug)]
pub struct GlobalStatus {
    server_type: AtomicU8,
    slave_creating: AtomicBool,

    /// The lag checkpoint pair; every read of both fields together happens
    /// under this one lock.
    binlog: Mutex<LagCheckpoint>,

    can_sync: Arc<CanSync>,
}

impl GlobalStatus {
    /// Creates a new status object with given initial role.
    pub fn new(server_type: ServerType) -> Self {
        GlobalStatus {
            server_type: AtomicU8::new(server_type.to_u8()),
            slave_creating: AtomicBool::new(false),
            binlog: Mutex::new(LagCheckpoint::default()),
            can_sync: Arc::new(CanSync::new()),
        }
    }

    pub fn server_type(&self) -> ServerType {
        ServerType::from_u8(self.server_type.load(Ordering::Acquire))
    }

    pub fn set_server_type(&self, server_type: ServerType) {
        self.server_type
            .store(server_type.to_u8(), Ordering::Release);
    }

    /// True while a slave of this node is being provisioned.
    pub fn is_slave_creating(&self) -> bool {
        self.slave_creating.load(Ordering::Acquire)
    }

    pub fn set_slave_creating(&self, creating: bool) {
        self.slave_creating.store(creating, Ordering::Release);
    }

    /// Locks the checkpoint pair. Poisoning is ignored since the pair is
    /// plain data that cannot be left half-updated.
    fn lock_binlog(&self) -> MutexGuard<'_, LagCheckpoint> {
        self.binlog.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sets both checkpoint timestamps at once.
    pub fn set_binlog_time(&self, sync: u32, last: u32) {
        let mut binlog = self.lock_binlog();
        binlog.last_sync_time = sync;
        binlog.last_binlog_time = last;
    }

    /// Updates only the latest known binlog time.
    pub fn update_last_binlog_time(&self, last: u32) {
        self.lock_binlog().last_binlog_time = last;
    }

    /// Updates only the confirmed sync time; called by the binlog apply
    /// path.
    pub fn update_sync_time(&self, sync: u32) {
        self.lock_binlog().last_sync_time = sync;
    }

    pub fn binlog_time_last(&self) -> u32 {
        self.lock_binlog().last_binlog_time
    }

    pub fn binlog_time_sync(&self) -> u32 {
        self.lock_binlog().last_sync_time
    }

    /// Consistent snapshot of both checkpoint timestamps.
    pub fn checkpoint(&self) -> LagCheckpoint {
        *self.lock_binlog()
    }

    /// The gate consulted by the store on each bulk sync iteration.
    pub fn can_sync(&self) -> Arc<CanSync> {
        self.can_sync.clone()
    }
}
