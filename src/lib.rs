//! Background binlog lag tracking and bulk store synchronization for KV
//! cache servers.

#[macro_use]
mod utils;

pub mod server;
pub mod store;

pub use utils::{
    logger_init, me_prefix, set_me, CacheSyncError, Clock, ConfigFile,
    ManualClock, SystemClock, Timer, ME,
};

pub use server::{
    BackgroundSync, BinlogTimeService, BulkSyncOutcome, GlobalStatus,
    LagCheckpoint, ServerConfig, ServerType, StatHub, StaticRouteTable,
    TcpBinlogConnector,
};
pub use store::{CanSync, FileWriteBack, MemHashMap, SyncResult, SyncStore};
