//! Background synchronization workers of a cache server and the server-side
//! collaborators they run against.

mod status;
mod stats;
mod route;
mod checkpoint;
mod binlog;
mod worker;
mod lagtrack;
mod bulksync;
mod background;

pub use status::{GlobalStatus, LagCheckpoint, ServerType};
pub use stats::{
    Aggregation, PpKind, PropertyReport, PropertyStat, StatHub, StatSink,
};
pub use route::{RouteTable, ServerInfo, StaticRouteTable};
pub use checkpoint::{
    format_record, parse_record, CheckpointFile, CHECKPOINT_FILE,
    RECORD_PADDING,
};
pub use binlog::{
    BinlogConnector, BinlogPeer, BinlogReply, BinlogRequest, BinlogTimeService,
    RemoteError, TcpBinlogConnector, TcpBinlogPeer,
};
pub use lagtrack::{
    LagReporter, LagTracker, LagTrackerConfig, LagTrackerDeps,
    LagTrackerThread, LAG_PROPERTY,
};
pub use bulksync::{
    BulkSyncConfig, BulkSyncDeps, BulkSyncOutcome, BulkSyncThread, BulkSyncer,
};
pub use background::{BackgroundSync, ServerConfig};

pub(crate) use worker::WorkerHandle;
