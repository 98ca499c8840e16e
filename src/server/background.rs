//! Server identity configuration and the owner of both background workers.

use std::path::Path;

use crate::server::{
    BulkSyncDeps, BulkSyncOutcome, BulkSyncThread, LagTrackerDeps,
    LagTrackerThread,
};
use crate::utils::{CacheSyncError, ConfigFile};

use serde::Deserialize;

/// Configuration parameters struct, parsed from the `[server]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Application (cluster) name.
    pub app: String,

    /// This server's name within the application.
    pub server_name: String,

    /// Directory holding the lag checkpoint file.
    pub data_path: String,

    /// Bind address of the binlog time servant, if this process runs one.
    pub binlog_bind: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            app: String::new(),
            server_name: String::new(),
            data_path: ".".into(),
            binlog_bind: None,
        }
    }
}

impl ServerConfig {
    pub fn from_file(file: &ConfigFile) -> Result<Self, CacheSyncError> {
        let section = file.section("server")?;
        let config = parsed_config!(section.as_deref() => ServerConfig;
                                    app, server_name, data_path,
                                    binlog_bind)?;
        if config.app.is_empty() || config.server_name.is_empty() {
            return logged_err!(
                "invalid config.app '{}' or config.server_name '{}'",
                config.app,
                config.server_name
            );
        }
        Ok(config)
    }

    /// Logical name `"<app>.<server>"`, used for routing lookups and as the
    /// logging identity.
    pub fn service_name(&self) -> String {
        format!("{}.{}", self.app, self.server_name)
    }
}

/// Both background workers of one cache server.
pub struct BackgroundSync {
    lag_tracker: LagTrackerThread,
    bulk_sync: BulkSyncThread,
}

impl BackgroundSync {
    /// Initializes both workers from the same config file. Either one
    /// failing its init fails the whole setup.
    pub fn new_and_setup(
        config_path: &Path,
        lag_deps: LagTrackerDeps,
        bulk_deps: BulkSyncDeps,
    ) -> Result<Self, CacheSyncError> {
        let lag_tracker = LagTrackerThread::new_and_setup(config_path, lag_deps)?;
        let bulk_sync = BulkSyncThread::new_and_setup(config_path, bulk_deps)?;
        Ok(BackgroundSync {
            lag_tracker,
            bulk_sync,
        })
    }

    pub fn lag_tracker(&self) -> &LagTrackerThread {
        &self.lag_tracker
    }

    pub fn bulk_sync(&self) -> &BulkSyncThread {
        &self.bulk_sync
    }

    /// Reloads both workers' reloadable parameters.
    pub fn reload(&self) -> Result<(), CacheSyncError> {
        self.lag_tracker.reload()?;
        self.bulk_sync.reload()?;
        Ok(())
    }

    /// Starts both workers; already running ones are left alone.
    pub fn start(&self) -> Result<(), CacheSyncError> {
        self.lag_tracker.create_thread()?;
        self.bulk_sync.create_thread()?;
        Ok(())
    }

    /// Requests both workers to stop and waits for them. Returns the bulk
    /// sync outcome if it had not been collected before.
    pub async fn shutdown(&self) -> Option<BulkSyncOutcome> {
        self.lag_tracker.request_stop();
        self.bulk_sync.request_stop();
        self.lag_tracker.await_stopped().await;
        let outcome = self.bulk_sync.await_stopped().await;
        pf_info!("background sync shut down, bulk sync {:?}", outcome);
        outcome
    }
}
