//! Routing table lookup of backup (master) sources by logical server name.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::utils::{CacheSyncError, ConfigFile};

/// Endpoint record of a server as known to the routing table.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct ServerInfo {
    pub server_name: String,

    /// Address (`host:port`) of the binlog time servant.
    pub binlog_servant: String,
}

/// Routing table service.
pub trait RouteTable: Send + Sync {
    /// Looks up the backup source the given server replicates from.
    fn get_bak_source(
        &self,
        server_name: &str,
    ) -> Result<ServerInfo, CacheSyncError>;
}

/// Routing table populated from the `[route]` config section and updatable
/// at run time.
#[derive(Debug, Default)]
pub struct StaticRouteTable {
    sources: RwLock<HashMap<String, ServerInfo>>,
}

impl StaticRouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the table from the `[route]` section of a config file, which
    /// maps `"<app>.<server>"` names to binlog servant addresses.
    pub fn from_config(config: &ConfigFile) -> Result<Self, CacheSyncError> {
        let table = Self::new();
        for (name, addr) in config.string_map("route")? {
            table.set_bak_source(&name, &addr);
        }
        Ok(table)
    }

    /// Sets (or replaces) the backup source of given server.
    pub fn set_bak_source(&self, server_name: &str, binlog_servant: &str) {
        let mut sources =
            self.sources.write().unwrap_or_else(|e| e.into_inner());
        sources.insert(
            server_name.into(),
            ServerInfo {
                server_name: server_name.into(),
                binlog_servant: binlog_servant.into(),
            },
        );
    }

    pub fn remove_bak_source(&self, server_name: &str) {
        let mut sources =
            self.sources.write().unwrap_or_else(|e| e.into_inner());
        sources.remove(server_name);
    }
}

impl RouteTable for StaticRouteTable {
    fn get_bak_source(
        &self,
        server_name: &str,
    ) -> Result<ServerInfo, CacheSyncError> {
        let sources = self.sources.read().unwrap_or_else(|e| e.into_inner());
        sources.get(server_name).cloned().ok_or_else(|| {
            CacheSyncError::msg(format!(
                "no backup source for '{}'",
                server_name
            ))
        })
    }
}
