//! In-memory server directory.
//!
//! Maps server names to their configuration and runtime status. Every mutation
//! holds the entry's shard lock only for the in-memory update.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::core::config::ServerConfig;

/// Health state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
    Offline,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ServerRuntimeInfo {
    pub config: Arc<ServerConfig>,
    pub status: ServerStatus,
    pub last_health_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Names of the tools this server exposed at its last successful discovery.
    pub tools: Vec<String>,
}

impl ServerRuntimeInfo {
    fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            status: ServerStatus::Unknown,
            last_health_check: None,
            last_error: None,
            tools: Vec::new(),
        }
    }
}

/// Display row for `list_servers`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerSummary {
    pub name: String,
    pub url: String,
    pub enabled: bool,
    pub description: Option<String>,
    pub status: ServerStatus,
    pub tool_count: usize,
    pub last_error: Option<String>,
    pub last_health_check: Option<DateTime<Utc>>,
}

impl From<&ServerRuntimeInfo> for ServerSummary {
    fn from(info: &ServerRuntimeInfo) -> Self {
        Self {
            name: info.config.name.clone(),
            url: info.config.base_url.clone(),
            enabled: info.config.enabled,
            description: info.config.description.clone(),
            status: info.status,
            tool_count: info.tools.len(),
            last_error: info.last_error.clone(),
            last_health_check: info.last_health_check,
        }
    }
}

#[derive(Default)]
pub struct ServerDirectory {
    servers: DashMap<String, ServerRuntimeInfo>,
}

impl ServerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a server. The entry starts `Unknown` with no tools.
    pub fn register(&self, config: ServerConfig) -> Option<ServerRuntimeInfo> {
        let name = config.name.clone();
        self.servers.insert(name, ServerRuntimeInfo::new(config))
    }

    pub fn remove(&self, name: &str) -> Option<ServerRuntimeInfo> {
        self.servers.remove(name).map(|(_, info)| info)
    }

    pub fn get(&self, name: &str) -> Option<ServerRuntimeInfo> {
        self.servers.get(name).map(|entry| entry.value().clone())
    }

    pub fn config(&self, name: &str) -> Option<Arc<ServerConfig>> {
        self.servers.get(name).map(|entry| Arc::clone(&entry.config))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    pub fn status(&self, name: &str) -> Option<ServerStatus> {
        self.servers.get(name).map(|entry| entry.status)
    }

    /// Configurations of all enabled servers.
    pub fn enabled_servers(&self) -> Vec<Arc<ServerConfig>> {
        self.servers
            .iter()
            .filter(|entry| entry.config.enabled)
            .map(|entry| Arc::clone(&entry.config))
            .collect()
    }

    /// Summaries sorted by server name.
    pub fn list(&self) -> Vec<ServerSummary> {
        let mut summaries: Vec<ServerSummary> = self
            .servers
            .iter()
            .map(|entry| ServerSummary::from(entry.value()))
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Store a health check outcome and return the previous status.
    ///
    /// The timestamp is refreshed even when the status is unchanged. Returns
    /// `None` if the server is no longer registered, or was re-registered with a
    /// different config while the check was in flight.
    pub fn record_health(
        &self,
        config: &Arc<ServerConfig>,
        status: ServerStatus,
        error: Option<String>,
    ) -> Option<ServerStatus> {
        let mut entry = self.servers.get_mut(&config.name)?;
        if !Arc::ptr_eq(&entry.config, config) {
            return None;
        }
        let previous = entry.status;
        entry.status = status;
        entry.last_error = error;
        entry.last_health_check = Some(Utc::now());
        Some(previous)
    }

    /// Replace the owned tool list. Returns false if the server is gone.
    pub fn set_tools(&self, name: &str, tools: Vec<String>) -> bool {
        match self.servers.get_mut(name) {
            Some(mut entry) => {
                entry.tools = tools;
                true
            }
            None => false,
        }
    }

    /// Whether `config` is still the registered config for its server.
    pub fn is_current(&self, config: &Arc<ServerConfig>) -> bool {
        self.servers
            .get(&config.name)
            .is_some_and(|entry| Arc::ptr_eq(&entry.config, config))
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn clear(&self) {
        self.servers.clear();
    }
}
