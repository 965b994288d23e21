//! Registry facade.
//!
//! [`ToolRegistry`] owns the server directory, tool catalog, event bus and
//! transport, and wires the health monitor, discovery and invoker on top of
//! them. There is no process-wide instance; construct one and share it.

use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    core::{
        config::{RegistryConfig, ServerConfig, ServerDefaults, ServerOptions, TransportConfig},
        directory::{ServerDirectory, ServerRuntimeInfo, ServerStatus, ServerSummary},
        discovery::Discovery,
        health::{HealthChecker, HealthMonitor},
        invoker::{CallOptions, Invoker, ToolCallResult},
        metrics::{MetricsSnapshot, RegistryMetrics},
        transport::{HttpTransport, Transport},
    },
    error::RegistryResult,
    events::{EventBus, EventKind, RegistryEvent, SubscriptionId},
    inventory::{ToolCatalog, ToolDefinition, ToolFilter},
};

/// Point-in-time overview of the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryStats {
    pub servers: usize,
    pub enabled_servers: usize,
    pub healthy_servers: usize,
    /// Distinct tool names.
    pub tools: usize,
    /// Stored definitions, counting each provider of a shared name.
    pub tool_definitions: usize,
    pub monitoring: bool,
    pub metrics: MetricsSnapshot,
}

pub struct ToolRegistry {
    directory: Arc<ServerDirectory>,
    catalog: Arc<ToolCatalog>,
    events: Arc<EventBus>,
    metrics: Arc<RegistryMetrics>,
    transport: Arc<dyn Transport>,
    health: Arc<HealthMonitor>,
    discovery: Discovery,
    invoker: Invoker,
    defaults: ServerDefaults,
    monitor_interval: Duration,
    health_checker: Mutex<Option<HealthChecker>>,
}

impl ToolRegistry {
    /// Registry with built-in defaults and an HTTP transport. No connection is
    /// opened until the first request.
    pub fn new() -> Self {
        Self::with_transport(Arc::new(HttpTransport::new(TransportConfig::default())))
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        let defaults = ServerDefaults::default();
        Self::with_parts(transport, defaults, defaults.health_interval)
    }

    /// Build a registry from configuration and register its servers.
    ///
    /// Fails without registering anything if any server entry is invalid.
    pub fn from_config(config: &RegistryConfig) -> RegistryResult<Self> {
        let transport = Arc::new(HttpTransport::new(config.transport.clone()));
        Self::from_config_with_transport(config, transport)
    }

    pub fn from_config_with_transport(
        config: &RegistryConfig,
        transport: Arc<dyn Transport>,
    ) -> RegistryResult<Self> {
        let defaults = config.server_defaults()?;
        let registry = Self::with_parts(transport, defaults, config.health.interval());
        registry.register_from_config(config)?;
        Ok(registry)
    }

    fn with_parts(
        transport: Arc<dyn Transport>,
        defaults: ServerDefaults,
        monitor_interval: Duration,
    ) -> Self {
        let directory = Arc::new(ServerDirectory::new());
        let catalog = Arc::new(ToolCatalog::new());
        let events = Arc::new(EventBus::new());
        let metrics = Arc::new(RegistryMetrics::new());

        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&directory),
            Arc::clone(&transport),
            Arc::clone(&events),
            Arc::clone(&metrics),
        ));
        let discovery = Discovery::new(
            Arc::clone(&directory),
            Arc::clone(&catalog),
            Arc::clone(&transport),
            Arc::clone(&events),
            Arc::clone(&metrics),
        );
        let invoker = Invoker::new(
            Arc::clone(&directory),
            Arc::clone(&catalog),
            Arc::clone(&transport),
            Arc::clone(&events),
            Arc::clone(&metrics),
        );

        Self {
            directory,
            catalog,
            events,
            metrics,
            transport,
            health,
            discovery,
            invoker,
            defaults,
            monitor_interval,
            health_checker: Mutex::new(None),
        }
    }

    // ========================================================================
    // Servers
    // ========================================================================

    /// Register a server, replacing any server of the same name along with
    /// the tools it had discovered.
    pub fn register_server(&self, config: ServerConfig) -> RegistryResult<()> {
        config.validate()?;
        let name = config.name.clone();
        let url = config.base_url.clone();

        if self.directory.register(config).is_some() {
            let dropped = self.catalog.clear_server_tools(&name);
            info!(
                "Replaced server '{}' at {} ({} tools dropped)",
                name,
                url,
                dropped.len()
            );
        } else {
            info!("Registered server '{}' at {}", name, url);
        }
        Ok(())
    }

    /// Register a server from a name, base URL and optional overrides.
    pub fn add_server(
        &self,
        name: &str,
        url: &str,
        options: ServerOptions,
    ) -> RegistryResult<ServerConfig> {
        let config = self.defaults.server(name, url, &options)?;
        self.register_server(config.clone())?;
        Ok(config)
    }

    /// Register every server in `config`. Nothing is registered if any entry
    /// is invalid. Returns the registered names.
    pub fn register_from_config(&self, config: &RegistryConfig) -> RegistryResult<Vec<String>> {
        let servers = config.server_configs()?;
        let mut names = Vec::with_capacity(servers.len());
        for server in servers {
            names.push(server.name.clone());
            self.register_server(server)?;
        }
        info!("Registered {} servers from configuration", names.len());
        Ok(names)
    }

    /// Parse `value` as a [`RegistryConfig`] and register its servers.
    pub fn register_from_value(&self, value: Value) -> RegistryResult<Vec<String>> {
        self.register_from_config(&RegistryConfig::from_value(value)?)
    }

    /// Remove a server and its tools. Returns false if it was not registered.
    pub fn remove_server(&self, name: &str) -> bool {
        match self.directory.remove(name) {
            Some(_) => {
                let dropped = self.catalog.clear_server_tools(name);
                info!("Removed server '{}' ({} tools dropped)", name, dropped.len());
                true
            }
            None => false,
        }
    }

    pub fn get_server(&self, name: &str) -> Option<ServerRuntimeInfo> {
        self.directory.get(name)
    }

    pub fn list_servers(&self) -> Vec<ServerSummary> {
        self.directory.list()
    }

    // ========================================================================
    // Health
    // ========================================================================

    pub async fn check_health(&self, name: &str) -> ServerStatus {
        self.health.check(name).await
    }

    pub async fn check_all_health(&self) -> HashMap<String, ServerStatus> {
        self.health.check_all().await
    }

    /// Start the background health loop. Returns false if it is already
    /// running.
    ///
    /// Without an explicit interval, the smallest per-server health interval
    /// is used, or the configured monitor interval when no server is enabled.
    /// Must be called from within a tokio runtime.
    pub fn start_health_monitoring(&self, interval: Option<Duration>) -> bool {
        let mut guard = self.health_checker.lock();
        if guard.as_ref().is_some_and(HealthChecker::is_running) {
            debug!("Health monitoring already running");
            return false;
        }
        let interval = interval
            .or_else(|| self.health.min_interval())
            .unwrap_or(self.monitor_interval);
        *guard = Some(HealthChecker::spawn(Arc::clone(&self.health), interval));
        true
    }

    /// Stop the background loop and wait for any in-flight round to finish.
    pub async fn stop_health_monitoring(&self) {
        let checker = self.health_checker.lock().take();
        if let Some(checker) = checker {
            checker.shutdown().await;
        }
    }

    pub fn is_health_monitoring(&self) -> bool {
        self.health_checker
            .lock()
            .as_ref()
            .is_some_and(HealthChecker::is_running)
    }

    // ========================================================================
    // Discovery and catalog
    // ========================================================================

    pub async fn discover(&self, server_name: &str) -> Vec<ToolDefinition> {
        self.discovery.discover(server_name).await
    }

    pub async fn discover_all(&self) -> HashMap<String, Vec<ToolDefinition>> {
        self.discovery.discover_all().await
    }

    pub fn get_tool(&self, name: &str) -> Option<ToolDefinition> {
        self.catalog.get_tool(name)
    }

    pub fn get_tool_on_server(&self, server_name: &str, name: &str) -> Option<ToolDefinition> {
        self.catalog.get_tool_qualified(server_name, name)
    }

    pub fn list_tools(&self, filter: &ToolFilter) -> Vec<ToolDefinition> {
        self.catalog.list_tools(filter)
    }

    // ========================================================================
    // Invocation
    // ========================================================================

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> ToolCallResult {
        let options = CallOptions {
            timeout,
            ..Default::default()
        };
        self.invoker.call(name, arguments, options).await
    }

    pub async fn call_tool_with_options(
        &self,
        name: &str,
        arguments: Value,
        options: CallOptions,
    ) -> ToolCallResult {
        self.invoker.call(name, arguments, options).await
    }

    pub async fn call_tool_on_server(
        &self,
        server_name: &str,
        name: &str,
        arguments: Value,
    ) -> ToolCallResult {
        self.invoker
            .call_on_server(server_name, name, arguments, CallOptions::default())
            .await
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&RegistryEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.events.subscribe(kind, handler)
    }

    /// Subscribe by wire name (`tool_registered`, `tool_called`,
    /// `server_status_changed`).
    pub fn on_named<F>(&self, kind: &str, handler: F) -> RegistryResult<SubscriptionId>
    where
        F: Fn(&RegistryEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Ok(self.events.subscribe(kind.parse()?, handler))
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    // ========================================================================
    // Lifecycle and stats
    // ========================================================================

    /// Stop health monitoring, then release the transport's connections.
    ///
    /// The registry stays usable; the transport reopens on the next request.
    pub async fn close(&self) {
        self.stop_health_monitoring().await;
        self.transport.close().await;
        info!("Tool registry closed");
    }

    pub fn metrics(&self) -> &Arc<RegistryMetrics> {
        &self.metrics
    }

    pub fn stats(&self) -> RegistryStats {
        let servers = self.directory.list();
        let counts = self.catalog.counts();
        RegistryStats {
            servers: servers.len(),
            enabled_servers: servers.iter().filter(|s| s.enabled).count(),
            healthy_servers: servers
                .iter()
                .filter(|s| s.status == ServerStatus::Healthy)
                .count(),
            tools: counts.names,
            tool_definitions: counts.definitions,
            monitoring: self.is_health_monitoring(),
            metrics: self.metrics.snapshot(),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ToolRegistry {
    fn drop(&mut self) {
        if let Some(checker) = self.health_checker.get_mut().take() {
            checker.cancel();
        }
    }
}
