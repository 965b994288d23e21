//! Server health monitoring.
//!
//! A check issues `GET {base_url}{health_endpoint}` and maps the outcome:
//! - 2xx: `Healthy`, error cleared
//! - other status: `Unhealthy`, error set to the status code
//! - connection failure: `Offline`
//! - any other failure (timeout, unreadable response): `Unhealthy`
//!
//! A `ServerStatusChanged` event is emitted only when the status differs from
//! the previous one. Recording a result and announcing its transition happen
//! as one step, so overlapping checks of a server never announce out of order.

use std::{collections::HashMap, sync::Arc, time::Duration};

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    core::{
        config::ServerConfig,
        directory::{ServerDirectory, ServerStatus},
        metrics::RegistryMetrics,
        transport::Transport,
    },
    error::TransportError,
    events::{EventBus, RegistryEvent},
};

/// Shortest polling interval accepted by the background loop.
pub const MIN_MONITOR_INTERVAL: Duration = Duration::from_millis(10);

pub struct HealthMonitor {
    directory: Arc<ServerDirectory>,
    transport: Arc<dyn Transport>,
    events: Arc<EventBus>,
    metrics: Arc<RegistryMetrics>,
    /// Held while a result is recorded and its transition announced, so
    /// overlapping checks deliver transitions in the order they were applied.
    transitions: Mutex<()>,
}

impl HealthMonitor {
    pub fn new(
        directory: Arc<ServerDirectory>,
        transport: Arc<dyn Transport>,
        events: Arc<EventBus>,
        metrics: Arc<RegistryMetrics>,
    ) -> Self {
        Self {
            directory,
            transport,
            events,
            metrics,
            transitions: Mutex::new(()),
        }
    }

    /// Check one server. Unknown and disabled servers are not contacted and
    /// report `Unknown`.
    pub async fn check(&self, server_name: &str) -> ServerStatus {
        let Some(config) = self.directory.config(server_name) else {
            debug!("Health check requested for unknown server '{}'", server_name);
            return ServerStatus::Unknown;
        };
        if !config.enabled {
            debug!("Skipping health check for disabled server '{}'", server_name);
            return ServerStatus::Unknown;
        }
        self.check_server(config).await
    }

    /// Check every enabled server concurrently.
    pub async fn check_all(&self) -> HashMap<String, ServerStatus> {
        let checks = self
            .directory
            .enabled_servers()
            .into_iter()
            .map(|config| async move {
                let name = config.name.clone();
                let status = self.check_server(config).await;
                (name, status)
            });
        join_all(checks).await.into_iter().collect()
    }

    /// Smallest configured check interval across enabled servers.
    pub fn min_interval(&self) -> Option<Duration> {
        self.directory
            .enabled_servers()
            .iter()
            .map(|config| config.health_interval)
            .min()
    }

    async fn check_server(&self, config: Arc<ServerConfig>) -> ServerStatus {
        let (status, error) = self.probe(&config).await;
        self.metrics.record_health_check(status == ServerStatus::Healthy);

        let _applying = self.transitions.lock();
        let Some(previous) = self.directory.record_health(&config, status, error.clone()) else {
            debug!(
                "Server '{}' was removed or replaced during its health check",
                config.name
            );
            return status;
        };

        if previous != status {
            self.metrics.record_status_change();
            match &error {
                Some(err) => warn!(
                    "Server '{}' status changed: {} -> {} ({})",
                    config.name, previous, status, err
                ),
                None => info!(
                    "Server '{}' status changed: {} -> {}",
                    config.name, previous, status
                ),
            }
            self.events.emit(&RegistryEvent::ServerStatusChanged {
                server: config.name.clone(),
                previous,
                status,
            });
        }
        status
    }

    async fn probe(&self, config: &ServerConfig) -> (ServerStatus, Option<String>) {
        let url = config.health_url();
        match self.transport.get(&url, config.timeout).await {
            Ok(response) if response.status.is_success() => (ServerStatus::Healthy, None),
            Ok(response) => (
                ServerStatus::Unhealthy,
                Some(format!("HTTP {}", response.status.as_u16())),
            ),
            Err(err @ TransportError::Connect(_)) => (ServerStatus::Offline, Some(err.to_string())),
            Err(err) => (ServerStatus::Unhealthy, Some(err.to_string())),
        }
    }
}

/// Handle to the background polling loop.
pub(crate) struct HealthChecker {
    handle: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl HealthChecker {
    /// Spawn the loop on the current tokio runtime. The first check runs
    /// immediately.
    pub fn spawn(monitor: Arc<HealthMonitor>, interval: Duration) -> Self {
        let interval = interval.max(MIN_MONITOR_INTERVAL);
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let handle = tokio::spawn(async move {
            info!("Health monitor started (interval: {:?})", interval);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                // Not raced against cancellation: a stop waits for this round.
                let results = monitor.check_all().await;
                let healthy = results
                    .values()
                    .filter(|s| **s == ServerStatus::Healthy)
                    .count();
                debug!(
                    "Health check round complete: {}/{} healthy",
                    healthy,
                    results.len()
                );
            }
            info!("Health monitor stopped");
        });

        Self { handle, shutdown }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Request a stop without waiting for it.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    /// Stop the loop and wait for the current round to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.handle.await {
            warn!("Health monitor task ended abnormally: {}", e);
        }
    }
}
