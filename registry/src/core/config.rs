//! Registry configuration types.
//!
//! [`RegistryConfig`] is the serialized surface (JSON or YAML, already read by the
//! caller). It is validated into [`ServerConfig`] values, which are what the
//! directory stores.

use std::{collections::HashSet, time::Duration};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{RegistryError, RegistryResult};

pub const DEFAULT_HEALTH_ENDPOINT: &str = "/health";
pub const DEFAULT_HOST: &str = "localhost";

/// Validated, immutable configuration of one tool server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub name: String,
    /// Base URL without a trailing slash, e.g. `http://localhost:9001`.
    pub base_url: String,
    pub enabled: bool,
    pub description: Option<String>,
    pub health_endpoint: String,
    pub health_interval: Duration,
    /// Per-request timeout for discovery and invocation.
    pub timeout: Duration,
    /// Total number of invocation attempts, including the first one.
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl ServerConfig {
    /// Build a config with the built-in defaults and validate it.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> RegistryResult<Self> {
        ServerDefaults::default().server(name, base_url, &ServerOptions::default())
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_health_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.health_endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Join an endpoint path onto the base URL.
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn health_url(&self) -> String {
        self.endpoint_url(&self.health_endpoint)
    }

    pub fn validate(&self) -> RegistryResult<()> {
        if self.name.trim().is_empty() {
            return Err(RegistryError::Config(
                "server name must not be empty".to_string(),
            ));
        }
        validate_base_url(&self.name, &self.base_url)?;
        if self.timeout.is_zero() {
            return Err(RegistryError::Config(format!(
                "server '{}': timeout must be greater than zero",
                self.name
            )));
        }
        if self.retry_attempts == 0 {
            return Err(RegistryError::Config(format!(
                "server '{}': retry_attempts must be at least 1",
                self.name
            )));
        }
        if !self.health_endpoint.starts_with('/') {
            return Err(RegistryError::Config(format!(
                "server '{}': health endpoint '{}' must start with '/'",
                self.name, self.health_endpoint
            )));
        }
        if self.health_interval.is_zero() {
            return Err(RegistryError::Config(format!(
                "server '{}': health check interval must be greater than zero",
                self.name
            )));
        }
        Ok(())
    }
}

fn validate_base_url(name: &str, base_url: &str) -> RegistryResult<()> {
    let parsed = Url::parse(base_url).map_err(|e| {
        RegistryError::Config(format!("server '{}': invalid url '{}': {}", name, base_url, e))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(RegistryError::Config(format!(
            "server '{}': unsupported url scheme '{}' (expected http or https)",
            name, other
        ))),
    }
}

/// Optional per-server settings accepted by `add_server`.
///
/// Unset fields fall back to the registry's [`ServerDefaults`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerOptions {
    pub enabled: Option<bool>,
    pub description: Option<String>,
    pub health_endpoint: Option<String>,
    pub health_interval: Option<Duration>,
    pub timeout: Option<Duration>,
    pub retry_attempts: Option<u32>,
    pub retry_delay: Option<Duration>,
}

/// Defaults applied to servers that do not override them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerDefaults {
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub health_interval: Duration,
}

impl Default for ServerDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(default_timeout_seconds()),
            retry_attempts: default_retry_attempts(),
            retry_delay: Duration::from_secs(1),
            health_interval: Duration::from_secs(default_health_interval_seconds()),
        }
    }
}

impl ServerDefaults {
    /// Resolve options against these defaults into a validated [`ServerConfig`].
    pub fn server(
        &self,
        name: impl Into<String>,
        base_url: impl Into<String>,
        options: &ServerOptions,
    ) -> RegistryResult<ServerConfig> {
        let base_url: String = base_url.into();
        let config = ServerConfig {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            enabled: options.enabled.unwrap_or(true),
            description: options.description.clone(),
            health_endpoint: options
                .health_endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_HEALTH_ENDPOINT.to_string()),
            health_interval: options.health_interval.unwrap_or(self.health_interval),
            timeout: options.timeout.unwrap_or(self.timeout),
            retry_attempts: options.retry_attempts.unwrap_or(self.retry_attempts),
            retry_delay: options.retry_delay.unwrap_or(self.retry_delay),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Top-level registry configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Defaults for every server entry.
    #[serde(default, alias = "global")]
    pub defaults: DefaultsConfig,

    /// Outbound HTTP settings
    #[serde(default)]
    pub transport: TransportConfig,

    /// Background health monitor settings
    #[serde(default)]
    pub health: HealthMonitorConfig,

    #[serde(default)]
    pub servers: Vec<ServerEntryConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_timeout_seconds_f64")]
    pub timeout_seconds: f64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: f64,
}

/// Outbound HTTP client settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Maximum concurrent in-flight requests across all servers
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Timeout for requests that do not carry their own (seconds)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Idle pooled connections are closed after this many seconds
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthMonitorConfig {
    /// Polling interval used when monitoring starts without an explicit one (seconds)
    #[serde(default = "default_health_interval_seconds")]
    pub interval_seconds: u64,
}

/// One server entry as it appears in configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerEntryConfig {
    pub name: String,

    /// Full base URL. Takes precedence over `host`/`port`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_seconds: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<f64>,
}

// Default value functions
fn default_timeout_seconds() -> u64 {
    30
}

fn default_timeout_seconds_f64() -> f64 {
    default_timeout_seconds() as f64
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_seconds() -> f64 {
    1.0
}

fn default_max_connections() -> usize {
    100
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_health_interval_seconds() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

// Default implementations
impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds_f64(),
            retry_attempts: default_retry_attempts(),
            retry_delay_seconds: default_retry_delay_seconds(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            timeout_seconds: default_timeout_seconds(),
            pool_idle_timeout_seconds: default_pool_idle_timeout(),
        }
    }
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_health_interval_seconds(),
        }
    }
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_seconds)
    }
}

impl HealthMonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

fn seconds(context: &str, field: &str, value: f64) -> RegistryResult<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        RegistryError::Config(format!(
            "{}: {} must be a non-negative number of seconds, got {}",
            context, field, value
        ))
    })
}

impl DefaultsConfig {
    pub fn to_server_defaults(&self, health: &HealthMonitorConfig) -> RegistryResult<ServerDefaults> {
        Ok(ServerDefaults {
            timeout: seconds("defaults", "timeout_seconds", self.timeout_seconds)?,
            retry_attempts: self.retry_attempts,
            retry_delay: seconds("defaults", "retry_delay_seconds", self.retry_delay_seconds)?,
            health_interval: health.interval(),
        })
    }
}

impl ServerEntryConfig {
    /// Base URL from `url`, or from `host`/`port`.
    pub fn base_url(&self) -> RegistryResult<String> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        match self.port {
            Some(port) => Ok(format!(
                "http://{}:{}",
                self.host.as_deref().unwrap_or(DEFAULT_HOST),
                port
            )),
            None => Err(RegistryError::Config(format!(
                "server '{}': either 'url' or 'port' is required",
                self.name
            ))),
        }
    }

    pub fn to_server_config(&self, defaults: &ServerDefaults) -> RegistryResult<ServerConfig> {
        if self.name.trim().is_empty() {
            return Err(RegistryError::Config(
                "server entry is missing a name".to_string(),
            ));
        }
        let context = format!("server '{}'", self.name);
        let options = ServerOptions {
            enabled: Some(self.enabled),
            description: self.description.clone(),
            health_endpoint: self.health_check.endpoint.clone(),
            health_interval: self
                .health_check
                .interval_seconds
                .map(|s| seconds(&context, "health_check.interval_seconds", s))
                .transpose()?,
            timeout: self
                .timeout_seconds
                .map(|s| seconds(&context, "timeout_seconds", s))
                .transpose()?,
            retry_attempts: self.retry_attempts,
            retry_delay: self
                .retry_delay_seconds
                .map(|s| seconds(&context, "retry_delay_seconds", s))
                .transpose()?,
        };
        defaults.server(&self.name, self.base_url()?, &options)
    }
}

impl RegistryConfig {
    /// Parse from an already-decoded JSON value.
    pub fn from_value(value: serde_json::Value) -> RegistryResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| RegistryError::Config(format!("invalid registry config: {}", e)))
    }

    pub fn from_json_str(content: &str) -> RegistryResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| RegistryError::Config(format!("invalid registry config: {}", e)))
    }

    pub fn from_yaml_str(content: &str) -> RegistryResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| RegistryError::Config(format!("invalid registry config: {}", e)))
    }

    pub fn server_defaults(&self) -> RegistryResult<ServerDefaults> {
        self.defaults.to_server_defaults(&self.health)
    }

    /// Validate every entry. Fails on the first invalid or duplicated server.
    pub fn server_configs(&self) -> RegistryResult<Vec<ServerConfig>> {
        let defaults = self.server_defaults()?;
        let mut seen = HashSet::new();
        let mut configs = Vec::with_capacity(self.servers.len());
        for entry in &self.servers {
            if !seen.insert(entry.name.as_str()) {
                return Err(RegistryError::Config(format!(
                    "duplicate server name '{}'",
                    entry.name
                )));
            }
            configs.push(entry.to_server_config(&defaults)?);
        }
        Ok(configs)
    }
}
