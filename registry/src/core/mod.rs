//! Core registry infrastructure.

pub mod config;
pub mod directory;
pub mod discovery;
pub mod health;
pub mod invoker;
pub mod metrics;
pub mod registry;
pub mod transport;

pub use config::{
    DefaultsConfig, HealthCheckConfig, HealthMonitorConfig, RegistryConfig, ServerConfig,
    ServerDefaults, ServerEntryConfig, ServerOptions, TransportConfig,
};
pub use directory::{ServerDirectory, ServerRuntimeInfo, ServerStatus, ServerSummary};
pub use discovery::Discovery;
pub use health::HealthMonitor;
pub use invoker::{CallOptions, Invoker, RetryPolicy, ToolCallResult};
pub use metrics::{LatencySnapshot, MetricsSnapshot, RegistryMetrics};
pub use registry::{RegistryStats, ToolRegistry};
pub use transport::{HttpTransport, Transport, TransportResponse};
