//! Registry for HTTP tool servers.
//!
//! Servers are registered by name and base URL. The registry probes their
//! health, discovers the tools each one exposes, and invokes those tools with
//! per-server timeouts and retries.
//!
//! ## Modules
//!
//! - [`core`]: server directory, health monitor, discovery, invoker and the
//!   [`ToolRegistry`] facade
//! - [`inventory`]: tool storage and indexing
//! - [`events`]: in-process event bus
//!
//! ```no_run
//! use smg_tool_registry::{ServerOptions, ToolRegistry};
//!
//! # async fn run() -> smg_tool_registry::RegistryResult<()> {
//! let registry = ToolRegistry::new();
//! registry.add_server("alpha", "http://localhost:9001", ServerOptions::default())?;
//! registry.discover("alpha").await;
//! let result = registry.call_tool("echo", serde_json::json!({}), None).await;
//! assert!(result.success);
//! registry.close().await;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;
pub mod events;
pub mod inventory;

#[cfg(test)]
mod test_util;

pub use core::{
    CallOptions, HttpTransport, LatencySnapshot, MetricsSnapshot, RegistryConfig, RegistryMetrics,
    RegistryStats, ServerConfig, ServerOptions, ServerRuntimeInfo, ServerStatus, ServerSummary,
    ToolCallResult, ToolRegistry, Transport, TransportConfig, TransportResponse,
};
pub use error::{RegistryError, RegistryResult, TransportError};
pub use events::{EventKind, RegistryEvent, SubscriptionId};
pub use inventory::{QualifiedToolName, ToolDefinition, ToolFilter};
