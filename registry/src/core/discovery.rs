//! Tool discovery.
//!
//! `POST {base_url}/list_tools` may answer with a bare array of tool records or
//! an object wrapping them under `tools` (or `operations`). Both shapes are
//! normalized by [`normalize_tool_records`] before records become
//! [`ToolDefinition`]s.

use std::{collections::HashMap, sync::Arc};

use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::{
    core::{
        config::ServerConfig, directory::ServerDirectory, metrics::RegistryMetrics,
        transport::Transport,
    },
    error::{RegistryError, RegistryResult},
    events::{EventBus, RegistryEvent},
    inventory::{ToolBatch, ToolCatalog, ToolDefinition, ToolFilter, DEFAULT_TOOL_VERSION},
};

pub const LIST_TOOLS_PATH: &str = "/list_tools";

/// Keys that may wrap the tool array in an object response, in lookup order.
const WRAPPER_KEYS: [&str; 2] = ["tools", "operations"];

/// Keys that may carry a tool's parameter schema, in lookup order.
const SCHEMA_KEYS: [&str; 3] = ["inputSchema", "input_schema", "parameters"];

/// Flatten a `list_tools` response into raw tool records.
///
/// Non-object array entries are skipped.
pub fn normalize_tool_records(body: Value) -> RegistryResult<Vec<Map<String, Value>>> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut obj) => WRAPPER_KEYS
            .iter()
            .find_map(|key| match obj.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or_else(|| {
                RegistryError::InvalidResponse(format!(
                    "expected a tool array or an object with one of {:?}",
                    WRAPPER_KEYS
                ))
            })?,
        other => {
            return Err(RegistryError::InvalidResponse(format!(
                "expected a tool array, got {}",
                json_type(&other)
            )))
        }
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(record) => Some(record),
            other => {
                warn!("Skipping non-object tool record ({})", json_type(&other));
                None
            }
        })
        .collect())
}

/// Convert one raw record into a definition owned by `server`.
///
/// Returns `None` for records without a usable `name`. A missing schema
/// becomes an empty object.
pub fn parse_tool_record(
    record: &Map<String, Value>,
    server: &ServerConfig,
) -> Option<ToolDefinition> {
    let name = match record.get("name").and_then(Value::as_str).map(str::trim) {
        Some(name) if !name.is_empty() => name,
        _ => {
            warn!("Skipping tool record without a name from '{}'", server.name);
            return None;
        }
    };

    let description = record
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let parameters = SCHEMA_KEYS
        .iter()
        .find_map(|key| record.get(*key).filter(|v| !v.is_null()))
        .cloned()
        .unwrap_or_else(|| json!({}));

    let tags = record
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let version = match record.get("version") {
        Some(Value::String(v)) if !v.is_empty() => v.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => DEFAULT_TOOL_VERSION.to_string(),
    };

    Some(
        ToolDefinition::new(name, &server.name, &server.base_url)
            .with_description(description)
            .with_parameters(parameters)
            .with_tags(tags)
            .with_version(version),
    )
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub struct Discovery {
    directory: Arc<ServerDirectory>,
    catalog: Arc<ToolCatalog>,
    transport: Arc<dyn Transport>,
    events: Arc<EventBus>,
    metrics: Arc<RegistryMetrics>,
    /// Serializes preview, announcement and commit of discovered tool sets.
    publishing: Mutex<()>,
}

impl Discovery {
    pub fn new(
        directory: Arc<ServerDirectory>,
        catalog: Arc<ToolCatalog>,
        transport: Arc<dyn Transport>,
        events: Arc<EventBus>,
        metrics: Arc<RegistryMetrics>,
    ) -> Self {
        Self {
            directory,
            catalog,
            transport,
            events,
            metrics,
            publishing: Mutex::new(()),
        }
    }

    /// Refresh the catalog entries of one server.
    ///
    /// Returns the server's tools, or an empty list when the server is unknown,
    /// disabled or unreachable. On failure the previously discovered tools are
    /// left in place and health status is not touched.
    pub async fn discover(&self, server_name: &str) -> Vec<ToolDefinition> {
        let Some(config) = self.directory.config(server_name) else {
            warn!("Cannot discover tools: server '{}' not found", server_name);
            return Vec::new();
        };
        if !config.enabled {
            debug!("Skipping discovery for disabled server '{}'", server_name);
            return Vec::new();
        }
        self.discover_server(config).await
    }

    /// Discover every enabled server concurrently.
    pub async fn discover_all(&self) -> HashMap<String, Vec<ToolDefinition>> {
        let tasks = self
            .directory
            .enabled_servers()
            .into_iter()
            .map(|config| async move {
                let name = config.name.clone();
                let tools = self.discover_server(config).await;
                (name, tools)
            });
        let results: HashMap<String, Vec<ToolDefinition>> =
            join_all(tasks).await.into_iter().collect();

        let total: usize = results.values().map(Vec::len).sum();
        info!(
            "Discovered {} tools across {} servers",
            total,
            results.len()
        );
        results
    }

    async fn discover_server(&self, config: Arc<ServerConfig>) -> Vec<ToolDefinition> {
        let tools = match self.fetch_tools(&config).await {
            Ok(tools) => tools,
            Err(e) => {
                self.metrics.record_discovery(false);
                warn!("Failed to discover tools from '{}': {}", config.name, e);
                return Vec::new();
            }
        };
        self.metrics.record_discovery(true);
        self.publish(&config, tools)
    }

    /// Announce and commit a discovered tool set.
    ///
    /// `ToolRegistered` events are delivered before the new definitions become
    /// resolvable, so no `ToolCalled` for a tool can precede its registration.
    fn publish(
        &self,
        config: &Arc<ServerConfig>,
        tools: Vec<ToolDefinition>,
    ) -> Vec<ToolDefinition> {
        let batch = ToolBatch::new(&config.name, tools);
        let _publishing = self.publishing.lock();

        if !self.directory.is_current(config) {
            debug!(
                "Server '{}' was removed or replaced during discovery, dropping results",
                config.name
            );
            return Vec::new();
        }

        let planned = self.catalog.preview(&batch);
        for tool in &planned.registered {
            self.events.emit(&RegistryEvent::ToolRegistered(tool.clone()));
        }

        let Some(update) = self
            .catalog
            .commit_if(batch, || self.directory.is_current(config))
        else {
            debug!(
                "Server '{}' was removed or replaced while publishing, dropping results",
                config.name
            );
            return Vec::new();
        };

        self.directory
            .set_tools(&config.name, self.catalog.server_tool_names(&config.name));
        info!(
            "Discovered {} tools from '{}'",
            update.current.len(),
            config.name
        );
        if !update.removed.is_empty() {
            debug!(
                "Server '{}' no longer provides: {:?}",
                config.name, update.removed
            );
        }

        self.catalog
            .list_tools(&ToolFilter::new().server(&config.name))
    }

    async fn fetch_tools(&self, config: &ServerConfig) -> RegistryResult<Vec<ToolDefinition>> {
        let url = config.endpoint_url(LIST_TOOLS_PATH);
        let response = self
            .transport
            .post_json(&url, &json!({}), config.timeout)
            .await?;

        if !response.status.is_success() {
            return Err(RegistryError::InvalidResponse(format!(
                "HTTP {}: {}",
                response.status.as_u16(),
                response.body_snippet()
            )));
        }

        let records = normalize_tool_records(response.json()?)?;
        Ok(records
            .iter()
            .filter_map(|record| parse_tool_record(record, config))
            .collect())
    }
}
