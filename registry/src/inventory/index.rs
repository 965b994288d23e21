//! Qualified tool index with multi-key lookup.
//!
//! Provides three indices over the same set of tools:
//! - By qualified name (server + tool)
//! - By simple name (every provider, most recently discovered last)
//! - By server (for bulk replacement)
//!
//! All indices sit behind one lock so a server's tool set is swapped in a
//! single step and readers never observe a half-replaced server.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::types::{QualifiedToolName, ToolDefinition, ToolFilter};

#[derive(Default)]
struct CatalogState {
    tools_by_qualified: HashMap<QualifiedToolName, ToolDefinition>,
    tools_by_simple_name: HashMap<String, Vec<QualifiedToolName>>,
    tools_by_server: HashMap<String, BTreeSet<String>>,
}

impl CatalogState {
    fn insert(&mut self, tool: ToolDefinition) {
        let qualified = tool.qualified_name();

        let providers = self
            .tools_by_simple_name
            .entry(tool.name.clone())
            .or_default();
        providers.retain(|q| q != &qualified);
        if !providers.is_empty() {
            let others: Vec<&str> = providers.iter().map(|q| q.server_name()).collect();
            warn!(
                "Tool name collision: '{}' also provided by {:?}, '{}' is now primary",
                tool.name, others, tool.server_name
            );
        }
        providers.push(qualified.clone());

        self.tools_by_server
            .entry(tool.server_name.clone())
            .or_default()
            .insert(tool.name.clone());

        self.tools_by_qualified.insert(qualified, tool);
    }

    fn remove(&mut self, qualified: &QualifiedToolName) -> Option<ToolDefinition> {
        let removed = self.tools_by_qualified.remove(qualified)?;

        if let Some(providers) = self.tools_by_simple_name.get_mut(qualified.tool_name()) {
            providers.retain(|q| q != qualified);
            if providers.is_empty() {
                self.tools_by_simple_name.remove(qualified.tool_name());
            }
        }
        if let Some(names) = self.tools_by_server.get_mut(qualified.server_name()) {
            names.remove(qualified.tool_name());
            if names.is_empty() {
                self.tools_by_server.remove(qualified.server_name());
            }
        }
        Some(removed)
    }

    fn remove_server(&mut self, server_name: &str) -> Vec<ToolDefinition> {
        let names: Vec<String> = self
            .tools_by_server
            .get(server_name)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default();
        names
            .into_iter()
            .filter_map(|name| self.remove(&QualifiedToolName::new(server_name, name)))
            .collect()
    }

    fn primary(&self, tool_name: &str) -> Option<&ToolDefinition> {
        let qualified = self.tools_by_simple_name.get(tool_name)?.last()?;
        self.tools_by_qualified.get(qualified)
    }
}

/// Result of replacing one server's tools.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogUpdate {
    /// Definitions that are new or differ from the previous discovery.
    pub registered: Vec<ToolDefinition>,
    /// Names the server no longer provides.
    pub removed: Vec<String>,
    /// Names the server provides after the update.
    pub current: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogCounts {
    /// Stored definitions, counting each provider of a shared name.
    pub definitions: usize,
    /// Distinct tool names.
    pub names: usize,
    pub servers: usize,
}

/// One server's tool set, filtered to that server and deduplicated by name.
#[derive(Debug, Clone)]
pub struct ToolBatch {
    server_name: String,
    tools: Vec<ToolDefinition>,
}

impl ToolBatch {
    /// Tools whose `server_name` does not match are dropped. Duplicate names
    /// keep the last definition.
    pub fn new(server_name: &str, tools: Vec<ToolDefinition>) -> Self {
        let mut batch: Vec<ToolDefinition> = Vec::with_capacity(tools.len());
        let mut positions: HashMap<String, usize> = HashMap::new();
        for tool in tools {
            if tool.server_name != server_name {
                warn!(
                    "Ignoring tool '{}' owned by '{}' while replacing tools of '{}'",
                    tool.name, tool.server_name, server_name
                );
                continue;
            }
            match positions.get(&tool.name) {
                Some(&idx) => {
                    warn!(
                        "Server '{}' listed tool '{}' more than once, keeping the last definition",
                        server_name, tool.name
                    );
                    batch[idx] = tool;
                }
                None => {
                    positions.insert(tool.name.clone(), batch.len());
                    batch.push(tool);
                }
            }
        }
        Self {
            server_name: server_name.to_string(),
            tools: batch,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|tool| tool.name == name)
    }
}

#[derive(Default)]
pub struct ToolCatalog {
    state: RwLock<CatalogState>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every tool owned by `server_name` with `tools`.
    ///
    /// Tools whose `server_name` does not match are ignored. Duplicate names in
    /// `tools` keep the last definition.
    pub fn replace_server_tools(
        &self,
        server_name: &str,
        tools: Vec<ToolDefinition>,
    ) -> CatalogUpdate {
        self.commit_if(ToolBatch::new(server_name, tools), || true)
            .unwrap_or_default()
    }

    /// Changes that committing `batch` would make, without making them.
    pub fn preview(&self, batch: &ToolBatch) -> CatalogUpdate {
        let state = self.state.read();
        let mut update = CatalogUpdate::default();
        for tool in &batch.tools {
            let qualified = tool.qualified_name();
            if state.tools_by_qualified.get(&qualified) != Some(tool) {
                update.registered.push(tool.clone());
            }
            update.current.push(tool.name.clone());
        }
        if let Some(previous) = state.tools_by_server.get(&batch.server_name) {
            update.removed = previous
                .iter()
                .filter(|name| !batch.contains(name))
                .cloned()
                .collect();
        }
        update
    }

    /// Swap in `batch` as its server's tool set if `precondition` holds.
    ///
    /// `precondition` runs under the catalog write lock, so a server removed
    /// before the check can never have its tools resurrected.
    pub fn commit_if<F>(&self, batch: ToolBatch, precondition: F) -> Option<CatalogUpdate>
    where
        F: FnOnce() -> bool,
    {
        let ToolBatch { server_name, tools } = batch;
        let mut state = self.state.write();
        if !precondition() {
            return None;
        }
        let mut previous: HashMap<String, ToolDefinition> = state
            .remove_server(&server_name)
            .into_iter()
            .map(|tool| (tool.name.clone(), tool))
            .collect();

        let mut update = CatalogUpdate::default();
        for tool in tools {
            if previous.remove(&tool.name).as_ref() != Some(&tool) {
                update.registered.push(tool.clone());
            }
            update.current.push(tool.name.clone());
            state.insert(tool);
        }
        update.removed = previous.into_keys().collect();
        update.removed.sort();
        drop(state);

        debug!(
            "Replaced tools of '{}': {} current, {} new or changed, {} removed",
            server_name,
            update.current.len(),
            update.registered.len(),
            update.removed.len()
        );
        Some(update)
    }

    /// Remove all tools owned by a server and return their names.
    pub fn clear_server_tools(&self, server_name: &str) -> Vec<String> {
        self.state
            .write()
            .remove_server(server_name)
            .into_iter()
            .map(|tool| tool.name)
            .collect()
    }

    /// Primary definition for a tool name (the most recently discovered provider).
    pub fn get_tool(&self, tool_name: &str) -> Option<ToolDefinition> {
        self.state.read().primary(tool_name).cloned()
    }

    pub fn get_tool_qualified(&self, server_name: &str, tool_name: &str) -> Option<ToolDefinition> {
        let qualified = QualifiedToolName::new(server_name, tool_name);
        self.state.read().tools_by_qualified.get(&qualified).cloned()
    }

    pub fn has_tool(&self, tool_name: &str) -> bool {
        self.state.read().tools_by_simple_name.contains_key(tool_name)
    }

    /// All servers providing a tool name, primary last.
    pub fn tool_servers(&self, tool_name: &str) -> Vec<String> {
        self.state
            .read()
            .tools_by_simple_name
            .get(tool_name)
            .map(|providers| {
                providers
                    .iter()
                    .map(|q| q.server_name().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sorted names of the tools a server provides.
    pub fn server_tool_names(&self, server_name: &str) -> Vec<String> {
        self.state
            .read()
            .tools_by_server
            .get(server_name)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// List tools matching `filter`, sorted by name then server.
    pub fn list_tools(&self, filter: &ToolFilter) -> Vec<ToolDefinition> {
        let state = self.state.read();
        let mut tools: Vec<ToolDefinition> = match &filter.server {
            Some(server_name) => state
                .tools_by_server
                .get(server_name)
                .into_iter()
                .flatten()
                .filter_map(|name| {
                    state
                        .tools_by_qualified
                        .get(&QualifiedToolName::new(server_name, name))
                })
                .filter(|tool| filter.matches_tags(tool))
                .cloned()
                .collect(),
            None => state
                .tools_by_simple_name
                .keys()
                .filter_map(|name| state.primary(name))
                .filter(|tool| filter.matches_tags(tool))
                .cloned()
                .collect(),
        };
        drop(state);

        tools.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.server_name.cmp(&b.server_name))
        });
        tools
    }

    pub fn counts(&self) -> CatalogCounts {
        let state = self.state.read();
        CatalogCounts {
            definitions: state.tools_by_qualified.len(),
            names: state.tools_by_simple_name.len(),
            servers: state.tools_by_server.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().tools_by_qualified.is_empty()
    }

    pub fn clear_all(&self) {
        *self.state.write() = CatalogState::default();
    }
}
