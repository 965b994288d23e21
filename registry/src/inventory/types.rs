//! Core types for the tool catalog.

use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_TOOL_VERSION: &str = "1.0.0";

/// Unique tool identifier: `server_name:tool_name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedToolName {
    pub server_name: String,
    pub tool_name: String,
}

impl QualifiedToolName {
    pub fn new(server_name: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            tool_name: tool_name.into(),
        }
    }

    /// Parse from "server:tool" format.
    pub fn parse(s: &str) -> Option<Self> {
        let (server, tool) = s.split_once(':')?;
        Some(Self::new(server, tool))
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }
}

impl fmt::Display for QualifiedToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.server_name, self.tool_name)
    }
}

/// A tool as advertised by its server's `list_tools` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// Parameter schema, passed through unvalidated.
    pub parameters: Value,
    pub server_name: String,
    pub server_url: String,
    pub tags: BTreeSet<String>,
    pub version: String,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        server_name: impl Into<String>,
        server_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: Value::Object(Default::default()),
            server_name: server_name.into(),
            server_url: server_url.into(),
            tags: BTreeSet::new(),
            version: DEFAULT_TOOL_VERSION.to_string(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn qualified_name(&self) -> QualifiedToolName {
        QualifiedToolName::new(&self.server_name, &self.name)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Filter for `list_tools`.
///
/// Without a server, one entry per tool name is returned (the primary
/// provider). With a server, that server's own entries are returned. A
/// non-empty tag list keeps tools carrying at least one of the tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolFilter {
    pub server: Option<String>,
    pub tags: Vec<String>,
}

impl ToolFilter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn matches_tags(&self, tool: &ToolDefinition) -> bool {
        self.tags.is_empty() || self.tags.iter().any(|tag| tool.has_tag(tag))
    }
}
