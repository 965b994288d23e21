//! Tool catalog and indexing.
//!
//! Tools are stored under their qualified `server:tool` name so that servers
//! exposing the same tool name do not overwrite each other. Unqualified lookups
//! resolve to the most recently discovered provider.

pub mod index;
pub mod types;

pub use index::{CatalogCounts, CatalogUpdate, ToolBatch, ToolCatalog};
pub use types::{QualifiedToolName, ToolDefinition, ToolFilter, DEFAULT_TOOL_VERSION};
