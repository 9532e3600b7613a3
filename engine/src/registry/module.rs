//! Loaded capability module

use super::loader::LoadedCapability;
use sdk::types::{qualified_name, ToolHandler, ToolSchema, ToolSet};
use serde::Serialize;
use std::any::Any;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// One loaded capability module.
///
/// Instances are immutable once built: a reload builds a fresh instance and
/// swaps it into the registry table.
pub struct CapabilityModule {
    name: String,
    source: PathBuf,
    modified: SystemTime,
    tools: ToolSet,
    // Declared last: dropped after the handlers in `tools`.
    _keepalive: Option<Box<dyn Any + Send + Sync>>,
}

impl CapabilityModule {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<PathBuf>,
        modified: SystemTime,
        loaded: LoadedCapability,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            modified,
            tools: loaded.tools,
            _keepalive: loaded.keepalive,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Source modification time recorded at load
    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    pub fn tool(&self, function: &str) -> Option<&ToolHandler> {
        self.tools.tool(function)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.tool_names()
    }

    /// Advertised schema entries with fully-qualified names
    pub fn catalog(&self) -> impl Iterator<Item = ToolSchema> + '_ {
        self.tools.schemas().iter().map(|schema| ToolSchema {
            name: qualified_name(&self.name, &schema.name),
            ..schema.clone()
        })
    }
}

/// Summary of a module known to the registry
#[derive(Debug, Clone, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub source: PathBuf,
    pub loaded: bool,
    pub tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
