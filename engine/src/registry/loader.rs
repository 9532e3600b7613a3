//! Capability loader trait
//!
//! A loader turns one source file into a [`ToolSet`]. The registry picks the
//! loader by file extension and runs it on the blocking pool.

use sdk::errors::EngineError;
use sdk::types::ToolSet;
use std::any::Any;
use std::path::Path;

/// Result of loading one capability source
pub struct LoadedCapability {
    pub tools: ToolSet,

    /// Resource that must outlive every handler of `tools` (e.g. the shared
    /// library the handlers' code lives in)
    pub keepalive: Option<Box<dyn Any + Send + Sync>>,
}

impl LoadedCapability {
    pub fn new(tools: ToolSet) -> Self {
        Self {
            tools,
            keepalive: None,
        }
    }

    pub fn with_keepalive(tools: ToolSet, keepalive: impl Any + Send + Sync) -> Self {
        Self {
            tools,
            keepalive: Some(Box::new(keepalive)),
        }
    }
}

/// Loads capability modules of one source kind
pub trait CapabilityLoader: Send + Sync {
    /// Short label used in logs
    fn kind(&self) -> &str;

    /// File extension (without dot) claimed by this loader
    fn extension(&self) -> &str;

    /// Module name for a source path. Defaults to the file stem.
    fn module_name(&self, path: &Path) -> Option<String> {
        path.file_stem()
            .and_then(|stem| stem.to_str())
            .map(String::from)
    }

    /// Execute the source and obtain its tool mapping
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read, executed, or does not
    /// expose the expected entry point.
    fn load(&self, name: &str, path: &Path) -> Result<LoadedCapability, EngineError>;
}
