//! WASM capability loader
//!
//! Loads capability modules compiled to WebAssembly via the Extism runtime.
//! A module exports:
//!
//! - `describe` returning `{"functions": [{"name", "description", "parameters"}]}`
//! - one export per advertised function, taking the JSON argument object and
//!   returning a JSON document
//!
//! Extism plugin calls are synchronous and need exclusive access, so every
//! function becomes a blocking handler sharing the plugin behind a mutex.

use super::loader::{CapabilityLoader, LoadedCapability};
use extism::{Manifest as ExtismManifest, Plugin, Wasm};
use sdk::errors::EngineError;
use sdk::types::{ToolError, ToolHandler, ToolSchema, ToolSet};
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Export every WASM capability module must provide
pub const DESCRIBE_EXPORT: &str = "describe";

#[derive(Debug, Deserialize)]
struct Description {
    #[serde(default)]
    functions: Vec<ToolSchema>,
}

/// Loader for Extism WASM capability modules
#[derive(Debug, Default)]
pub struct WasmLoader;

impl WasmLoader {
    pub fn new() -> Self {
        Self
    }
}

impl CapabilityLoader for WasmLoader {
    fn kind(&self) -> &str {
        "wasm"
    }

    fn extension(&self) -> &str {
        "wasm"
    }

    fn load(&self, name: &str, path: &Path) -> Result<LoadedCapability, EngineError> {
        let wasm_bytes = std::fs::read(path).map_err(|e| {
            tracing::error!("Failed to read WASM file {}: {}", path.display(), e);
            EngineError::Plugin(format!("Failed to read WASM file: {}", e))
        })?;

        let extism_manifest = ExtismManifest::new([Wasm::data(wasm_bytes)]);
        let mut plugin = Plugin::new(&extism_manifest, [], true).map_err(|e| {
            tracing::error!("Failed to create Extism plugin for '{}': {}", name, e);
            EngineError::Plugin(format!("Failed to create plugin: {}", e))
        })?;

        let raw = plugin
            .call::<&str, String>(DESCRIBE_EXPORT, "")
            .map_err(|e| EngineError::Plugin(format!("'{}' export failed: {}", DESCRIBE_EXPORT, e)))?;
        let description: Description = serde_json::from_str(&raw)
            .map_err(|e| EngineError::Plugin(format!("Invalid description: {}", e)))?;

        let plugin = Arc::new(Mutex::new(plugin));
        let mut tools = ToolSet::new();

        for schema in description.functions {
            let export = schema.name.clone();
            let shared = Arc::clone(&plugin);
            let handler = ToolHandler::blocking(move |input| {
                let arguments = serde_json::to_string(&input.to_arguments())
                    .map_err(|e| ToolError::InvalidParameter(e.to_string()))?;
                let mut guard = shared
                    .lock()
                    .map_err(|_| ToolError::Failed("plugin state poisoned".to_string()))?;
                let output = guard
                    .call::<&str, String>(&export, &arguments)
                    .map_err(|e| ToolError::Failed(e.to_string()))?;
                Ok(serde_json::from_str(&output).unwrap_or(serde_json::Value::String(output)))
            });
            tools = tools.with_tool(schema.name.clone(), handler).with_schema(schema);
        }

        tracing::debug!("WASM capability '{}' exposes {} tools", name, tools.len());
        Ok(LoadedCapability::new(tools))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_parsing() {
        let description: Description = serde_json::from_str(
            r#"{"functions":[{"name":"query","description":"Run a query"}]}"#,
        )
        .unwrap();
        assert_eq!(description.functions.len(), 1);
        assert_eq!(description.functions[0].name, "query");
        assert_eq!(description.functions[0].parameters["type"], "object");
    }

    #[test]
    fn test_invalid_module_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.wasm");
        std::fs::write(&path, b"\0asm garbage").unwrap();

        let result = WasmLoader::new().load("broken", &path);
        assert!(matches!(result, Err(EngineError::Plugin(_))));
    }
}
