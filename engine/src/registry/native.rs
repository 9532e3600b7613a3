//! Native capability loader
//!
//! Loads capability modules compiled as shared libraries (.so/.dylib/.dll).
//! A library must export the entry point generated by
//! `sdk::declare_capability!`:
//!
//! ```ignore
//! #[no_mangle]
//! pub extern "C" fn register_tools() -> *mut sdk::ToolSet;
//! ```
//!
//! The `ToolSet` crosses the library boundary as a Rust value, so modules
//! must be built with the same toolchain and `sdk` version as the engine.
//!
//! # Reloading
//!
//! The platform loader caches libraries by path, so reopening a rebuilt file
//! at the same path would return the old code. Every load therefore copies
//! the library to a unique temporary path first and opens the copy.

use super::loader::{CapabilityLoader, LoadedCapability};
use sdk::errors::EngineError;
use sdk::types::{RegisterToolsFn, REGISTER_TOOLS_SYMBOL};
use std::env::consts::{DLL_EXTENSION, DLL_PREFIX};
use std::path::{Path, PathBuf};

/// Loader for native shared-library capability modules
#[derive(Debug, Default)]
pub struct NativeLoader;

impl NativeLoader {
    pub fn new() -> Self {
        Self
    }

    fn staging_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "opsagent-{}-{}.{}",
            name,
            uuid::Uuid::new_v4(),
            DLL_EXTENSION
        ))
    }
}

impl CapabilityLoader for NativeLoader {
    fn kind(&self) -> &str {
        "native"
    }

    fn extension(&self) -> &str {
        DLL_EXTENSION
    }

    /// `libshell.so` becomes `shell`
    fn module_name(&self, path: &Path) -> Option<String> {
        let stem = path.file_stem()?.to_str()?;
        let name = if DLL_PREFIX.is_empty() {
            stem
        } else {
            stem.strip_prefix(DLL_PREFIX).unwrap_or(stem)
        };
        (!name.is_empty()).then(|| name.to_string())
    }

    fn load(&self, name: &str, path: &Path) -> Result<LoadedCapability, EngineError> {
        let staged = Self::staging_path(name);
        std::fs::copy(path, &staged).map_err(|e| {
            tracing::error!("Failed to stage library {}: {}", path.display(), e);
            EngineError::LibraryLoadFailed(format!("failed to stage library: {}", e))
        })?;

        let result = open_library(name, &staged);

        // The mapping stays valid after unlink on unix; elsewhere the file is
        // still in use and removal fails harmlessly.
        if let Err(e) = std::fs::remove_file(&staged) {
            tracing::debug!("Could not remove staged library {}: {}", staged.display(), e);
        }

        result
    }
}

fn open_library(name: &str, path: &Path) -> Result<LoadedCapability, EngineError> {
    // SAFETY: loading a capability library runs its initializers; capability
    // directories are trusted by configuration.
    let lib = unsafe {
        libloading::Library::new(path).map_err(|e| {
            tracing::error!("Failed to load library {}: {}", path.display(), e);
            EngineError::LibraryLoadFailed(e.to_string())
        })?
    };

    let tools = {
        // SAFETY: the symbol type matches the signature emitted by
        // `sdk::declare_capability!`.
        let register: libloading::Symbol<RegisterToolsFn> = unsafe {
            lib.get(REGISTER_TOOLS_SYMBOL).map_err(|e| {
                tracing::error!("Symbol 'register_tools' not found in '{}': {}", name, e);
                EngineError::SymbolNotFound(e.to_string())
            })?
        };

        // SAFETY: the pointer was produced by `Box::into_raw` in the library
        // and ownership is transferred exactly once.
        unsafe {
            let ptr = register();
            if ptr.is_null() {
                tracing::error!("register_tools returned null pointer for '{}'", name);
                return Err(EngineError::LibraryLoadFailed(
                    "register_tools returned null".to_string(),
                ));
            }
            *Box::from_raw(ptr)
        }
    };

    tracing::debug!("Native capability '{}' exposes {} tools", name, tools.len());
    Ok(LoadedCapability::with_keepalive(tools, lib))
}
