//! Capability Registry
//!
//! Discovers capability modules in a directory, loads, unloads and
//! hot-reloads them, and exposes the tool catalog plus a dispatch operation.
//!
//! # Concurrency
//!
//! The module table sits behind an async `RwLock`: catalog reads and dispatch
//! lookups run concurrently. Every mutation (load, unload, reload, check
//! cycle) is serialized by a separate mutex, so table swaps are atomic.
//! Dispatch clones the module's `Arc` under the read lock and invokes the tool
//! after releasing it; a call that started against one module version
//! completes against that version even if a reload swaps the entry meanwhile.
//!
//! # Examples
//!
//! ```no_run
//! use opsagent_engine::registry::CapabilityRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = CapabilityRegistry::new("/opt/opsagent/capabilities", "_")
//!     .with_default_loaders();
//! registry.load_all().await;
//!
//! let listing = registry
//!     .dispatch("shell_execute", serde_json::json!({"command": "ls /tmp"}))
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod hot_reload;
mod loader;
mod module;
mod native;
mod wasm;

pub use hot_reload::HotReloader;
pub use loader::{CapabilityLoader, LoadedCapability};
pub use module::{CapabilityModule, ModuleInfo};
pub use native::NativeLoader;
pub use wasm::WasmLoader;

use crate::config::CapabilitiesConfig;
use sdk::errors::EngineError;
use sdk::types::{ToolError, ToolHandler, ToolInput, ToolSchema, TOOL_NAME_SEPARATOR};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// A module whose last load attempt failed
#[derive(Debug, Clone)]
struct FailedLoad {
    source: PathBuf,
    modified: Option<SystemTime>,
    error: String,
}

#[derive(Default)]
struct ModuleTable {
    /// Insertion order of `modules`
    order: Vec<String>,
    modules: HashMap<String, Arc<CapabilityModule>>,
    failed: HashMap<String, FailedLoad>,
}

impl ModuleTable {
    /// Insert or replace in place, keeping the original position
    fn install(&mut self, module: CapabilityModule) {
        let name = module.name().to_string();
        self.failed.remove(&name);
        if self.modules.insert(name.clone(), Arc::new(module)).is_none() {
            self.order.push(name);
        }
    }

    fn remove(&mut self, name: &str) -> bool {
        if self.modules.remove(name).is_some() {
            self.order.retain(|n| n != name);
            true
        } else {
            false
        }
    }

    fn ordered(&self) -> impl Iterator<Item = &Arc<CapabilityModule>> {
        self.order.iter().filter_map(|name| self.modules.get(name))
    }
}

/// A discovered module source and the loader that claims it
#[derive(Clone)]
struct Candidate {
    source: PathBuf,
    loader: Arc<dyn CapabilityLoader>,
}

/// Registry of loaded capability modules
pub struct CapabilityRegistry {
    dir: PathBuf,
    exclude_prefix: String,
    loaders: Vec<Arc<dyn CapabilityLoader>>,
    table: RwLock<ModuleTable>,
    mutation: Mutex<()>,
}

impl CapabilityRegistry {
    /// Create an empty registry scanning `dir`. No loaders are registered yet.
    pub fn new(dir: impl Into<PathBuf>, exclude_prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            exclude_prefix: exclude_prefix.into(),
            loaders: Vec::new(),
            table: RwLock::new(ModuleTable::default()),
            mutation: Mutex::new(()),
        }
    }

    /// Create a registry with the native and WASM loaders
    pub fn from_config(config: &CapabilitiesConfig) -> Self {
        Self::new(&config.dir, &config.exclude_prefix).with_default_loaders()
    }

    /// Register a loader. Later loaders do not override an extension already
    /// claimed by an earlier one.
    pub fn with_loader(mut self, loader: impl CapabilityLoader + 'static) -> Self {
        self.loaders.push(Arc::new(loader));
        self
    }

    pub fn with_default_loaders(self) -> Self {
        self.with_loader(NativeLoader::new())
            .with_loader(WasmLoader::new())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn loader_for(&self, path: &Path) -> Option<&Arc<dyn CapabilityLoader>> {
        let ext = path.extension()?.to_str()?;
        self.loaders.iter().find(|l| l.extension() == ext)
    }

    /// Scan the directory for eligible sources, keyed by module name
    fn scan(&self) -> BTreeMap<String, Candidate> {
        let mut found = BTreeMap::new();

        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Capability directory {} unreadable: {}", self.dir.display(), e);
                return found;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(loader) = self.loader_for(&path) else {
                continue;
            };
            let Some(name) = loader.module_name(&path) else {
                continue;
            };
            if !self.exclude_prefix.is_empty() && name.starts_with(&self.exclude_prefix) {
                continue;
            }
            if name.contains(TOOL_NAME_SEPARATOR) {
                // Dispatch splits at the first separator, so tools of this
                // module could never be reached.
                warn!(
                    "Skipping capability '{}' at {}: module names must not contain '{}'",
                    name,
                    path.display(),
                    TOOL_NAME_SEPARATOR
                );
                continue;
            }
            if found.contains_key(&name) {
                warn!("Duplicate capability module '{}' at {}", name, path.display());
                continue;
            }
            found.insert(
                name,
                Candidate {
                    source: path,
                    loader: Arc::clone(loader),
                },
            );
        }

        found
    }

    /// Names of every eligible module source in the directory, sorted
    pub fn discover(&self) -> Vec<String> {
        self.scan().into_keys().collect()
    }

    /// Run the loader for `name` off the async scheduler
    async fn build(&self, name: &str, candidate: &Candidate) -> Result<CapabilityModule, EngineError> {
        let modified = std::fs::metadata(&candidate.source)
            .and_then(|m| m.modified())
            .map_err(|e| EngineError::CapabilityLoad {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        let loader = Arc::clone(&candidate.loader);
        let module_name = name.to_string();
        let source = candidate.source.clone();

        let loaded = tokio::task::spawn_blocking(move || loader.load(&module_name, &source))
            .await
            .map_err(|e| EngineError::CapabilityLoad {
                name: name.to_string(),
                reason: format!("loader task failed: {}", e),
            })?
            .map_err(|e| match e {
                EngineError::CapabilityLoad { .. } => e,
                other => EngineError::CapabilityLoad {
                    name: name.to_string(),
                    reason: other.to_string(),
                },
            })?;

        Ok(CapabilityModule::new(
            name,
            &candidate.source,
            modified,
            loaded,
        ))
    }

    /// Build and install `name` from `candidate`. Caller holds the mutation lock.
    async fn install(&self, name: &str, candidate: &Candidate) -> Result<(), EngineError> {
        match self.build(name, candidate).await {
            Ok(module) => {
                let tools = module.tool_names().len();
                self.table.write().await.install(module);
                info!(
                    "Capability '{}' loaded ({}, {} tools)",
                    name,
                    candidate.loader.kind(),
                    tools
                );
                Ok(())
            }
            Err(e) => {
                error!("Capability '{}' failed to load: {}", name, e);
                let modified = std::fs::metadata(&candidate.source)
                    .and_then(|m| m.modified())
                    .ok();
                let mut table = self.table.write().await;
                table.remove(name);
                table.failed.insert(
                    name.to_string(),
                    FailedLoad {
                        source: candidate.source.clone(),
                        modified,
                        error: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    /// Load one module by name.
    ///
    /// Loading an already loaded module replaces it with a fresh instance.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::CapabilityNotFound` if no eligible source exists
    /// and `EngineError::CapabilityLoad` if the loader fails. Other modules
    /// are unaffected either way.
    pub async fn load(&self, name: &str) -> Result<(), EngineError> {
        let _guard = self.mutation.lock().await;
        let candidate = self
            .scan()
            .remove(name)
            .ok_or_else(|| EngineError::CapabilityNotFound(name.to_string()))?;
        self.install(name, &candidate).await
    }

    /// Load every discovered module, returning the names that loaded
    pub async fn load_all(&self) -> Vec<String> {
        let _guard = self.mutation.lock().await;
        let mut loaded = Vec::new();
        for (name, candidate) in self.scan() {
            if self.install(&name, &candidate).await.is_ok() {
                loaded.push(name);
            }
        }
        loaded
    }

    /// Remove a module. Returns whether anything was removed.
    pub async fn unload(&self, name: &str) -> bool {
        let _guard = self.mutation.lock().await;
        let mut table = self.table.write().await;
        table.failed.remove(name);
        let removed = table.remove(name);
        if removed {
            info!("Capability '{}' unloaded", name);
        } else {
            debug!("Capability '{}' not loaded, nothing to unload", name);
        }
        removed
    }

    /// Replace a module with a freshly loaded instance.
    ///
    /// The new instance is built before the swap; in-flight dispatches keep
    /// using the old one. If building fails the module ends up unloaded.
    pub async fn reload(&self, name: &str) -> Result<(), EngineError> {
        let _guard = self.mutation.lock().await;
        match self.scan().remove(name) {
            Some(candidate) => self.install(name, &candidate).await,
            None => {
                self.table.write().await.remove(name);
                Err(EngineError::CapabilityNotFound(name.to_string()))
            }
        }
    }

    /// Whether the source of a loaded module changed since it was loaded.
    /// Unknown modules and unreadable sources report `false`.
    pub async fn is_modified(&self, name: &str) -> bool {
        let module = match self.table.read().await.modules.get(name) {
            Some(module) => Arc::clone(module),
            None => return false,
        };
        source_modified(module.source())
            .map(|current| current != module.modified())
            .unwrap_or(false)
    }

    /// One hot-reload cycle.
    ///
    /// Reloads loaded modules whose source changed, loads discovered modules
    /// that are not loaded yet, and unloads modules whose source is gone. A
    /// module that failed to load is retried only after its source changes.
    /// Returns the names that were (re)loaded.
    pub async fn check_and_reload_modified(&self) -> Vec<String> {
        let _guard = self.mutation.lock().await;
        let candidates = self.scan();

        let (loaded, failed): (Vec<(String, PathBuf, SystemTime)>, HashMap<String, FailedLoad>) = {
            let table = self.table.read().await;
            (
                table
                    .ordered()
                    .map(|m| (m.name().to_string(), m.source().to_path_buf(), m.modified()))
                    .collect(),
                table.failed.clone(),
            )
        };

        {
            let mut table = self.table.write().await;
            for (name, _, _) in &loaded {
                if !candidates.contains_key(name) && table.remove(name) {
                    info!("Capability '{}' source disappeared, unloaded", name);
                }
            }
            table.failed.retain(|name, _| candidates.contains_key(name));
        }

        let mut changed = Vec::new();
        for (name, candidate) in &candidates {
            let current = source_modified(&candidate.source);

            let needs_load = match loaded.iter().find(|(n, _, _)| n == name) {
                Some((_, source, recorded)) => {
                    source != &candidate.source || current.map_or(false, |c| c != *recorded)
                }
                None => match failed.get(name) {
                    Some(prev) => prev.source != candidate.source || prev.modified != current,
                    None => true,
                },
            };

            if !needs_load {
                continue;
            }

            debug!("Capability '{}' changed, loading", name);
            if self.install(name, candidate).await.is_ok() {
                changed.push(name.clone());
            }
        }

        if !changed.is_empty() {
            info!("Hot reload applied: {:?}", changed);
        }
        changed
    }

    /// Invoke a tool by its fully-qualified name.
    ///
    /// The name is split at the first separator: `mysql_run_query` calls
    /// function `run_query` of module `mysql`. Blocking handlers run on the
    /// blocking thread pool.
    ///
    /// # Errors
    ///
    /// - `EngineError::InvalidToolName` if the name has no separator
    /// - `EngineError::CapabilityNotFound` if the module is not loaded
    /// - `EngineError::ToolNotFound` if the module lacks the function
    /// - `EngineError::ToolError` if the tool itself fails
    pub async fn dispatch(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, EngineError> {
        let (module_name, function) = tool_name
            .split_once(TOOL_NAME_SEPARATOR)
            .filter(|(m, f)| !m.is_empty() && !f.is_empty())
            .ok_or_else(|| EngineError::InvalidToolName(tool_name.to_string()))?;

        let module = self
            .table
            .read()
            .await
            .modules
            .get(module_name)
            .map(Arc::clone)
            .ok_or_else(|| EngineError::CapabilityNotFound(module_name.to_string()))?;

        let handler = module
            .tool(function)
            .cloned()
            .ok_or_else(|| EngineError::ToolNotFound {
                module: module_name.to_string(),
                function: function.to_string(),
            })?;

        debug!("Dispatching {}", tool_name);
        let input = ToolInput::from_arguments(function, arguments);

        let result = match handler {
            ToolHandler::Async(tool) => tool.call(input).await,
            ToolHandler::Blocking(tool) => {
                // The module Arc travels with the call so its library outlives
                // it. The handler goes first: its drop glue may live in that
                // library, and the call can outlast a timed-out dispatch.
                let pinned = Arc::clone(&module);
                tokio::task::spawn_blocking(move || {
                    let output = tool(input);
                    drop(tool);
                    drop(pinned);
                    output
                })
                .await
                .unwrap_or_else(|e| Err(ToolError::Failed(format!("tool task failed: {}", e))))
            }
        };
        drop(module);

        result.map_err(|e| {
            warn!("Tool {} failed: {}", tool_name, e);
            EngineError::from(e)
        })
    }

    /// Schema entries of every loaded module, in insertion order
    pub async fn catalog(&self) -> Vec<ToolSchema> {
        self.table
            .read()
            .await
            .ordered()
            .flat_map(|module| module.catalog().collect::<Vec<_>>())
            .collect()
    }

    /// Loaded modules in insertion order, followed by failed ones
    pub async fn list(&self) -> Vec<ModuleInfo> {
        let table = self.table.read().await;
        let mut infos: Vec<ModuleInfo> = table
            .ordered()
            .map(|module| ModuleInfo {
                name: module.name().to_string(),
                source: module.source().to_path_buf(),
                loaded: true,
                tools: module.tool_names(),
                error: None,
            })
            .collect();

        let mut failed: Vec<_> = table.failed.iter().collect();
        failed.sort_by(|a, b| a.0.cmp(b.0));
        infos.extend(failed.into_iter().map(|(name, f)| ModuleInfo {
            name: name.clone(),
            source: f.source.clone(),
            loaded: false,
            tools: Vec::new(),
            error: Some(f.error.clone()),
        }));
        infos
    }

    /// Whether `name` is currently loaded
    pub async fn is_loaded(&self, name: &str) -> bool {
        self.table.read().await.modules.contains_key(name)
    }
}

fn source_modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
