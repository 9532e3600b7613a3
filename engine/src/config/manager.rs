//! Reloadable configuration holder
//!
//! `ConfigManager` owns the current [`Config`] snapshot and the file it came
//! from. It is constructed explicitly and passed to whoever needs it.

use super::Config;
use sdk::errors::EngineError;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{error, info};

/// Callback invoked with the new snapshot after every successful reload
pub type ConfigListener = Box<dyn Fn(&Config) -> Result<(), String> + Send + Sync>;

pub struct ConfigManager {
    path: PathBuf,
    current: RwLock<Arc<Config>>,
    listeners: Mutex<Vec<ConfigListener>>,
}

impl ConfigManager {
    /// Load the configuration at `path`, creating it with defaults if absent
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let path = path.into();
        let config = Config::load_or_create_at(&path)?;
        info!("Configuration loaded: {}", path.display());
        Ok(Self::with_config(path, config))
    }

    /// Wrap an already loaded configuration
    pub fn with_config(path: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(Arc::new(config)),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current configuration snapshot
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Register a listener notified after each successful reload
    pub fn on_reload(&self, listener: ConfigListener) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Re-read and re-validate the configuration file.
    ///
    /// On success the snapshot is replaced and every listener is notified;
    /// a failing listener is logged and does not stop the others.
    ///
    /// # Errors
    ///
    /// Returns the load error and keeps the previous snapshot if the file can
    /// no longer be read or validated.
    pub fn reload(&self) -> Result<Arc<Config>, EngineError> {
        let config = Config::load_from_path(&self.path).map_err(|e| {
            error!("Configuration reload failed: {}", e);
            e
        })?;
        let config = Arc::new(config);

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&config);
        info!("Configuration reloaded: {}", self.path.display());

        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            if let Err(e) = listener(&config) {
                error!("Configuration listener failed: {}", e);
            }
        }

        Ok(config)
    }
}
