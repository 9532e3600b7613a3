//! Error types and handling
//!
//! This module provides the error types shared by the engine and capability
//! modules. All errors implement the `EngineErrorExt` trait which provides
//! user-friendly hints and indicates whether errors are recoverable.
//!
//! # Security
//!
//! User hints are static strings: they never echo secrets, arguments or
//! file system paths back to the caller.

use thiserror::Error;

/// Trait for engine error extensions
///
/// Provides additional context for errors, including user-friendly hints and
/// recoverability information.
pub trait EngineErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors leave the engine usable: the conversation or the
    /// registry keeps operating and the caller may retry or adapt.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, EngineErrorExt};
///
/// let error = EngineError::CapabilityNotFound("shell".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::SymbolNotFound("register_tools".to_string());
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Capability module errors
    #[error("Failed to load capability '{name}': {reason}")]
    CapabilityLoad { name: String, reason: String },

    #[error("Capability not found: {0}")]
    CapabilityNotFound(String),

    #[error("Invalid tool name: {0}")]
    InvalidToolName(String),

    // Tool errors
    #[error("Tool not found: {module}_{function}")]
    ToolNotFound { module: String, function: String },

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Tool call timed out after {0}s")]
    ToolTimeout(u64),

    // Plugin runtime errors
    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Library load failed: {0}")]
    LibraryLoadFailed(String),

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<crate::types::ToolError> for EngineError {
    fn from(err: crate::types::ToolError) -> Self {
        Self::ToolError(err.to_string())
    }
}

impl EngineErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",

            Self::CapabilityLoad { .. } => {
                "Capability module failed to load. Check the module file and logs"
            }
            Self::CapabilityNotFound(_) => "The requested capability module is not loaded",
            Self::InvalidToolName(_) => "Tool names must look like <module>_<function>",

            Self::ToolNotFound { .. } => "The requested tool is not available",
            Self::ToolError(_) => "Tool operation failed",
            Self::ToolTimeout(_) => "Tool took too long to respond. Try a narrower request",

            Self::Plugin(_) => "Plugin execution failed. Check plugin logs",
            Self::LibraryLoadFailed(_) => "Failed to load capability library",
            Self::SymbolNotFound(_) => "Capability library is incompatible",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Config(_) | Self::LibraryLoadFailed(_) | Self::SymbolNotFound(_)
        )
    }
}
