//! opsagent SDK
//!
//! Shared library providing the capability-provider contract. This crate is
//! used by the engine and by capability modules (native libraries).

/// Error types and handling
pub mod errors;

/// Tool input/output types and the capability provider contract
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, EngineErrorExt};
pub use types::{
    qualified_name, AsyncTool, BlockingTool, RegisterToolsFn, ToolError, ToolHandler, ToolInput,
    ToolOutput, ToolSchema, ToolSet, REGISTER_TOOLS_SYMBOL, TOOL_NAME_SEPARATOR,
};
