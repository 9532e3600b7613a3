//! Tool input/output types and the capability provider contract
//!
//! A capability module hands the engine a [`ToolSet`]: a mapping from function
//! name to [`ToolHandler`] plus the schema entries advertised to the model.
//! Handlers receive their keyword arguments as a [`ToolInput`] and return a
//! JSON value or a [`ToolError`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Separator between module and function in a fully-qualified tool name
pub const TOOL_NAME_SEPARATOR: char = '_';

/// Symbol a native capability library must export
pub const REGISTER_TOOLS_SYMBOL: &[u8] = b"register_tools";

/// Signature of the native `register_tools` entry point
#[allow(improper_ctypes_definitions)]
pub type RegisterToolsFn = unsafe extern "C" fn() -> *mut ToolSet;

/// Build the fully-qualified name `<module>_<function>`
pub fn qualified_name(module: &str, function: &str) -> String {
    format!("{}{}{}", module, TOOL_NAME_SEPARATOR, function)
}

/// Input to a tool function
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolInput {
    pub method: String,
    pub params: HashMap<String, serde_json::Value>,
}

impl ToolInput {
    /// Create a new ToolInput
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: HashMap::new(),
        }
    }

    /// Create a ToolInput from a JSON argument object.
    ///
    /// Non-object values yield an input without parameters.
    pub fn from_arguments(method: impl Into<String>, arguments: serde_json::Value) -> Self {
        let params = match arguments {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        Self {
            method: method.into(),
            params,
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Get a string parameter
    pub fn param_str(&self, key: &str) -> Result<String, ToolError> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
    }

    /// Get an i64 parameter
    pub fn param_i64(&self, key: &str) -> Result<i64, ToolError> {
        self.params
            .get(key)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
    }

    /// Get a bool parameter
    pub fn param_bool(&self, key: &str) -> Result<bool, ToolError> {
        self.params
            .get(key)
            .and_then(|v| v.as_bool())
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
    }

    /// Get an optional string parameter
    pub fn param_str_opt(&self, key: &str) -> Option<String> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    /// Get an optional i64 parameter
    pub fn param_i64_opt(&self, key: &str) -> Option<i64> {
        self.params.get(key).and_then(|v| v.as_i64())
    }

    /// Parameters as a JSON object
    pub fn to_arguments(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

/// Outcome of one tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub data: serde_json::Value,
    pub error: Option<String>,
}

impl ToolOutput {
    /// Create a successful output with JSON data
    pub fn json(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    /// Create an error output
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }

    /// The value placed into the conversation for the model.
    ///
    /// Successful outputs contribute their data unchanged; failures become
    /// `{"error": message}` so the model can adapt.
    pub fn payload(&self) -> serde_json::Value {
        if self.success {
            self.data.clone()
        } else {
            serde_json::json!({ "error": self.error.clone().unwrap_or_default() })
        }
    }
}

/// Tool-specific errors
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("{0}")]
    Failed(String),
}

/// Schema entry advertised to the model for one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name. Capability modules advertise the bare function name; the
    /// engine catalog carries the fully-qualified `<module>_<function>`.
    pub name: String,

    /// Human readable description
    #[serde(default)]
    pub description: String,

    /// JSON schema of the argument object
    #[serde(default = "empty_parameters")]
    pub parameters: serde_json::Value,
}

fn empty_parameters() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolSchema {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// An asynchronous tool implementation
#[async_trait]
pub trait AsyncTool: Send + Sync {
    async fn call(&self, input: ToolInput) -> Result<serde_json::Value, ToolError>;
}

/// A synchronous tool implementation. The engine runs these on a blocking
/// thread so they never stall the async scheduler.
pub type BlockingTool = dyn Fn(ToolInput) -> Result<serde_json::Value, ToolError> + Send + Sync;

struct FnTool<F>(F);

#[async_trait]
impl<F, Fut> AsyncTool for FnTool<F>
where
    F: Fn(ToolInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, ToolError>> + Send + 'static,
{
    async fn call(&self, input: ToolInput) -> Result<serde_json::Value, ToolError> {
        (self.0)(input).await
    }
}

/// An invocable tool function
#[derive(Clone)]
pub enum ToolHandler {
    Async(Arc<dyn AsyncTool>),
    Blocking(Arc<BlockingTool>),
}

impl ToolHandler {
    /// Wrap an async closure
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(ToolInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ToolError>> + Send + 'static,
    {
        Self::Async(Arc::new(FnTool(f)))
    }

    /// Wrap a blocking closure
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(ToolInput) -> Result<serde_json::Value, ToolError> + Send + Sync + 'static,
    {
        Self::Blocking(Arc::new(f))
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocking(_))
    }
}

impl fmt::Debug for ToolHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Async(_) => f.write_str("ToolHandler::Async"),
            Self::Blocking(_) => f.write_str("ToolHandler::Blocking"),
        }
    }
}

/// What a capability module exposes: its tool functions and their schemas
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    tools: HashMap<String, ToolHandler>,
    schemas: Vec<ToolSchema>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function under its unqualified name
    pub fn with_tool(mut self, function: impl Into<String>, handler: ToolHandler) -> Self {
        self.tools.insert(function.into(), handler);
        self
    }

    /// Advertise a schema entry
    pub fn with_schema(mut self, schema: ToolSchema) -> Self {
        self.schemas.push(schema);
        self
    }

    pub fn tool(&self, function: &str) -> Option<&ToolHandler> {
        self.tools.get(function)
    }

    /// Function names in sorted order
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn schemas(&self) -> &[ToolSchema] {
        &self.schemas
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Export a native capability entry point.
///
/// ```ignore
/// fn tools() -> sdk::ToolSet { sdk::ToolSet::new() }
/// sdk::declare_capability!(tools);
/// ```
#[macro_export]
macro_rules! declare_capability {
    ($builder:path) => {
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn register_tools() -> *mut $crate::ToolSet {
            Box::into_raw(Box::new($builder()))
        }
    };
}
