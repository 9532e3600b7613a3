//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream;
use opsagent_engine::agent::StreamEvent;
use opsagent_engine::llm::{
    ChatRequest, DeltaStream, LLMError, ModelBackend, StreamDelta, ToolCallFragment,
};
use opsagent_engine::registry::{CapabilityLoader, CapabilityRegistry, LoadedCapability};
use sdk::errors::EngineError;
use sdk::types::ToolSet;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// One scripted answer of [`ScriptedBackend`]
pub enum Reply {
    /// A complete turn
    Deltas(Vec<StreamDelta>),
    /// The request fails before streaming starts
    Fail(LLMError),
    /// Some deltas, then a stream failure
    Broken(Vec<StreamDelta>, LLMError),
}

/// Model backend answering from a fixed script and recording every request
#[derive(Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<DeltaStream, LLMError> {
        self.requests.lock().unwrap().push(request);
        let reply = self.replies.lock().unwrap().pop_front();

        match reply {
            Some(Reply::Deltas(deltas)) => Ok(Box::pin(stream::iter(deltas.into_iter().map(Ok)))),
            Some(Reply::Fail(e)) => Err(e),
            Some(Reply::Broken(deltas, e)) => {
                let items: Vec<Result<StreamDelta, LLMError>> = deltas
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(e)))
                    .collect();
                Ok(Box::pin(stream::iter(items)))
            }
            None => Err(LLMError::InvalidRequest("script exhausted".to_string())),
        }
    }
}

/// A turn answering with plain text
pub fn text_turn(text: &str) -> Reply {
    Reply::Deltas(vec![StreamDelta::content(text)])
}

/// A turn requesting one tool call, with name and arguments split across
/// fragments the way providers stream them
pub fn tool_turn(id: &str, name: &str, arguments: &str) -> Reply {
    tool_calls_turn(&[(id, name, arguments)])
}

/// A turn requesting several tool calls
pub fn tool_calls_turn(calls: &[(&str, &str, &str)]) -> Reply {
    let mut deltas = Vec::new();
    for (index, (id, name, arguments)) in calls.iter().enumerate() {
        let split = arguments.len() / 2;
        let (head, tail) = arguments.split_at(split);
        deltas.push(StreamDelta::tool_calls(vec![ToolCallFragment {
            index,
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            arguments: Some(head.to_string()),
        }]));
        deltas.push(StreamDelta::tool_calls(vec![ToolCallFragment {
            index,
            id: None,
            name: None,
            arguments: Some(tail.to_string()),
        }]));
    }
    Reply::Deltas(deltas)
}

type ModuleFactory = Arc<dyn Fn() -> ToolSet + Send + Sync>;

/// Loader building in-process tool sets for `.tool` marker files
#[derive(Default, Clone)]
pub struct FnLoader {
    modules: HashMap<String, ModuleFactory>,
}

impl FnLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(mut self, name: &str, factory: impl Fn() -> ToolSet + Send + Sync + 'static) -> Self {
        self.modules.insert(name.to_string(), Arc::new(factory));
        self
    }
}

impl CapabilityLoader for FnLoader {
    fn kind(&self) -> &str {
        "fn"
    }

    fn extension(&self) -> &str {
        "tool"
    }

    fn load(&self, name: &str, _path: &Path) -> Result<LoadedCapability, EngineError> {
        let factory = self
            .modules
            .get(name)
            .ok_or_else(|| EngineError::CapabilityLoad {
                name: name.to_string(),
                reason: "no such in-process module".to_string(),
            })?;
        Ok(LoadedCapability::new(factory()))
    }
}

/// Registry over a temporary directory holding one marker file per module
pub async fn registry_with(loader: FnLoader) -> (TempDir, Arc<CapabilityRegistry>) {
    let dir = TempDir::new().unwrap();
    for name in loader.modules.keys() {
        std::fs::write(dir.path().join(format!("{}.tool", name)), name).unwrap();
    }
    let registry = Arc::new(CapabilityRegistry::new(dir.path(), "_").with_loader(loader));
    registry.load_all().await;
    (dir, registry)
}

/// Event kinds in order
pub fn kinds(events: &[StreamEvent]) -> Vec<&'static str> {
    events.iter().map(StreamEvent::kind).collect()
}
