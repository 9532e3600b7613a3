//! Agent Core
//!
//! This module implements the conversation loop. One invocation runs on its
//! own task and reports progress as [`StreamEvent`]s:
//!
//! 1. Optionally augment the prompt with retrieved documents
//! 2. Stream a model turn, splitting reasoning from answer text
//! 3. If the turn requested tools: dispatch them in order, append results,
//!    and go back to 2
//! 4. Otherwise finish with a `complete` event
//!
//! # Limits
//!
//! - `max_iterations` model turns, then one forced summary turn without tools
//! - Transient model errors are retried while opening a turn, never mid-stream
//! - Each tool call runs under its own timeout
//! - Oversized tool results are replaced by a truncated stand-in

use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::{AgentConfig, Config};
use crate::knowledge::{ChromaRetriever, RetrievalHook};
use crate::llm::{ChatRequest, DeltaStream, LLMError, Message, ModelBackend, ToolCall};
use crate::registry::CapabilityRegistry;
use sdk::errors::EngineError;
use sdk::types::{ToolOutput, ToolSchema};

use super::compress::{self, CompressionLimits};
use super::events::{StreamEvent, TokenStats, ToolCallRecord};
use super::redact::{clean_text, Redactor};
use super::stream::{Segment, ThinkSplitter, ToolCallAccumulator};

/// Attempts made to open one model turn
const MAX_REQUEST_ATTEMPTS: u32 = 3;

/// Capacity of the event channel between the loop and its consumer
const EVENT_BUFFER: usize = 100;

/// Answer used when the forced summary turn itself fails
pub const ITERATION_LIMIT_FALLBACK: &str = "maximum tool-call iterations reached";

const SUMMARY_INSTRUCTION: &str =
    "Based on the tool call results above, briefly summarize the answer to the user's question.";

const SYSTEM_PROMPT: &str = "You are an operations assistant. Use the available tools to \
inspect and act on the systems the user asks about, and answer from their results. When \
reference knowledge base content is provided, prefer it over guessing.";

/// How events are delivered to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatMode {
    /// Every event as it happens
    #[default]
    Streaming,

    /// Only the terminal event, carrying the full answer and a record of
    /// every tool call
    Collected,
}

/// Who is talking to the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub username: String,
    pub display_name: Option<String>,
}

impl CallerIdentity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }
}

/// Sampling parameters forwarded to every model turn
#[derive(Debug, Clone, Copy)]
struct Sampling {
    temperature: f64,
    max_tokens: u32,
}

/// The conversation orchestrator
#[derive(Clone)]
pub struct AgentCore {
    backend: Arc<dyn ModelBackend>,
    registry: Arc<CapabilityRegistry>,
    retrieval: Option<RetrievalHook>,
    config: Arc<AgentConfig>,
    redactor: Redactor,
    sampling: Sampling,
    caller: Option<CallerIdentity>,
}

impl AgentCore {
    /// Create an agent core
    ///
    /// # Arguments
    ///
    /// * `backend` - Model backend used for every turn
    /// * `registry` - Capability registry providing the tool catalog
    /// * `config` - Loop limits, timeouts and redaction terms
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        registry: Arc<CapabilityRegistry>,
        config: AgentConfig,
    ) -> Self {
        let redactor = Redactor::new(&config.sensitive_keys);
        Self {
            backend,
            registry,
            retrieval: None,
            config: Arc::new(config),
            redactor,
            sampling: Sampling {
                temperature: 0.7,
                max_tokens: 8192,
            },
            caller: None,
        }
    }

    /// Create an agent core wired from a full configuration
    pub fn from_config(
        config: &Config,
        backend: Arc<dyn ModelBackend>,
        registry: Arc<CapabilityRegistry>,
    ) -> Self {
        let mut agent = Self::new(backend, registry, config.agent.clone())
            .with_sampling(config.llm.temperature, config.llm.max_tokens);

        if config.knowledge_base.augments_prompts() {
            let retriever = Arc::new(ChromaRetriever::from_config(&config.knowledge_base));
            agent = agent.with_retrieval(RetrievalHook::new(
                retriever,
                config.knowledge_base.n_results,
            ));
        }

        if let Some(username) = config.user.resolved_username() {
            let mut caller = CallerIdentity::new(username);
            if let Some(display_name) = &config.user.display_name {
                caller = caller.with_display_name(display_name);
            }
            agent = agent.with_caller(caller);
        }

        agent
    }

    pub fn with_sampling(mut self, temperature: f64, max_tokens: u32) -> Self {
        self.sampling = Sampling {
            temperature,
            max_tokens,
        };
        self
    }

    pub fn with_retrieval(mut self, hook: RetrievalHook) -> Self {
        self.retrieval = Some(hook);
        self
    }

    pub fn with_caller(mut self, caller: CallerIdentity) -> Self {
        self.caller = Some(caller);
        self
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Start a conversation.
    ///
    /// The loop runs on a spawned task; dropping the returned stream cancels
    /// it. The stream always ends with exactly one `complete` or `error`
    /// event unless it is dropped first.
    pub fn chat(&self, prompt: impl Into<String>, mode: ChatMode) -> EventStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let session = Session {
            agent: self.clone(),
            stats: TokenStats::start(),
            sink: EventSink::new(tx, mode),
        };
        let prompt = prompt.into();
        let task = tokio::spawn(session.run(prompt));
        EventStream { rx, task }
    }

    fn system_prompt(&self) -> String {
        match &self.caller {
            Some(caller) => format!(
                "{}\n\nCurrent user: {} (username: {})",
                SYSTEM_PROMPT,
                caller.display_name.as_deref().unwrap_or(&caller.username),
                caller.username
            ),
            None => SYSTEM_PROMPT.to_string(),
        }
    }

    fn limits(&self) -> CompressionLimits {
        CompressionLimits {
            max_history_tokens: self.config.max_history_tokens,
            compress_message_tokens: self.config.compress_message_tokens,
            chars_per_token: self.config.chars_per_token,
        }
    }

    fn request(&self, messages: &[Message], tools: Vec<ToolSchema>) -> ChatRequest {
        ChatRequest {
            messages: messages.to_vec(),
            tools,
            temperature: self.sampling.temperature,
            max_tokens: self.sampling.max_tokens,
        }
    }

    /// Open one model turn, retrying transient failures with linear backoff
    async fn open_turn(&self, request: &ChatRequest) -> Result<DeltaStream, LLMError> {
        let mut attempt = 1;
        loop {
            let result = match timeout(
                self.config.request_timeout(),
                self.backend.stream_chat(request.clone()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(LLMError::Timeout),
            };

            match result {
                Ok(stream) => return Ok(stream),
                Err(e) if e.is_transient() && attempt < MAX_REQUEST_ATTEMPTS => {
                    let backoff = self.config.retry_backoff() * attempt;
                    warn!(
                        "{} request failed (attempt {}/{}): {}; retrying in {:?}",
                        self.backend.name(),
                        attempt,
                        MAX_REQUEST_ATTEMPTS,
                        e,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Events of one conversation. Dropping the stream cancels the conversation.
pub struct EventStream {
    rx: mpsc::Receiver<StreamEvent>,
    task: JoinHandle<()>,
}

impl EventStream {
    /// Drain the stream and return its terminal event
    pub async fn terminal(mut self) -> Option<StreamEvent> {
        let mut last = None;
        while let Some(event) = self.next().await {
            if event.is_terminal() {
                last = Some(event);
            }
        }
        last
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Why a conversation stopped early
enum Halt {
    /// Nobody is listening any more
    Disconnected,

    /// The model backend failed
    Fatal(LLMError),
}

impl From<LLMError> for Halt {
    fn from(e: LLMError) -> Self {
        Halt::Fatal(e)
    }
}

/// Delivers events according to the chat mode
struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
    mode: ChatMode,
    records: Vec<ToolCallRecord>,
}

impl EventSink {
    fn new(tx: mpsc::Sender<StreamEvent>, mode: ChatMode) -> Self {
        Self {
            tx,
            mode,
            records: Vec::new(),
        }
    }

    async fn emit(&mut self, event: StreamEvent) -> Result<(), Halt> {
        match self.mode {
            ChatMode::Streaming => self.send(event).await,
            ChatMode::Collected => match event {
                StreamEvent::ToolCall {
                    tool_name,
                    arguments,
                } => {
                    self.records.push(ToolCallRecord {
                        name: tool_name,
                        arguments,
                        result: None,
                    });
                    Ok(())
                }
                StreamEvent::ToolResult { tool_name, result } => {
                    if let Some(record) = self
                        .records
                        .iter_mut()
                        .rev()
                        .find(|r| r.name == tool_name && r.result.is_none())
                    {
                        record.result = Some(result);
                    }
                    Ok(())
                }
                StreamEvent::Complete {
                    think,
                    say,
                    token_stats,
                    ..
                } => {
                    let records = std::mem::take(&mut self.records);
                    self.send(StreamEvent::Complete {
                        think,
                        say,
                        token_stats,
                        tool_calls: Some(records),
                    })
                    .await
                }
                event @ StreamEvent::Error { .. } => self.send(event).await,
                _ => Ok(()),
            },
        }
    }

    async fn send(&self, event: StreamEvent) -> Result<(), Halt> {
        self.tx.send(event).await.map_err(|_| Halt::Disconnected)
    }
}

/// Text produced by one model turn
#[derive(Default)]
struct Turn {
    content: String,
    think: String,
    say: String,
    tool_calls: Vec<ToolCall>,
}

/// State of one running conversation
struct Session {
    agent: AgentCore,
    stats: TokenStats,
    sink: EventSink,
}

impl Session {
    async fn run(mut self, prompt: String) {
        match self.drive(prompt).await {
            Ok(()) => {}
            Err(Halt::Disconnected) => debug!("Conversation consumer went away"),
            Err(Halt::Fatal(e)) => {
                error!("Conversation failed: {}", e);
                self.stats.refresh();
                let event = StreamEvent::Error {
                    content: e.to_string(),
                    token_stats: self.stats.clone(),
                };
                let _ = self.sink.emit(event).await;
            }
        }
    }

    async fn drive(&mut self, prompt: String) -> Result<(), Halt> {
        let mut prompt = clean_text(&prompt);
        if let Some(hook) = &self.agent.retrieval {
            prompt = hook.augment(&prompt).await;
        }

        let mut transcript = vec![
            Message::system(self.agent.system_prompt()),
            Message::user(prompt),
        ];
        let limits = self.agent.limits();
        let max_iterations = self.agent.config.max_iterations;

        for iteration in 1..=max_iterations {
            compress::compress_history(&mut transcript, &limits);

            let catalog = self.agent.registry.catalog().await;
            debug!(
                "Iteration {}/{} with {} tools offered",
                iteration,
                max_iterations,
                catalog.len()
            );
            let request = self.agent.request(&transcript, catalog);
            self.stats
                .record_request(compress::transcript_tokens(&transcript, limits.chars_per_token));

            let deltas = self.agent.open_turn(&request).await?;
            let turn = self.consume_turn(deltas).await?;
            self.stats.record_completion(compress::estimate_tokens(
                &turn.content,
                limits.chars_per_token,
            ));

            if turn.tool_calls.is_empty() {
                info!(
                    "Conversation complete after {} iterations ({} tool calls)",
                    iteration, self.stats.tool_calls
                );
                return self.complete(turn.think, turn.say).await;
            }

            transcript.push(Message::assistant_with_tools(
                turn.content,
                turn.tool_calls.clone(),
            ));
            for call in &turn.tool_calls {
                let message = self.execute_tool_call(call).await?;
                transcript.push(message);
            }
        }

        self.forced_summary(transcript).await
    }

    /// Stream one turn to the consumer and collect what it produced
    async fn consume_turn(&mut self, mut deltas: DeltaStream) -> Result<Turn, Halt> {
        let idle = self.agent.config.stream_idle_timeout();
        let mut splitter = ThinkSplitter::new();
        let mut calls = ToolCallAccumulator::new();
        let mut turn = Turn::default();

        loop {
            let delta = match timeout(idle, deltas.next()).await {
                Ok(Some(delta)) => delta?,
                Ok(None) => break,
                Err(_) => return Err(Halt::Fatal(LLMError::Timeout)),
            };

            for fragment in &delta.tool_calls {
                calls.push(fragment);
            }
            if let Some(reasoning) = delta.reasoning.filter(|r| !r.is_empty()) {
                self.emit_segment(Segment::Think(reasoning), &mut turn).await?;
            }
            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                turn.content.push_str(&content);
                for segment in splitter.push(&content) {
                    self.emit_segment(segment, &mut turn).await?;
                }
            }
        }

        for segment in splitter.finish() {
            self.emit_segment(segment, &mut turn).await?;
        }
        turn.tool_calls = calls.finish();
        Ok(turn)
    }

    async fn emit_segment(&mut self, segment: Segment, turn: &mut Turn) -> Result<(), Halt> {
        let event = match segment {
            Segment::Think(content) => {
                turn.think.push_str(&content);
                StreamEvent::Think {
                    content,
                    partial: true,
                }
            }
            Segment::Say(content) => {
                turn.say.push_str(&content);
                StreamEvent::Say {
                    content,
                    partial: true,
                }
            }
        };
        self.sink.emit(event).await
    }

    /// Dispatch one tool call and build the transcript message for its result
    async fn execute_tool_call(&mut self, call: &ToolCall) -> Result<Message, Halt> {
        let arguments = parse_arguments(call);
        self.stats.record_tool_call();
        self.sink
            .emit(StreamEvent::ToolCall {
                tool_name: call.name.clone(),
                arguments: self.agent.redactor.redact(&arguments),
            })
            .await?;

        let tool_timeout = self.agent.config.tool_timeout();
        let outcome = match timeout(
            tool_timeout,
            self.agent.registry.dispatch(&call.name, arguments),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(EngineError::ToolTimeout(tool_timeout.as_secs())),
        };

        let output = match outcome {
            Ok(data) => ToolOutput::json(data),
            Err(e) => {
                warn!("Tool call {} failed: {}", call.name, e);
                ToolOutput::error(e.to_string())
            }
        };
        let payload = output.payload();
        let serialized = payload.to_string();

        let max_chars = self.agent.config.max_tool_result_chars;
        let (surfaced, content) = match compress::truncate_result(&serialized, max_chars) {
            Some(stand_in) => {
                let original = serialized.chars().count();
                info!(
                    "Truncating result of {} from {} to {} chars",
                    call.name, original, max_chars
                );
                self.sink
                    .emit(StreamEvent::ProcessInfo {
                        message: format!(
                            "Result of {} is too large ({} chars), truncated to {} chars",
                            call.name, original, max_chars
                        ),
                    })
                    .await?;
                let content = stand_in.to_string();
                (stand_in, content)
            }
            None => (payload, serialized),
        };

        self.sink
            .emit(StreamEvent::ToolResult {
                tool_name: call.name.clone(),
                result: self.agent.redactor.redact(&surfaced),
            })
            .await?;

        Ok(Message::tool_result(content, call.id.clone()))
    }

    /// One last turn without tools once the iteration budget is spent
    async fn forced_summary(&mut self, mut transcript: Vec<Message>) -> Result<(), Halt> {
        warn!(
            "Reached maximum iterations ({}), requesting a summary",
            self.agent.config.max_iterations
        );

        let limits = self.agent.limits();
        transcript.push(Message::user(SUMMARY_INSTRUCTION));
        compress::compress_history(&mut transcript, &limits);
        let request = self.agent.request(&transcript, Vec::new());
        self.stats
            .record_request(compress::transcript_tokens(&transcript, limits.chars_per_token));

        match self.summary_turn(&request).await {
            Ok(say) => {
                self.stats
                    .record_completion(compress::estimate_tokens(&say, limits.chars_per_token));
                self.complete(String::new(), say).await
            }
            Err(Halt::Fatal(e)) => {
                warn!("Summary turn failed: {}", e);
                self.complete(String::new(), ITERATION_LIMIT_FALLBACK.to_string())
                    .await
            }
            Err(Halt::Disconnected) => Err(Halt::Disconnected),
        }
    }

    /// Stream a summary answer, all of it as `say`
    async fn summary_turn(&mut self, request: &ChatRequest) -> Result<String, Halt> {
        let stream = match timeout(
            self.agent.config.request_timeout(),
            self.agent.backend.stream_chat(request.clone()),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(Halt::Fatal(LLMError::Timeout)),
        };

        let idle = self.agent.config.stream_idle_timeout();
        let mut stream = stream;
        let mut say = String::new();
        loop {
            let delta = match timeout(idle, stream.next()).await {
                Ok(Some(delta)) => delta?,
                Ok(None) => break,
                Err(_) => return Err(Halt::Fatal(LLMError::Timeout)),
            };
            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                say.push_str(&content);
                self.sink
                    .emit(StreamEvent::Say {
                        content,
                        partial: true,
                    })
                    .await?;
            }
        }
        Ok(say)
    }

    async fn complete(&mut self, think: String, say: String) -> Result<(), Halt> {
        self.stats.refresh();
        self.sink
            .emit(StreamEvent::Complete {
                think,
                say,
                token_stats: self.stats.clone(),
                tool_calls: None,
            })
            .await
    }
}

/// Parse tool arguments, falling back to an empty object
fn parse_arguments(call: &ToolCall) -> Value {
    if call.arguments.trim().is_empty() {
        return json!({});
    }
    match serde_json::from_str::<Value>(&call.arguments) {
        Ok(value) => value,
        Err(e) => {
            warn!(
                "Invalid arguments for {} ({}), using an empty object",
                call.name, e
            );
            json!({})
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arguments_fallback() {
        let ok = ToolCall::new("c1", "fs_read", "{\"path\":\"/tmp\"}");
        assert_eq!(parse_arguments(&ok), json!({"path": "/tmp"}));

        let empty = ToolCall::new("c2", "fs_read", "  ");
        assert_eq!(parse_arguments(&empty), json!({}));

        let broken = ToolCall::new("c3", "fs_read", "{\"path\":");
        assert_eq!(parse_arguments(&broken), json!({}));
    }

    #[test]
    fn test_caller_identity_display_name() {
        let caller = CallerIdentity::new("jdoe").with_display_name("Jane Doe");
        assert_eq!(caller.display_name.as_deref(), Some("Jane Doe"));
        assert_eq!(CallerIdentity::new("ops").display_name, None);
    }
}
