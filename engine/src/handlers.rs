//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - chat: One-shot question or interactive session
//! - tools: List capability modules and their tools
//! - check: Run one hot-reload cycle

use anyhow::{Context, Result};
use futures::StreamExt;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::agent::{AgentCore, ChatMode, PromptPreprocessor, StreamEvent, TokenStats};
use crate::config::{Config, ConfigManager};
use crate::llm::{ModelBackend, OpenAiBackend};
use crate::registry::{CapabilityRegistry, HotReloader};

/// Words that end an interactive session
const EXIT_WORDS: [&str; 4] = ["exit", "quit", "q", "bye"];

/// Interactive command that re-reads the configuration file
const RELOAD_COMMAND: &str = "/reload";

/// Longest tool result echoed in text mode
const RESULT_PREVIEW_CHARS: usize = 200;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Options of the `chat` command
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub prompt: Option<String>,
    pub preprocess: bool,
    pub quiet: bool,
    pub collect: bool,
}

/// Build the registry for `config` and load every module in its directory
pub async fn build_registry(config: &Config) -> Arc<CapabilityRegistry> {
    let registry = Arc::new(CapabilityRegistry::from_config(&config.capabilities));
    let loaded = registry.load_all().await;
    tracing::info!(
        "Loaded {} capability modules from {}",
        loaded.len(),
        registry.dir().display()
    );
    registry
}

/// Build the model backend described by the `[llm]` section
pub fn build_backend(config: &Config) -> Arc<dyn ModelBackend> {
    if config.llm.resolve_api_key().is_none() {
        tracing::warn!(
            "No API key configured for provider '{}'; requests will be unauthenticated",
            config.llm.provider
        );
    }
    Arc::new(
        OpenAiBackend::from_config(&config.llm)
            .with_request_timeout(config.agent.request_timeout())
            .with_idle_timeout(config.agent.stream_idle_timeout()),
    )
}

/// Everything a chat needs that derives from one configuration snapshot
struct ChatSession {
    agent: AgentCore,
    preprocessor: PromptPreprocessor,
    reloader: Option<HotReloader>,
}

impl ChatSession {
    async fn start(config: &Config) -> Self {
        let registry = build_registry(config).await;
        let reloader = config.capabilities.hot_reload.then(|| {
            HotReloader::spawn(
                Arc::clone(&registry),
                config.capabilities.hot_reload_interval(),
            )
        });

        Self {
            agent: AgentCore::from_config(config, build_backend(config), registry),
            preprocessor: PromptPreprocessor::new(&config.core.web_root),
            reloader,
        }
    }

    /// Replace backend, registry, retrieval and hot reload with ones built
    /// from `config`. The old reloader stops before the new registry loads.
    async fn rebuild(&mut self, config: &Config) {
        self.stop_reloader().await;
        *self = Self::start(config).await;
    }

    async fn stop_reloader(&mut self) {
        if let Some(reloader) = self.reloader.take() {
            reloader.shutdown().await;
        }
    }

    async fn close(mut self) {
        self.stop_reloader().await;
    }
}

/// Ask one question or run an interactive session
pub async fn handle_chat(
    manager: &ConfigManager,
    options: ChatOptions,
    format: OutputFormat,
) -> Result<()> {
    let mut session = ChatSession::start(&manager.config()).await;

    let result = match options.prompt.clone() {
        Some(prompt) => {
            run_prompt(
                &session.agent,
                &session.preprocessor,
                &prompt,
                &options,
                format,
            )
            .await
        }
        None => run_interactive(manager, &mut session, &options, format).await,
    };

    session.close().await;
    result
}

async fn run_interactive(
    manager: &ConfigManager,
    session: &mut ChatSession,
    options: &ChatOptions,
    format: OutputFormat,
) -> Result<()> {
    manager.on_reload(Box::new(|config: &Config| -> Result<(), String> {
        tracing::info!(
            "Now using model '{}' at {}, capabilities from {}",
            config.llm.model,
            config.llm.base_url,
            config.capabilities.dir.display()
        );
        Ok(())
    }));

    if let OutputFormat::Text = format {
        println!("opsagent interactive session. Type 'exit' to leave, '/reload' to re-read the configuration.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        if let OutputFormat::Text = format {
            print!("\n> ");
            std::io::stdout().flush().ok();
        }

        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&line.to_lowercase().as_str()) {
            break;
        }
        if line == RELOAD_COMMAND {
            match manager.reload() {
                Ok(config) => {
                    session.rebuild(&config).await;
                    if let OutputFormat::Text = format {
                        println!("Configuration reloaded from {}", manager.path().display());
                    }
                }
                Err(e) => eprintln!("✗ Reload failed: {}", e),
            }
            continue;
        }

        if let Err(e) = run_prompt(&session.agent, &session.preprocessor, line, options, format).await {
            tracing::debug!("Prompt ended with error: {}", e);
        }
    }

    Ok(())
}

/// Run one prompt to completion, printing its events
async fn run_prompt(
    agent: &AgentCore,
    preprocessor: &PromptPreprocessor,
    prompt: &str,
    options: &ChatOptions,
    format: OutputFormat,
) -> Result<()> {
    let prompt = if options.preprocess {
        preprocessor.process(prompt).await
    } else {
        prompt.to_string()
    };
    let mode = if options.collect {
        ChatMode::Collected
    } else {
        ChatMode::Streaming
    };

    let mut events = agent.chat(prompt, mode);
    let mut printer = EventPrinter::new(options.quiet);
    let mut failure = None;

    while let Some(event) = events.next().await {
        if let StreamEvent::Error { content, .. } = &event {
            failure = Some(content.clone());
        }
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string(&event)?),
            OutputFormat::Text => printer.print(&event),
        }
    }

    match failure {
        Some(message) => Err(anyhow::anyhow!(message)),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Idle,
    Think,
    Say,
}

/// Renders events as terminal text
struct EventPrinter {
    quiet: bool,
    channel: Channel,
}

impl EventPrinter {
    fn new(quiet: bool) -> Self {
        Self {
            quiet,
            channel: Channel::Idle,
        }
    }

    fn switch(&mut self, channel: Channel) {
        if self.channel == channel {
            return;
        }
        if self.channel != Channel::Idle {
            println!();
        }
        if channel == Channel::Think {
            print!("[thinking] ");
        }
        self.channel = channel;
    }

    fn print(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Think { content, .. } => {
                if !self.quiet {
                    self.switch(Channel::Think);
                    print!("{}", content);
                }
            }
            StreamEvent::Say { content, .. } => {
                self.switch(Channel::Say);
                print!("{}", content);
            }
            StreamEvent::ToolCall {
                tool_name,
                arguments,
            } => {
                if !self.quiet {
                    self.switch(Channel::Idle);
                    println!("→ {} {}", tool_name, arguments);
                }
            }
            StreamEvent::ToolResult { tool_name, result } => {
                if !self.quiet {
                    self.switch(Channel::Idle);
                    println!("← {}: {}", tool_name, preview(&result.to_string()));
                }
            }
            StreamEvent::ProcessInfo { message } => {
                if !self.quiet {
                    self.switch(Channel::Idle);
                    println!("ℹ {}", message);
                }
            }
            StreamEvent::Error {
                content,
                token_stats,
            } => {
                self.switch(Channel::Idle);
                eprintln!("✗ Error: {}", content);
                if !self.quiet {
                    println!("{}", stats_footer(token_stats));
                }
            }
            StreamEvent::Complete {
                think,
                say,
                token_stats,
                tool_calls,
            } => {
                if let Some(records) = tool_calls {
                    // Collected mode: nothing has been printed yet
                    if !self.quiet {
                        for record in records {
                            println!("→ {} {}", record.name, record.arguments);
                        }
                        if !think.is_empty() {
                            println!("[thinking] {}", think);
                        }
                    }
                    print!("{}", say);
                    self.channel = Channel::Say;
                }
                self.switch(Channel::Idle);
                if !self.quiet {
                    println!("{}", stats_footer(token_stats));
                }
            }
        }
        std::io::stdout().flush().ok();
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() <= RESULT_PREVIEW_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(RESULT_PREVIEW_CHARS).collect();
    format!("{}…", head)
}

fn stats_footer(stats: &TokenStats) -> String {
    format!(
        "[tokens: {} prompt + {} completion = {} | api calls: {} | tool calls: {} | {:.1}s]",
        stats.prompt_tokens,
        stats.completion_tokens,
        stats.total_tokens,
        stats.api_calls,
        stats.tool_calls,
        stats.elapsed_seconds
    )
}

/// List capability modules and their tools
pub async fn handle_tools(config: &Config, format: OutputFormat) -> Result<()> {
    let registry = build_registry(config).await;
    let modules = registry.list().await;

    match format {
        OutputFormat::Text => {
            if modules.is_empty() {
                println!(
                    "No capability modules found in {}",
                    registry.dir().display()
                );
                return Ok(());
            }

            println!("Capability modules ({}):", registry.dir().display());
            println!();
            for module in &modules {
                let status = if module.loaded { "✓" } else { "✗" };
                println!("{} {} ({})", status, module.name, module.source.display());
                for tool in &module.tools {
                    println!("    {}", tool);
                }
                if let Some(error) = &module.error {
                    println!("    error: {}", error);
                }
            }

            let catalog = registry.catalog().await;
            println!();
            println!("{} tools available", catalog.len());
        }
        OutputFormat::Json => {
            let output = json!({
                "dir": registry.dir(),
                "modules": modules,
                "catalog": registry.catalog().await,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Load the capability directory, then run one reload cycle against it
pub async fn handle_check(config: &Config, format: OutputFormat) -> Result<()> {
    let registry = build_registry(config).await;
    let changed = registry.check_and_reload_modified().await;
    let modules = registry.list().await;

    match format {
        OutputFormat::Text => {
            if changed.is_empty() {
                println!("No changes detected in {}", registry.dir().display());
            } else {
                println!("Changed modules: {}", changed.join(", "));
            }
            let failed: Vec<_> = modules.iter().filter(|m| !m.loaded).collect();
            println!(
                "{} modules loaded, {} failed",
                modules.len() - failed.len(),
                failed.len()
            );
            for module in failed {
                println!(
                    "  ✗ {}: {}",
                    module.name,
                    module.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "changed": changed,
                "modules": modules,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
