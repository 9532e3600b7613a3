//! opsagent Engine Library
//!
//! This library provides the core functionality of the opsagent engine.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Telemetry and Observability
pub mod telemetry;

/// Model backend abstraction layer
pub mod llm;

/// Capability module registry and hot reload
pub mod registry;

/// Retrieval augmentation
pub mod knowledge;

/// Conversation orchestration
pub mod agent;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
