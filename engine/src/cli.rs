//! CLI interface for opsagent
//!
//! This module provides the command-line interface using clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// opsagent operations assistant
///
/// Chats with an OpenAI-compatible model that can call tools provided by
/// hot-reloadable capability modules.
#[derive(Parser, Debug)]
#[command(name = "opsagent")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ask a single question, or start an interactive session
    Chat {
        /// Prompt to send; omit for an interactive session
        #[arg(short, long)]
        prompt: Option<String>,

        /// Send the prompt as typed, without expanding @{...} expressions
        #[arg(long)]
        no_preprocess: bool,

        /// Hide reasoning and tool activity, print only the answer
        #[arg(short, long)]
        quiet: bool,

        /// Wait for the whole answer instead of streaming it
        #[arg(long)]
        collect: bool,
    },

    /// List capability modules and the tools they provide
    Tools,

    /// Run one hot-reload check over the capability directory
    Check,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_chat() {
        let cli = Cli::parse_from(["opsagent", "chat", "-p", "disk usage?", "--quiet"]);
        match cli.command {
            Command::Chat {
                prompt,
                quiet,
                no_preprocess,
                collect,
            } => {
                assert_eq!(prompt.as_deref(), Some("disk usage?"));
                assert!(quiet);
                assert!(!no_preprocess);
                assert!(!collect);
            }
            _ => panic!("Expected Chat command"),
        }
    }

    #[test]
    fn test_cli_parse_interactive_chat() {
        let cli = Cli::parse_from(["opsagent", "chat", "--collect", "--no-preprocess"]);
        match cli.command {
            Command::Chat {
                prompt,
                collect,
                no_preprocess,
                ..
            } => {
                assert!(prompt.is_none());
                assert!(collect);
                assert!(no_preprocess);
            }
            _ => panic!("Expected Chat command"),
        }
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::parse_from([
            "opsagent",
            "tools",
            "--json",
            "--log",
            "debug",
            "--config",
            "/etc/opsagent.toml",
        ]);
        assert!(cli.json);
        assert_eq!(cli.log.as_deref(), Some("debug"));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/opsagent.toml")));
        assert!(matches!(cli.command, Command::Tools));
    }

    #[test]
    fn test_cli_parse_check() {
        let cli = Cli::parse_from(["opsagent", "check"]);
        assert!(matches!(cli.command, Command::Check));
    }
}
