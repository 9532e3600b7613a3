// opsagent Engine
// Main entry point for the opsagent binary

use clap::Parser;
use opsagent_engine::cli::{Cli, Command};
use opsagent_engine::config::{Config, ConfigManager};
use opsagent_engine::handlers::{handle_chat, handle_check, handle_tools, ChatOptions, OutputFormat};
use opsagent_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // An explicit --log wins over the configured level and applies to config loading too
    if let Some(level) = &cli.log {
        init_telemetry_with_level(level);
    }

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };
    let manager = ConfigManager::load(path)?;

    // No-op when --log already installed a subscriber
    // (RUST_LOG still takes precedence over the configured level)
    init_telemetry_with_level(&manager.config().core.log_level);

    tracing::debug!("opsagent v{}", env!("CARGO_PKG_VERSION"));

    // Handle commands
    match cli.command {
        Command::Chat {
            prompt,
            no_preprocess,
            quiet,
            collect,
        } => {
            let options = ChatOptions {
                prompt,
                preprocess: !no_preprocess,
                quiet,
                collect,
            };
            handle_chat(&manager, options, format).await
        }

        Command::Tools => handle_tools(&manager.config(), format).await,

        Command::Check => handle_check(&manager.config(), format).await,
    }
}
