//! Structured logging setup
//!
//! Everything goes to stderr; stdout is reserved for conversation output so
//! `--json` event lines stay machine-readable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log line rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line human output
    Pretty,
    /// One JSON object per line, with the current span attached
    Json,
}

impl LogFormat {
    /// Pretty in debug builds, JSON in release builds
    pub fn for_build() -> Self {
        if cfg!(debug_assertions) {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    }
}

/// Filter directive applied when `RUST_LOG` is unset.
///
/// The level covers both third-party crates and this crate so that `debug`
/// also surfaces HTTP client chatter.
pub fn default_directive(log_level: &str) -> String {
    format!("{level},opsagent_engine={level}", level = log_level)
}

/// Install the global subscriber.
///
/// Priority: `RUST_LOG` > `log_level`. Only the first call installs anything;
/// returns `false` when a subscriber was already set.
pub fn init_telemetry_with_level(log_level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(log_level)));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match LogFormat::for_build() {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    installed.is_ok()
}
