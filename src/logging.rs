//! Logging setup using tracing.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line human-readable output
    #[default]
    Compact,
    /// Multi-line output with field breakdown
    Pretty,
    /// One JSON object per event
    Json,
}

/// Installs the global subscriber. `RUST_LOG` wins over `level`.
///
/// Events go to stderr so stdout stays free for the final report.
pub fn init(format: LogFormat, level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr).with_target(false))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr).with_target(false))
            .init(),
    }
}
