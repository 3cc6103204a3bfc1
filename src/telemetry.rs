use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

static INIT: OnceLock<()> = OnceLock::new();

fn level_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}

/// Install the global `fmt` subscriber once. `RUST_LOG` takes precedence over
/// the configured level; a subscriber installed elsewhere is left alone.
pub fn init_tracing(cfg: &LoggingConfig) {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level_directive(&cfg.level)))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let installed = match cfg.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .try_init(),
        };

        if installed.is_ok() {
            tracing::debug!(level = %cfg.level, format = ?cfg.format, "tracing initialised");
        }
    });
}
