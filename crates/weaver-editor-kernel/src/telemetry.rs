//! Tracing setup for hosts embedding the kernel.
//!
//! ```ignore
//! use weaver_editor_kernel::telemetry::{self, TelemetryConfig};
//!
//! telemetry::init(TelemetryConfig::from_env());
//! tracing::info!("editor host started");
//! ```

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Console log level when `RUST_LOG` is unset.
    pub console_level: Level,
    pub with_target: bool,
}

impl TelemetryConfig {
    /// DEBUG in debug builds, INFO in release. `RUST_LOG` overrides either.
    pub fn from_env() -> Self {
        let console_level = if cfg!(debug_assertions) {
            Level::DEBUG
        } else {
            Level::INFO
        };
        Self {
            console_level,
            with_target: true,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Install a compact console subscriber.
///
/// Returns false if a global subscriber was already set.
pub fn init(config: TelemetryConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.console_level.as_str().to_lowercase()));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(config.with_target)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .with_filter(env_filter);

    let installed = tracing_subscriber::registry()
        .with(console_layer)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("kernel telemetry initialized");
    }
    installed
}
