use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, EnvFilter};

/// Output shape of the global subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines with file and line numbers.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// `RUST_LOG` wins when set; otherwise `default_level` is used
/// (e.g. "info", "fw_agents=debug,warn").
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber.
///
/// Returns `false` when one was already installed (e.g. by another test);
/// that call changes nothing.
pub fn install(service_name: &str, default_level: &str, format: LogFormat) -> bool {
    let builder = fmt()
        .with_env_filter(env_filter(default_level))
        .with_target(true)
        .with_file(true)
        .with_line_number(true);
    let installed = match format {
        LogFormat::Pretty => builder.with_thread_ids(false).try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    };
    if installed {
        tracing::info!(service = service_name, ?format, "logging initialised");
    }
    installed
}

/// Human-readable logging. Repeated calls are no-ops.
pub fn init_logging(service_name: &str, default_level: &str) {
    install(service_name, default_level, LogFormat::Pretty);
}

/// JSON logging. Repeated calls are no-ops.
pub fn init_logging_json(service_name: &str, default_level: &str) {
    install(service_name, default_level, LogFormat::Json);
}

/// Pick the format from the `log_json` config flag.
pub fn init(service_name: &str, default_level: &str, json: bool) {
    install(service_name, default_level, LogFormat::from_json_flag(json));
}
