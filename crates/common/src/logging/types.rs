//! Logging configuration types.

use std::path::PathBuf;

use tracing_appender::rolling::Rotation;
use tracing_subscriber::fmt::format::FmtSpan;

/// Top-level logger configuration.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Human-readable name the process logs under.
    pub service_name: String,

    /// Stdout layer configuration.
    pub stdout_config: StdoutConfig,

    /// Optional rolling file layer.
    pub file_logging_config: Option<FileLoggingConfig>,
}

impl LoggerConfig {
    /// Creates a config with sane defaults and the provided service name.
    pub fn with_base_name(name: &str) -> Self {
        Self {
            service_name: name.to_owned(),
            stdout_config: StdoutConfig::default(),
            file_logging_config: None,
        }
    }
}

/// Configuration for the stdout logging layer.
#[derive(Debug, Clone)]
pub struct StdoutConfig {
    /// Emit JSON lines instead of the compact human format.
    pub json_format: bool,

    /// Which span lifecycle events to emit.
    pub fmt_span: FmtSpan,
}

impl Default for StdoutConfig {
    fn default() -> Self {
        Self {
            json_format: false,
            fmt_span: FmtSpan::NONE,
        }
    }
}

/// Configuration for the rolling file logging layer.
#[derive(Debug, Clone)]
pub struct FileLoggingConfig {
    /// Directory the log files are written into.
    pub directory: PathBuf,

    /// Prefix for the rotated file names.
    pub file_name_prefix: String,

    /// Rotation policy.
    pub rotation: Rotation,

    /// Emit JSON lines instead of the compact human format.
    pub json_format: bool,
}
