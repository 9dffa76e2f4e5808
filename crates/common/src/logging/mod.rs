//! Logging subsystem for the plugin process.

pub mod manager;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export main types and functions
pub use manager::{finalize, init};
pub use types::{FileLoggingConfig, LoggerConfig, StdoutConfig};

// Re-export tracing-appender types for convenience
pub use tracing_appender::rolling::Rotation;
