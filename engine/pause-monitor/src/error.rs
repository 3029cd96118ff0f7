//! Error types for the pause monitor

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Pause log {path} could not be opened: {source}")]
    LogUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No pause log configured")]
    NoLogConfigured,

    #[error("Failed to spawn pause log tailer: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
