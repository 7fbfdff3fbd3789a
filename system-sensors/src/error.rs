//! Error taxonomy for the agent
//!
//! Only configuration errors and the initial broker connection are fatal.
//! Everything raised inside a publish cycle is logged at the scheduler
//! boundary and the agent keeps running.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Invalid or unreadable settings file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("settings file is not valid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{0} not defined in settings file! Please check the documentation")]
    MissingField(&'static str),

    #[error("invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// A single metric could not be sampled
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReadingError {
    #[error("{reading} reading unavailable: {reason}")]
    Unavailable { reading: &'static str, reason: String },
}

impl ReadingError {
    pub fn unavailable(reading: &'static str, reason: impl Into<String>) -> Self {
        ReadingError::Unavailable {
            reading,
            reason: reason.into(),
        }
    }

    /// Name of the reading that failed
    pub fn reading(&self) -> &'static str {
        match self {
            ReadingError::Unavailable { reading, .. } => reading,
        }
    }
}

/// Broker transport and session failures
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("connection to broker failed: {0}")]
    Connection(String),

    #[error("broker refused connection: {0}")]
    Refused(String),

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("disconnect failed: {0}")]
    Disconnect(String),

    #[error("session is closed")]
    Closed,

    #[error("cannot serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failures on the graceful shutdown path; logged, never fatal
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("offline announce failed: {0}")]
    Announce(#[source] BrokerError),

    #[error("disconnect failed: {0}")]
    Disconnect(#[source] BrokerError),

    #[error("{step} did not finish within {limit:?}, continuing shutdown")]
    TimedOut { step: &'static str, limit: Duration },
}
