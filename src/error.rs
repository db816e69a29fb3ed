//! Error types for the deprecation warning pipeline.
//!
//! Emitting a deprecation never produces one of these. They surface from
//! configuration, settings parsing, scope misuse, and the fan-out helpers.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the warning pipeline and its collaborators.
#[derive(Debug, Error)]
pub enum WarningError {
    /// A new request scope was opened while another was active in the same task.
    #[error("a request scope is already active (request {active}); sub-requests must attach to it")]
    NestedRequest { active: String },

    /// A setting value could not be parsed into its declared type.
    #[error("invalid value [{value}] for setting [{key}]: {reason}")]
    InvalidSetting {
        key: String,
        value: String,
        reason: String,
    },

    /// Configuration is structurally valid YAML but semantically wrong.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The request did not complete within its deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// A scattered sub-request failed or panicked.
    #[error("sub-request for shard [{shard}] failed: {reason}")]
    SubRequestFailed { shard: String, reason: String },

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Pattern(#[from] globset::Error),

    #[error(transparent)]
    Metrics(#[from] prometheus::Error),
}

pub type Result<T> = std::result::Result<T, WarningError>;
