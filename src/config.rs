//! Configuration for the deprecation warning pipeline.
//!
//! Controls how warnings are rendered onto responses, per-request limits, and
//! which setting keys are treated as deprecated.

use crate::error::WarningError;
use crate::warning::WarningFormat;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration for the warning pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WarningConfig {
    /// Response header carrying each warning (default: Warning)
    #[serde(default = "default_header_name")]
    pub header_name: String,

    /// Layout of the header value
    #[serde(default)]
    pub format: WarningFormat,

    /// Agent token used by the rfc7234 format
    #[serde(default = "default_agent")]
    pub agent: String,

    /// Maximum warning headers per response (0 = unlimited)
    #[serde(default)]
    pub max_header_count: usize,

    /// Maximum total bytes of warning header values per response (0 = unlimited)
    #[serde(default)]
    pub max_header_size: usize,

    /// Maximum distinct warnings kept per request (0 = unlimited)
    #[serde(default)]
    pub max_records_per_request: usize,

    /// Whether every deprecation is also written to the deprecation log
    #[serde(default = "default_true")]
    pub log_deprecations: bool,

    /// Glob patterns of setting keys that are deprecated
    #[serde(default)]
    pub deprecated_patterns: Vec<String>,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for WarningConfig {
    fn default() -> Self {
        Self {
            header_name: default_header_name(),
            format: WarningFormat::default(),
            agent: default_agent(),
            max_header_count: 0,
            max_header_size: 0,
            max_records_per_request: 0,
            log_deprecations: true,
            deprecated_patterns: Vec::new(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl WarningConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, WarningError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), WarningError> {
        if !is_http_token(&self.header_name) {
            return Err(WarningError::Config(format!(
                "header_name [{}] is not a valid HTTP header name",
                self.header_name
            )));
        }
        if self.agent.is_empty() || self.agent.chars().any(char::is_whitespace) {
            return Err(WarningError::Config(format!(
                "agent [{}] must be a non-empty token without whitespace",
                self.agent
            )));
        }
        for pattern in &self.deprecated_patterns {
            globset::Glob::new(pattern)?;
        }
        if self.max_records_per_request > 0
            && self.max_header_count > self.max_records_per_request
        {
            tracing::warn!(
                max_header_count = self.max_header_count,
                max_records_per_request = self.max_records_per_request,
                "max_header_count exceeds max_records_per_request and can never be reached"
            );
        }
        Ok(())
    }
}

fn is_http_token(name: &str) -> bool {
    static TOKEN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    TOKEN
        .get_or_init(|| {
            Regex::new(r"^[!#$%&'*+\-.^_`|~0-9A-Za-z]+$")
                .unwrap_or_else(|e| panic!("static header token pattern is invalid: {e}"))
        })
        .is_match(name)
}

fn default_true() -> bool {
    true
}

fn default_header_name() -> String {
    "Warning".to_string()
}

fn default_agent() -> String {
    format!("zentinel-{}", env!("CARGO_PKG_VERSION"))
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Whether to collect Prometheus metrics
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prefix for metric names
    #[serde(default = "default_metrics_prefix")]
    pub prefix: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: default_metrics_prefix(),
        }
    }
}

fn default_metrics_prefix() -> String {
    "zentinel_deprecation".to_string()
}
