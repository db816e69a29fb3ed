//! Response assembly for request-scoped warnings.
//!
//! At the end of a request the store is drained into one `Warning` header per
//! distinct record, in store order, and the scope is ended. Transports without
//! headers use [`ResponseEnvelope`], which carries the same values in a
//! `warnings` field.

use crate::config::WarningConfig;
use crate::context::RequestScope;
use crate::metrics::WarningMetrics;
use crate::warning::WarningRecord;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Destination for rendered warning entries.
pub trait WarningSink {
    fn add_warning(&mut self, name: &str, value: String);
}

impl WarningSink for Vec<(String, String)> {
    fn add_warning(&mut self, name: &str, value: String) {
        self.push((name.to_string(), value));
    }
}

/// Structured response for non-HTTP transports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub body: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ResponseEnvelope {
    pub fn new(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            body,
            warnings: Vec::new(),
        }
    }
}

impl WarningSink for ResponseEnvelope {
    fn add_warning(&mut self, _name: &str, value: String) {
        self.warnings.push(value);
    }
}

/// Rendered warning headers for one response.
#[derive(Debug, Clone, Default)]
pub struct WarningHeaders {
    headers: Vec<(String, String)>,
    dropped: usize,
}

impl WarningHeaders {
    /// Render `records` in order, stopping at the configured count and size limits.
    pub fn from_records(records: &[WarningRecord], config: &WarningConfig) -> Self {
        let mut headers = Vec::with_capacity(records.len());
        let mut total_size = 0usize;

        for (i, record) in records.iter().enumerate() {
            if config.max_header_count > 0 && headers.len() >= config.max_header_count {
                warn!(
                    limit = config.max_header_count,
                    omitted = records.len() - i,
                    "Warning header count limit reached, omitting remaining warnings"
                );
                return Self {
                    headers,
                    dropped: records.len() - i,
                };
            }

            let value = record.header_value(config.format, &config.agent);
            if config.max_header_size > 0 && total_size + value.len() > config.max_header_size {
                warn!(
                    limit = config.max_header_size,
                    omitted = records.len() - i,
                    "Warning header size limit reached, omitting remaining warnings"
                );
                return Self {
                    headers,
                    dropped: records.len() - i,
                };
            }

            total_size += value.len();
            headers.push((config.header_name.clone(), value));
        }

        Self {
            headers,
            dropped: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Records left off because of limits.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Write every header into `sink`, returning how many were written.
    pub fn apply_to(self, sink: &mut impl WarningSink) -> usize {
        let count = self.headers.len();
        for (name, value) in self.headers {
            sink.add_warning(&name, value);
        }
        count
    }

    /// Get headers as a vector of tuples.
    pub fn to_vec(self) -> Vec<(String, String)> {
        self.headers
    }
}

/// Drain `scope` into `sink` and end it.
///
/// Returns the number of warning entries attached. `outcome` labels the
/// request in metrics.
pub fn finalize(
    scope: &RequestScope,
    sink: &mut impl WarningSink,
    config: &WarningConfig,
    metrics: Option<&WarningMetrics>,
    outcome: &str,
) -> usize {
    let records = scope.store().drain();
    let headers = WarningHeaders::from_records(&records, config);
    let dropped = headers.dropped() + scope.store().dropped() as usize;
    let attached = headers.apply_to(sink);
    scope.end();

    if let Some(metrics) = metrics {
        metrics.record_finalized(outcome, attached, dropped);
    }
    debug!(
        request_id = %scope.request_id(),
        attached,
        dropped,
        outcome,
        "Finalized deprecation warnings"
    );
    attached
}

/// Extract the values of every header named `name` (case-insensitive).
pub fn warning_values<'a>(
    headers: &'a [(String, String)],
    name: &'a str,
) -> impl Iterator<Item = &'a str> + 'a {
    headers
        .iter()
        .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
