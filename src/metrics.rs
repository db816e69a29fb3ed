//! Metrics for deprecation warning traffic.
//!
//! Provides Prometheus metrics for monitoring how often deprecated settings and
//! features are exercised, and how many warnings reach responses.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::io;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Metrics collector for deprecation warnings.
#[derive(Clone)]
pub struct WarningMetrics {
    /// Registry for all metrics
    registry: Registry,

    /// Distinct deprecations recorded inside a request scope, by logger
    pub emitted_total: IntCounterVec,

    /// Deprecations emitted with no active request scope, by logger
    pub outside_scope_total: IntCounterVec,

    /// Warning headers attached to responses
    pub headers_total: IntCounter,

    /// Warnings left off a response because of header limits
    pub headers_dropped_total: IntCounter,

    /// Finalized requests by outcome (completed, timed_out)
    pub requests_total: IntCounterVec,

    /// Distinct warnings per finalized request
    pub warnings_per_request: Histogram,
}

impl WarningMetrics {
    /// Create a new metrics collector with the given prefix.
    pub fn new(prefix: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let emitted_total = IntCounterVec::new(
            Opts::new(
                format!("{}_deprecations_emitted_total", prefix),
                "Deprecations emitted while serving a request",
            ),
            &["logger"],
        )?;

        let outside_scope_total = IntCounterVec::new(
            Opts::new(
                format!("{}_deprecations_outside_scope_total", prefix),
                "Deprecations emitted outside any request",
            ),
            &["logger"],
        )?;

        let headers_total = IntCounter::with_opts(Opts::new(
            format!("{}_warning_headers_total", prefix),
            "Warning headers attached to responses",
        ))?;

        let headers_dropped_total = IntCounter::with_opts(Opts::new(
            format!("{}_warning_headers_dropped_total", prefix),
            "Warnings omitted from responses due to header limits",
        ))?;

        let requests_total = IntCounterVec::new(
            Opts::new(
                format!("{}_requests_total", prefix),
                "Requests finalized by the warning pipeline",
            ),
            &["outcome"],
        )?;

        let warnings_per_request = Histogram::with_opts(
            HistogramOpts::new(
                format!("{}_warnings_per_request", prefix),
                "Distinct deprecation warnings per request",
            )
            .buckets(vec![0.0, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0]),
        )?;

        registry.register(Box::new(emitted_total.clone()))?;
        registry.register(Box::new(outside_scope_total.clone()))?;
        registry.register(Box::new(headers_total.clone()))?;
        registry.register(Box::new(headers_dropped_total.clone()))?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(warnings_per_request.clone()))?;

        Ok(Self {
            registry,
            emitted_total,
            outside_scope_total,
            headers_total,
            headers_dropped_total,
            requests_total,
            warnings_per_request,
        })
    }

    /// Record a deprecation emitted inside a request scope.
    pub fn record_emitted(&self, logger: &str) {
        self.emitted_total.with_label_values(&[logger]).inc();
    }

    /// Record a deprecation emitted with no request scope.
    pub fn record_outside_scope(&self, logger: &str) {
        self.outside_scope_total.with_label_values(&[logger]).inc();
    }

    /// Record the headers written for one finalized request.
    pub fn record_finalized(&self, outcome: &str, attached: usize, dropped: usize) {
        self.requests_total.with_label_values(&[outcome]).inc();
        self.headers_total.inc_by(attached as u64);
        self.headers_dropped_total.inc_by(dropped as u64);
        self.warnings_per_request
            .observe((attached + dropped) as f64);
    }

    /// Get the Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Answer every connection on `listener` with the current exposition.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        info!(address = ?listener.local_addr().ok(), "Metrics server started");
        loop {
            let (mut socket, peer) = listener.accept().await?;
            let output = self.encode();
            let response = format!(
                "HTTP/1.1 200 OK\r\n\
                 Content-Type: text/plain; version=0.0.4\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                output.len(),
                output
            );
            if let Err(e) = socket.write_all(response.as_bytes()).await {
                warn!(peer = %peer, error = %e, "Failed to write metrics response");
                continue;
            }
            if let Err(e) = socket.shutdown().await {
                warn!(peer = %peer, error = %e, "Failed to close metrics connection");
            }
        }
    }
}
