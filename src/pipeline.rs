//! Request pipeline integration.
//!
//! [`WarningPipeline`] wraps one logical request: it opens the warning scope,
//! runs the handler inside it, and finalizes the warnings onto the response
//! exactly once, whether the handler succeeded, failed, or timed out.

use crate::config::WarningConfig;
use crate::context::{self, RequestScope};
use crate::emitter::DeprecationLogger;
use crate::error::{Result, WarningError};
use crate::metrics::WarningMetrics;
use crate::response::{finalize, ResponseEnvelope};
use crate::store::RequestId;
use crate::warning::parse_warning_value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Response body plus the warning headers gathered while producing it.
#[derive(Debug, Clone)]
pub struct WarnedResponse<T> {
    pub request_id: RequestId,
    pub body: T,
    pub headers: Vec<(String, String)>,
}

impl<T> WarnedResponse<T> {
    /// Warning texts, decoded from the header values.
    pub fn warnings(&self) -> Vec<String> {
        self.headers
            .iter()
            .map(|(_, value)| parse_warning_value(value))
            .collect()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WarnedResponse<U> {
        WarnedResponse {
            request_id: self.request_id,
            body: f(self.body),
            headers: self.headers,
        }
    }
}

/// Per-server warning pipeline.
pub struct WarningPipeline {
    config: WarningConfig,
    metrics: Option<Arc<WarningMetrics>>,
}

impl WarningPipeline {
    /// Create a pipeline with the given configuration.
    pub fn new(config: WarningConfig) -> Result<Self> {
        config.validate()?;
        let metrics = if config.metrics.enabled {
            Some(Arc::new(WarningMetrics::new(&config.metrics.prefix)?))
        } else {
            None
        };

        info!(
            header = %config.header_name,
            format = ?config.format,
            "Deprecation warning pipeline initialized"
        );

        Ok(Self { config, metrics })
    }

    /// Create from a YAML configuration string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::new(WarningConfig::from_yaml(yaml)?)
    }

    pub fn config(&self) -> &WarningConfig {
        &self.config
    }

    /// Get the metrics collector, if metrics are enabled.
    pub fn metrics(&self) -> Option<&Arc<WarningMetrics>> {
        self.metrics.as_ref()
    }

    /// A deprecation logger wired to this pipeline's metrics and log settings.
    pub fn logger(&self, name: impl Into<String>) -> DeprecationLogger {
        let logger = DeprecationLogger::new(name).with_logging(self.config.log_deprecations);
        match &self.metrics {
            Some(metrics) => logger.with_metrics(Arc::clone(metrics)),
            None => logger,
        }
    }

    fn begin(&self) -> Result<RequestScope> {
        context::begin_request_with_limit(self.config.max_records_per_request)
    }

    fn finish<T>(&self, scope: RequestScope, body: T, outcome: &str) -> WarnedResponse<T> {
        let mut headers = Vec::new();
        finalize(
            &scope,
            &mut headers,
            &self.config,
            self.metrics.as_deref(),
            outcome,
        );
        WarnedResponse {
            request_id: scope.request_id(),
            body,
            headers,
        }
    }

    /// Serve one logical request.
    ///
    /// Failures belong in `fut`'s output; warnings are attached either way.
    pub async fn handle<F>(&self, fut: F) -> Result<WarnedResponse<F::Output>>
    where
        F: Future,
    {
        let scope = self.begin()?;
        let body = scope.run(fut).await;
        Ok(self.finish(scope, body, "completed"))
    }

    /// Serve one logical request with a deadline.
    ///
    /// On timeout the body is `Err(Timeout)` and warnings recorded before the
    /// deadline are still attached.
    pub async fn handle_with_timeout<F>(
        &self,
        timeout: Duration,
        fut: F,
    ) -> Result<WarnedResponse<Result<F::Output>>>
    where
        F: Future,
    {
        let scope = self.begin()?;
        let result = tokio::time::timeout(timeout, scope.run(fut)).await;
        match result {
            Ok(body) => Ok(self.finish(scope, Ok(body), "completed")),
            Err(_) => {
                warn!(
                    request_id = %scope.request_id(),
                    timeout = ?timeout,
                    "Request timed out, finalizing partial warnings"
                );
                Ok(self.finish(scope, Err(WarningError::Timeout(timeout)), "timed_out"))
            }
        }
    }

    /// Serve one logical request for a transport without headers.
    pub async fn handle_envelope<F>(&self, fut: F) -> Result<ResponseEnvelope>
    where
        F: Future<Output = ResponseEnvelope>,
    {
        let scope = self.begin()?;
        let mut envelope = scope.run(fut).await;
        finalize(
            &scope,
            &mut envelope,
            &self.config,
            self.metrics.as_deref(),
            "completed",
        );
        Ok(envelope)
    }
}
