//! Deprecation emitter.
//!
//! Business logic reports deprecated usage here. The rendered text goes to the
//! deprecation log and, when a request scope is active, into that request's
//! [`WarningStore`](crate::store::WarningStore). With no scope, [`emit`] does
//! nothing at all, while a named [`DeprecationLogger`] still writes its log line.

use crate::context;
use crate::metrics::WarningMetrics;
use crate::warning::render_template;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::warn;

/// Target used for all deprecation log lines.
pub const DEPRECATION_TARGET: &str = "deprecation";

/// Named source of deprecation warnings.
#[derive(Clone)]
pub struct DeprecationLogger {
    name: String,
    metrics: Option<Arc<WarningMetrics>>,
    log: bool,
}

impl DeprecationLogger {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metrics: None,
            log: true,
        }
    }

    /// Count emissions in the given metrics collector.
    pub fn with_metrics(mut self, metrics: Arc<WarningMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Enable or disable the deprecation log line.
    pub fn with_logging(mut self, log: bool) -> Self {
        self.log = log;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render `template` with `args` and report it.
    pub fn deprecated(&self, template: &str, args: &[&dyn fmt::Display]) {
        self.deprecated_text(render_template(template, args));
    }

    /// Report an already rendered message.
    pub fn deprecated_text(&self, text: impl Into<String>) {
        let text = text.into();

        if self.log {
            warn!(target: DEPRECATION_TARGET, logger = %self.name, "{}", text);
        }

        match context::current_store() {
            Some(store) => {
                if store.record(text) {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_emitted(&self.name);
                    }
                }
            }
            None => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_outside_scope(&self.name);
                }
            }
        }
    }
}

impl fmt::Debug for DeprecationLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeprecationLogger")
            .field("name", &self.name)
            .field("log", &self.log)
            .finish()
    }
}

/// Report a deprecation through the process-wide default logger.
///
/// Outside a request scope this is a no-op: nothing is rendered or logged.
pub fn emit(template: &str, args: &[&dyn fmt::Display]) {
    static DEFAULT: OnceLock<DeprecationLogger> = OnceLock::new();
    if !context::is_active() {
        return;
    }
    DEFAULT
        .get_or_init(|| DeprecationLogger::new(DEPRECATION_TARGET))
        .deprecated(template, args);
}

/// Report a deprecation with `{}` placeholders.
///
/// ```ignore
/// deprecation!(logger, "[{}] setting was deprecated", key);
/// ```
#[macro_export]
macro_rules! deprecation {
    ($logger:expr, $template:expr $(, $arg:expr)* $(,)?) => {
        $logger.deprecated($template, &[$(&$arg as &dyn ::std::fmt::Display),*])
    };
}
