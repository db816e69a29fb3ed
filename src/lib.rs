//! Zentinel Deprecation Warnings
//!
//! Collects deprecation warnings raised while serving a request, including
//! every scatter/gather sub-request it fans out into, and attaches them to the
//! response as `Warning` headers.
//!
//! # Features
//!
//! - **Request-scoped store**: warnings never leak between requests, even on a
//!   shared worker pool
//! - **Sub-request roll-up**: children spawned with [`context::spawn_child`]
//!   write into their parent's store
//! - **Deduplication**: one header per distinct message, in first-seen order
//! - **Guaranteed teardown**: scopes end on success, error, panic, and timeout
//! - **Deprecated settings**: reading a deprecated key emits a warning
//!
//! # Example
//!
//! ```ignore
//! let pipeline = WarningPipeline::from_yaml("format: plain")?;
//! let response = pipeline
//!     .handle(async {
//!         emit("[{}] setting was deprecated", &[&"index.legacy"]);
//!         "ok"
//!     })
//!     .await?;
//! assert_eq!(response.warnings(), vec!["[index.legacy] setting was deprecated"]);
//! ```
//!
//! # Example Configuration
//!
//! ```yaml
//! header_name: Warning
//! format: rfc7234
//! max_header_count: 62
//! deprecated_patterns:
//!   - "legacy.*"
//! ```

pub mod config;
pub mod context;
pub mod emitter;
pub mod error;
pub mod fanout;
pub mod metrics;
pub mod pipeline;
pub mod response;
pub mod server;
pub mod settings;
pub mod store;
pub mod warning;

pub use config::WarningConfig;
pub use context::{begin_request, RequestScope};
pub use emitter::{emit, DeprecationLogger};
pub use error::WarningError;
pub use pipeline::{WarnedResponse, WarningPipeline};
pub use store::{RequestId, WarningStore};
pub use warning::WarningRecord;
