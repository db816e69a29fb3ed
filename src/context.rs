//! Request-scoped execution context.
//!
//! The active [`WarningStore`] lives in a tokio task-local slot. A request
//! opens a [`RequestScope`] and runs its handler inside it; anything reachable
//! from that handler can emit deprecations without threading a handle through
//! every signature.
//!
//! Task-locals are not inherited by `tokio::spawn`, which is what keeps
//! unrelated requests isolated on a shared worker pool. Sub-requests that
//! belong to the same logical request are spawned through [`spawn_child`] (or
//! wrapped with [`attach_to_child`]) so they write into the parent's store.

use crate::error::{Result, WarningError};
use crate::store::{RequestId, WarningStore};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

tokio::task_local! {
    static ACTIVE_WARNINGS: Arc<WarningStore>;
}

/// Open a fresh request scope with an unbounded store.
///
/// Fails if the calling task is already inside a request scope. Sub-requests
/// must share the parent's store, never open their own.
pub fn begin_request() -> Result<RequestScope> {
    begin_request_with_limit(0)
}

/// Open a fresh request scope whose store keeps at most `max_records` warnings
/// (0 = unlimited).
pub fn begin_request_with_limit(max_records: usize) -> Result<RequestScope> {
    if let Some(active) = current_store() {
        return Err(WarningError::NestedRequest {
            active: active.owner().to_string(),
        });
    }

    let store = Arc::new(WarningStore::with_capacity_limit(
        RequestId::new(),
        max_records,
    ));
    debug!(request_id = %store.owner(), "Opened deprecation warning scope");
    Ok(RequestScope { store })
}

/// Handle to one logical request's warning scope.
///
/// Ending the scope closes the store so late emissions from abandoned
/// sub-requests are discarded. Dropping the handle ends it as well.
#[must_use = "a request scope does nothing unless work is run inside it"]
pub struct RequestScope {
    store: Arc<WarningStore>,
}

impl RequestScope {
    pub fn request_id(&self) -> RequestId {
        self.store.owner()
    }

    /// The store backing this scope, for explicit propagation across
    /// boundaries the task-local cannot follow.
    pub fn store(&self) -> &Arc<WarningStore> {
        &self.store
    }

    /// Poll `fut` with this scope's store attached.
    ///
    /// The previous context is restored when `fut` completes, panics, or is
    /// dropped before completion.
    pub async fn run<F>(&self, fut: F) -> F::Output
    where
        F: Future,
    {
        ACTIVE_WARNINGS.scope(Arc::clone(&self.store), fut).await
    }

    /// Run synchronous work with this scope's store attached.
    pub fn run_blocking<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        ACTIVE_WARNINGS.sync_scope(Arc::clone(&self.store), f)
    }

    /// Detach the store from any further emission. Safe to call repeatedly;
    /// returns `true` only on the call that actually ended the scope.
    pub fn end(&self) -> bool {
        let ended = self.store.close();
        if ended {
            debug!(
                request_id = %self.store.owner(),
                warnings = self.store.len(),
                "Closed deprecation warning scope"
            );
        }
        ended
    }

    pub fn is_ended(&self) -> bool {
        self.store.is_closed()
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        self.end();
    }
}

impl std::fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScope")
            .field("store", &self.store)
            .finish()
    }
}

/// The store attached to the current task, if any.
pub fn current_store() -> Option<Arc<WarningStore>> {
    ACTIVE_WARNINGS.try_with(Arc::clone).ok()
}

pub fn current_request_id() -> Option<RequestId> {
    ACTIVE_WARNINGS.try_with(|store| store.owner()).ok()
}

pub fn is_active() -> bool {
    ACTIVE_WARNINGS.try_with(|_| ()).is_ok()
}

/// Wrap `fut` so it runs with the caller's current store.
///
/// The store is captured now, in the caller's context, not when the returned
/// future is first polled. Without an active store `fut` runs detached.
pub fn attach_to_child<F>(fut: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    attach_store(current_store(), fut)
}

/// Wrap `fut` so it runs with an explicitly supplied store.
pub fn attach_store<F>(
    store: Option<Arc<WarningStore>>,
    fut: F,
) -> impl Future<Output = F::Output>
where
    F: Future,
{
    async move {
        match store {
            Some(store) => ACTIVE_WARNINGS.scope(store, fut).await,
            None => fut.await,
        }
    }
}

/// Spawn a sub-request on the runtime, sharing the caller's store.
pub fn spawn_child<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(attach_to_child(fut))
}

/// Wrap a blocking closure so it runs with the caller's current store, on
/// whatever thread eventually executes it.
pub fn attach_blocking<F, R>(f: F) -> impl FnOnce() -> R
where
    F: FnOnce() -> R,
{
    let store = current_store();
    move || match store {
        Some(store) => ACTIVE_WARNINGS.sync_scope(store, f),
        None => f(),
    }
}

/// Run a blocking sub-request on tokio's blocking pool, sharing the caller's store.
pub fn spawn_blocking_child<F, R>(f: F) -> JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(attach_blocking(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(text: &str) {
        if let Some(store) = current_store() {
            store.record(text);
        }
    }

    #[test]
    fn test_no_scope_outside_request() {
        assert!(current_store().is_none());
        assert!(current_request_id().is_none());
        assert!(!is_active());
    }

    #[tokio::test]
    async fn test_run_attaches_and_restores() {
        let scope = begin_request().unwrap();
        let id = scope.request_id();

        let seen = scope.run(async { current_request_id() }).await;
        assert_eq!(seen, Some(id));
        assert!(!is_active());
    }

    #[tokio::test]
    async fn test_nested_begin_request_is_rejected() {
        let scope = begin_request().unwrap();
        let nested = scope.run(async { begin_request() }).await;
        assert!(matches!(nested, Err(WarningError::NestedRequest { .. })));
    }

    #[tokio::test]
    async fn test_plain_spawn_does_not_inherit() {
        let scope = begin_request().unwrap();
        let inherited = scope
            .run(async { tokio::spawn(async { is_active() }).await.unwrap() })
            .await;
        assert!(!inherited);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_spawn_child_shares_parent_store() {
        let scope = begin_request().unwrap();
        let id = scope.request_id();

        let child_ids = scope
            .run(async {
                let handles: Vec<_> = (0..8)
                    .map(|i| {
                        spawn_child(async move {
                            record(&format!("child {}", i));
                            current_request_id()
                        })
                    })
                    .collect();
                let mut ids = Vec::new();
                for handle in handles {
                    ids.push(handle.await.unwrap());
                }
                ids
            })
            .await;

        assert!(child_ids.iter().all(|seen| *seen == Some(id)));
        assert_eq!(scope.store().len(), 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spawn_blocking_child_shares_parent_store() {
        let scope = begin_request().unwrap();
        scope
            .run(async {
                spawn_blocking_child(|| record("from blocking pool"))
                    .await
                    .unwrap();
            })
            .await;
        assert!(scope.store().contains("from blocking pool"));
    }

    #[test]
    fn test_attach_blocking_on_plain_thread() {
        let scope = begin_request().unwrap();
        let job = scope.run_blocking(|| attach_blocking(|| record("from std thread")));
        std::thread::spawn(job).join().unwrap();
        assert!(scope.store().contains("from std thread"));
    }

    #[test]
    fn test_attach_without_scope_runs_detached() {
        let job = attach_blocking(is_active);
        assert!(!job());
    }

    #[test]
    fn test_end_is_idempotent_and_drop_ends() {
        let scope = begin_request().unwrap();
        let store = Arc::clone(scope.store());
        assert!(scope.end());
        assert!(!scope.end());
        assert!(scope.is_ended());

        let scope = begin_request().unwrap();
        let store2 = Arc::clone(scope.store());
        drop(scope);
        assert!(store.is_closed());
        assert!(store2.is_closed());
    }

    #[tokio::test]
    async fn test_cancelled_request_leaves_no_context() {
        let scope = begin_request().unwrap();
        let store = Arc::clone(scope.store());

        let timed_out = tokio::time::timeout(
            Duration::from_millis(20),
            scope.run(async {
                record("before abort");
                std::future::pending::<()>().await;
            }),
        )
        .await;
        assert!(timed_out.is_err());
        assert!(!is_active());

        drop(scope);
        assert!(store.is_closed());
        assert!(!store.record("straggler"));
        assert!(store.contains("before abort"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_reused_worker_sees_only_its_own_request() {
        let first = begin_request().unwrap();
        first.run(async { record("from first") }).await;
        first.end();

        let second = begin_request().unwrap();
        let leftover = second
            .run(async {
                let store = current_store().unwrap();
                store.contains("from first")
            })
            .await;
        assert!(!leftover);
        assert!(second.store().is_empty());
    }
}
