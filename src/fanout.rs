//! Scatter/gather over shard sub-requests.
//!
//! Every sub-request is spawned as its own task and inherits the parent
//! request's warning store, so deprecations raised on any shard roll up into
//! the one response.

use crate::context::spawn_child;
use crate::error::{Result, WarningError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Address of one shard-level sub-request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardTarget {
    pub index: String,
    pub shard: u32,
}

impl ShardTarget {
    pub fn new(index: impl Into<String>, shard: u32) -> Self {
        Self {
            index: index.into(),
            shard,
        }
    }
}

impl fmt::Display for ShardTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.index, self.shard)
    }
}

/// Local handler for one shard sub-request.
#[async_trait]
pub trait ShardHandler: Send + Sync + 'static {
    async fn handle(&self, target: &ShardTarget) -> Result<Value>;
}

/// Result of one sub-request.
#[derive(Debug)]
pub struct ShardOutcome {
    pub target: ShardTarget,
    pub result: Result<Value>,
}

impl ShardOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Sub-requests not yet joined. Aborted if the gather is dropped.
struct Pending(VecDeque<(ShardTarget, JoinHandle<Result<Value>>)>);

impl Drop for Pending {
    fn drop(&mut self) {
        for (_, handle) in &self.0 {
            handle.abort();
        }
    }
}

/// Run `handler` once per target concurrently and wait for all of them.
///
/// Outcomes are returned in target order. A failed or panicked sub-request
/// does not affect the others, nor the warnings they recorded.
pub async fn scatter_gather<H>(handler: Arc<H>, targets: Vec<ShardTarget>) -> Vec<ShardOutcome>
where
    H: ShardHandler,
{
    debug!(shards = targets.len(), "Scattering sub-requests");

    let mut pending = Pending(
        targets
            .into_iter()
            .map(|target| {
                let handler = Arc::clone(&handler);
                let child_target = target.clone();
                let handle = spawn_child(async move { handler.handle(&child_target).await });
                (target, handle)
            })
            .collect(),
    );

    let mut outcomes = Vec::with_capacity(pending.0.len());
    loop {
        let Some((_, handle)) = pending.0.front_mut() else {
            break;
        };
        let joined = handle.await;
        let Some((target, _)) = pending.0.pop_front() else {
            break;
        };

        let result = match joined {
            Ok(result) => result,
            Err(e) => Err(WarningError::SubRequestFailed {
                shard: target.to_string(),
                reason: e.to_string(),
            }),
        };
        if let Err(e) = &result {
            warn!(shard = %target, error = %e, "Sub-request failed");
        }
        outcomes.push(ShardOutcome { target, result });
    }

    debug!(
        shards = outcomes.len(),
        failed = outcomes.iter().filter(|o| !o.is_ok()).count(),
        "Gathered sub-requests"
    );
    outcomes
}
