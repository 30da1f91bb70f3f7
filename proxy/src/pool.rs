use crate::errors::ShareError;
use crate::job::Job;
use crate::share::Share;
use crate::worker::{SubmitRequest, WorkerConnection};
use serde::Serialize;
use std::sync::Arc;

/// Everything a worker needs to start mining after `mining.subscribe`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerSubscription {
    pub extra_nonce_1: String,
    pub extra_nonce_2_size: usize,
    pub difficulty: f64,
    pub job: Option<Arc<Job>>,
}

/// Generic pool behaviour the proxy composes with: worker bookkeeping, share validation against the
/// worker's own difficulty, and per-worker difficulty.
pub trait PoolBase: Send + Sync {
    fn workers(&self) -> Vec<Arc<dyn WorkerConnection>>;

    /// Track a newly subscribed worker
    fn register(&self, worker: &Arc<dyn WorkerConnection>);

    /// Difficulty the base algorithm would assign `worker`
    fn compute_difficulty(&self, worker: &dyn WorkerConnection) -> f64;

    /// Build and validate a share from a submission. `Ok(None)` is a worker-level rejection.
    fn submit(&self, worker: &dyn WorkerConnection, request: &dyn SubmitRequest, job: Option<&Arc<Job>>)
    -> Result<Option<Share>, ShareError>;

    /// Open downstream acceptance
    fn start(&self);

    fn stop(&self);

    fn is_started(&self) -> bool;
}
