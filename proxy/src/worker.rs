//! Downstream side of the bridge, implemented by the embedding stratum server.

use crate::job::Job;
use serde_json::Value;
use std::sync::Arc;

/// A miner connected to this proxy
pub trait WorkerConnection: Send + Sync {
    fn name(&self) -> String;

    /// Extranonce1 this worker was handed at subscription
    fn extra_nonce_one_assigned(&self) -> String;

    fn notify(&self, job: &Arc<Job>);

    fn set_difficulty(&self, difficulty: f64);

    /// Ask the miner to reconnect; its nonce assignment is stale.
    fn reconnect(&self);
}

/// A pending `mining.submit` from a worker
pub trait SubmitRequest: Send + Sync {
    fn params(&self) -> &[Value];

    fn respond(&self, accepted: bool);

    fn responded(&self) -> bool;
}
