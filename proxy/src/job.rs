//! Upstream jobs and the ordered history used to validate late shares.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use sproxy_stratum::StratumError;
use std::sync::Arc;

/// A `mining.notify` job. The parameters are relayed to workers untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    pub clean_jobs: bool,
    pub params: Vec<Value>,
    /// Name of the proxy pool that received the job
    pub pool_name: Option<String>,
}

impl Job {
    /// Build a job from `mining.notify` parameters: the id comes first, the clean-jobs flag last.
    pub fn from_notify_params(params: Vec<Value>) -> Result<Self, StratumError> {
        let id = match params.first() {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(StratumError::InvalidMessage(format!("mining.notify without job id: {:?}", params))),
        };
        if params.len() < 2 {
            return Err(StratumError::InvalidMessage(format!("mining.notify for job {} has no clean-jobs flag", id)));
        }
        let clean_jobs = params.last().and_then(Value::as_bool).ok_or_else(|| {
            StratumError::InvalidMessage(format!("mining.notify for job {} ends with a non-boolean clean-jobs flag", id))
        })?;

        Ok(Self { id, clean_jobs, params, pool_name: None })
    }

    pub fn tagged(mut self, pool_name: &str) -> Self {
        self.pool_name = Some(pool_name.to_string());
        self
    }
}

#[derive(Debug, Clone)]
struct JobEntry {
    job: Arc<Job>,
    /// Pool difficulty active when the job arrived, `None` if the pool had not sent one yet
    pool_difficulty: Option<f64>,
}

/// Jobs in arrival order, each with the pool difficulty recorded at receipt.
///
/// Jobs and their difficulties live in the same entry, so they always leave the history together.
#[derive(Debug, Clone)]
pub struct JobHistory {
    entries: IndexMap<String, JobEntry>,
    capacity: usize,
    current: Option<Arc<Job>>,
}

impl JobHistory {
    pub fn new(capacity: usize) -> Self {
        Self { entries: IndexMap::new(), capacity: capacity.max(1), current: None }
    }

    /// Record `job` as the newest entry and the current job.
    ///
    /// A repeated job id moves to the newest position but keeps the difficulty recorded first.
    pub fn insert(&mut self, job: Arc<Job>, pool_difficulty: Option<f64>) {
        let pool_difficulty = match self.entries.shift_remove(&job.id) {
            Some(previous) => previous.pool_difficulty,
            None => pool_difficulty,
        };
        self.entries.insert(job.id.clone(), JobEntry { job: job.clone(), pool_difficulty });
        self.current = Some(job);
    }

    /// Drop the oldest entries until the history fits its capacity. Returns the evicted ids.
    pub fn evict_overflow(&mut self) -> Vec<String> {
        let excess = self.entries.len().saturating_sub(self.capacity);
        self.entries.drain(..excess).map(|(id, _)| id).collect()
    }

    /// Keep only the `count` newest entries.
    pub fn retain_newest(&mut self, count: usize) {
        let excess = self.entries.len().saturating_sub(count);
        self.entries.drain(..excess);
    }

    /// Drop every entry inserted before `job_id`. No-op if `job_id` is no longer present.
    pub fn drop_before(&mut self, job_id: &str) -> usize {
        match self.entries.get_index_of(job_id) {
            Some(index) => self.entries.drain(..index).count(),
            None => 0,
        }
    }

    pub fn get(&self, job_id: &str) -> Option<&Arc<Job>> {
        self.entries.get(job_id).map(|entry| &entry.job)
    }

    /// Pool difficulty recorded for `job_id`. `None` if the job is not retained or arrived before
    /// the pool announced any difficulty.
    pub fn pool_difficulty(&self, job_id: &str) -> Option<f64> {
        self.entries.get(job_id).and_then(|entry| entry.pool_difficulty)
    }

    pub fn current(&self) -> Option<&Arc<Job>> {
        self.current.as_ref()
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.entries.contains_key(job_id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
