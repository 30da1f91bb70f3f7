use crate::errors::ProxyResult;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolResult {
    #[default]
    Unknown,
    Accepted,
    Rejected,
}

impl Display for PoolResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PoolResult::Unknown => write!(f, "unknown"),
            PoolResult::Accepted => write!(f, "accepted"),
            PoolResult::Rejected => write!(f, "rejected"),
        }
    }
}

/// A share validated against the worker's own difficulty, plus what the upstream pool made of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Share {
    pub job_id: String,
    /// Identity of the solution (typically the block hash), used for logs and persistence
    pub ident: String,
    pub worker_name: String,
    pub pool_name: Option<String>,
    /// Difficulty the solution actually reaches
    pub difficulty: f64,
    /// Extranonce2 as submitted by the worker
    pub extra_nonce_2: String,
    pub pool_result: PoolResult,
    pub reject_reason: Option<String>,
}

impl Share {
    pub fn new(job_id: impl Into<String>, ident: impl Into<String>, worker_name: impl Into<String>, difficulty: f64) -> Self {
        Self {
            job_id: job_id.into(),
            ident: ident.into(),
            worker_name: worker_name.into(),
            pool_name: None,
            difficulty,
            extra_nonce_2: String::new(),
            pool_result: PoolResult::Unknown,
            reject_reason: None,
        }
    }

    pub fn with_extra_nonce_2(mut self, extra_nonce_2: impl Into<String>) -> Self {
        self.extra_nonce_2 = extra_nonce_2.into();
        self
    }

    pub fn matches_difficulty(&self, target: f64) -> bool {
        self.difficulty >= target
    }

    /// Structural validity required before persisting
    pub fn is_valid(&self) -> bool {
        !self.job_id.is_empty() && !self.ident.is_empty() && !self.worker_name.is_empty() && self.difficulty.is_finite() && self.difficulty > 0.0
    }

    pub fn mark_accepted(&mut self) {
        self.pool_result = PoolResult::Accepted;
        self.reject_reason = None;
    }

    pub fn mark_rejected(&mut self, reason: impl Into<String>) {
        self.pool_result = PoolResult::Rejected;
        self.reject_reason = Some(reason.into());
    }
}

/// Share handle returned to the caller of `submit`; the upstream verdict is written into it later.
pub type SharedShare = Arc<Mutex<Share>>;

/// Persistence of share records, implemented by the embedding application.
pub trait ShareStore: Send + Sync {
    fn save(&self, share: &Share) -> ProxyResult<()>;
}
