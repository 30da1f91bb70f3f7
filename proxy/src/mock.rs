//! Test doubles for the collaborators of a proxy pool.

use crate::errors::{ProxyError, ProxyResult, ShareError};
use crate::job::Job;
use crate::pool::PoolBase;
use crate::share::{Share, ShareStore};
use crate::upstream::UpstreamRpc;
use crate::worker::{SubmitRequest, WorkerConnection};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use sproxy_stratum::StratumResult;
use sproxy_stratum::protocol::{METHOD_AUTHORIZE, METHOD_SUBMIT, METHOD_SUBSCRIBE};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Upstream pool answering from scripted responses, with sensible defaults when none are queued
#[derive(Default)]
pub struct MockUpstream {
    responses: Mutex<HashMap<String, VecDeque<StratumResult<Value>>>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the answer to the next `method` call
    pub fn respond(&self, method: &str, response: StratumResult<Value>) {
        self.responses.lock().entry(method.to_string()).or_default().push_back(response);
    }

    pub fn calls_to(&self, method: &str) -> Vec<Vec<Value>> {
        self.calls.lock().iter().filter(|(called, _)| called == method).map(|(_, params)| params.clone()).collect()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn default_response(method: &str) -> Value {
        match method {
            METHOD_SUBSCRIBE => json!([[["mining.set_difficulty", "S1"], ["mining.notify", "S1"]], "ab", 4]),
            METHOD_AUTHORIZE | METHOD_SUBMIT => json!(true),
            _ => Value::Null,
        }
    }
}

#[async_trait]
impl UpstreamRpc for MockUpstream {
    fn connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> StratumResult<Value> {
        self.calls.lock().push((method.to_string(), params));
        let queued = self.responses.lock().get_mut(method).and_then(VecDeque::pop_front);
        queued.unwrap_or_else(|| Ok(Self::default_response(method)))
    }
}

pub struct MockWorker {
    name: String,
    extra_nonce_1: Mutex<String>,
    jobs: Mutex<Vec<String>>,
    difficulties: Mutex<Vec<f64>>,
    reconnects: AtomicUsize,
}

impl MockWorker {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            extra_nonce_1: Mutex::new(String::new()),
            jobs: Mutex::new(Vec::new()),
            difficulties: Mutex::new(Vec::new()),
            reconnects: AtomicUsize::new(0),
        })
    }

    pub fn assign(&self, extra_nonce_1: &str) {
        *self.extra_nonce_1.lock() = extra_nonce_1.to_string();
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.jobs.lock().clone()
    }

    pub fn difficulties(&self) -> Vec<f64> {
        self.difficulties.lock().clone()
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }
}

impl WorkerConnection for MockWorker {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn extra_nonce_one_assigned(&self) -> String {
        self.extra_nonce_1.lock().clone()
    }

    fn notify(&self, job: &Arc<Job>) {
        self.jobs.lock().push(job.id.clone());
    }

    fn set_difficulty(&self, difficulty: f64) {
        self.difficulties.lock().push(difficulty);
    }

    fn reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockRequest {
    params: Vec<Value>,
    responses: Mutex<Vec<bool>>,
}

impl MockRequest {
    pub fn new(params: Vec<Value>) -> Self {
        Self { params, responses: Mutex::new(Vec::new()) }
    }

    /// `mining.submit` parameters in the usual order
    pub fn submit(worker: &str, job_id: &str, extra_nonce_2: &str) -> Self {
        Self::new(vec![json!(worker), json!(job_id), json!(extra_nonce_2), json!("5f5e1000"), json!("deadbeef")])
    }

    pub fn responses(&self) -> Vec<bool> {
        self.responses.lock().clone()
    }
}

impl SubmitRequest for MockRequest {
    fn params(&self) -> &[Value] {
        &self.params
    }

    fn respond(&self, accepted: bool) {
        self.responses.lock().push(accepted);
    }

    fn responded(&self) -> bool {
        !self.responses.lock().is_empty()
    }
}

/// Base pool whose shares all reach `share_difficulty` and whose workers get `base_difficulty`
pub struct MockPoolBase {
    workers: Mutex<Vec<Arc<dyn WorkerConnection>>>,
    base_difficulty: Mutex<f64>,
    share_difficulty: Mutex<f64>,
    started: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    panic_on_submit: AtomicBool,
}

impl MockPoolBase {
    pub fn new(base_difficulty: f64) -> Arc<Self> {
        Arc::new(Self {
            workers: Mutex::new(Vec::new()),
            base_difficulty: Mutex::new(base_difficulty),
            share_difficulty: Mutex::new(base_difficulty),
            started: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            panic_on_submit: AtomicBool::new(false),
        })
    }

    pub fn set_share_difficulty(&self, difficulty: f64) {
        *self.share_difficulty.lock() = difficulty;
    }

    pub fn panic_on_submit(&self) {
        self.panic_on_submit.store(true, Ordering::SeqCst);
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl PoolBase for MockPoolBase {
    fn workers(&self) -> Vec<Arc<dyn WorkerConnection>> {
        self.workers.lock().clone()
    }

    fn register(&self, worker: &Arc<dyn WorkerConnection>) {
        self.workers.lock().push(worker.clone());
    }

    fn compute_difficulty(&self, _worker: &dyn WorkerConnection) -> f64 {
        *self.base_difficulty.lock()
    }

    fn submit(
        &self,
        worker: &dyn WorkerConnection,
        request: &dyn SubmitRequest,
        job: Option<&Arc<Job>>,
    ) -> Result<Option<Share>, ShareError> {
        if self.panic_on_submit.load(Ordering::SeqCst) {
            panic!("validator bug");
        }
        let Some(job) = job else {
            return Ok(None);
        };
        let extra_nonce_2 = request.params().get(2).and_then(Value::as_str).unwrap_or_default();
        let nonce = request.params().get(4).and_then(Value::as_str).unwrap_or_default();
        let share = Share::new(job.id.clone(), format!("{}-{}", extra_nonce_2, nonce), worker.name(), *self.share_difficulty.lock())
            .with_extra_nonce_2(extra_nonce_2);
        Ok(Some(share))
    }

    fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MemoryShareStore {
    saved: Mutex<Vec<Share>>,
    failing: AtomicBool,
}

impl MemoryShareStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn saved(&self) -> Vec<Share> {
        self.saved.lock().clone()
    }

    pub fn fail_saves(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

impl ShareStore for MemoryShareStore {
    fn save(&self, share: &Share) -> ProxyResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProxyError::Store("disk full".to_string()));
        }
        self.saved.lock().push(share.clone());
        Ok(())
    }
}
