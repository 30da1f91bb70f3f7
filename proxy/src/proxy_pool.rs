//! The proxy bridge.
//!
//! A `ProxyPool` holds one session with an upstream pool and serves the workers of a base pool
//! from it. Upstream client events are consumed by a single pump task in arrival order; the
//! subscribe/authorize handshake runs inline in that task, so jobs and difficulty changes are
//! never applied ahead of the session they belong to.

use crate::app_config::{ProxyPoolConfig, ProxySettings};
use crate::constants::DEFAULT_PROTOCOL_VERSION;
use crate::difficulty::{effective_difficulty, pool_difficulty_from_raw};
use crate::endpoint::{EndpointSpec, UpstreamEndpoint};
use crate::errors::{ProxyError, ProxyResult, ShareError};
use crate::events::{EventBus, ProxyEvent};
use crate::job::{Job, JobHistory};
use crate::lifecycle::LifecycleState;
use crate::nonce::{NonceSplit, allocate_proxy_nonce, compose_extranonce1, full_extranonce2};
use crate::pool::{PoolBase, WorkerSubscription};
use crate::share::{ShareStore, SharedShare};
use crate::upstream::{SessionChange, UpstreamRpc, UpstreamSession};
use crate::worker::{SubmitRequest, WorkerConnection};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use sproxy_stratum::protocol::{METHOD_NOTIFY, METHOD_SET_DIFFICULTY};
use sproxy_stratum::{ClientConfig, ClientEvent, MiningSubmitParams, StratumClient};
use std::any::Any;
use std::future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span};

struct JobState {
    history: JobHistory,
    /// Pool difficulty from the last `mining.set_difficulty`
    next_difficulty: Option<f64>,
    grace_timer: Option<JoinHandle<()>>,
    grace_generation: u64,
}

struct Lifecycle {
    state: LifecycleState,
    /// Set by an explicit `stop()`, cleared by `start()`; no retry is scheduled while set
    halted: bool,
    /// Consecutive authentication timeouts since the last successful authorization
    attempts: u32,
    watchdog: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

type ClientEvents = Arc<Mutex<mpsc::UnboundedReceiver<ClientEvent>>>;

/// Point-in-time view of a proxy pool for reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyStats {
    pub name: String,
    pub upstream: String,
    pub state: LifecycleState,
    pub authenticated: bool,
    pub session_id: Option<String>,
    pub extra_nonce_1: Option<String>,
    pub split: NonceSplit,
    pub next_difficulty: Option<f64>,
    pub current_job: Option<String>,
    pub retained_jobs: usize,
    pub workers: usize,
    pub accepted_shares: u64,
    pub rejected_shares: u64,
}

pub struct ProxyPool {
    name: String,
    session: UpstreamSession,
    base: Arc<dyn PoolBase>,
    store: Arc<dyn ShareStore>,
    settings: ProxySettings,
    events: EventBus,
    jobs: Mutex<JobState>,
    lifecycle: Mutex<Lifecycle>,
    /// Polled by the pump task; drained by `start()` so a restart never sees the old connection's events
    client_events: ClientEvents,
    accepted_shares: AtomicU64,
    rejected_shares: AtomicU64,
    span: Span,
}

impl ProxyPool {
    /// Proxy for any of the accepted construction inputs, with default settings unless a
    /// configuration object is given.
    pub fn new(spec: EndpointSpec, base: Arc<dyn PoolBase>, store: Arc<dyn ShareStore>) -> ProxyResult<Arc<Self>> {
        match spec {
            EndpointSpec::Config(config) => Self::from_config(&config, base, store),
            other => {
                let endpoint = other.resolve()?;
                Ok(Self::connect_to(endpoint.host.clone(), endpoint, ProxySettings::default(), base, store))
            }
        }
    }

    pub fn from_config(config: &ProxyPoolConfig, base: Arc<dyn PoolBase>, store: Arc<dyn ShareStore>) -> ProxyResult<Arc<Self>> {
        let endpoint = config.endpoint()?;
        let name = config.resolved_name()?;
        let settings = config.settings()?;
        Ok(Self::connect_to(name, endpoint, settings, base, store))
    }

    /// Proxy speaking stratum over TCP to `endpoint`
    pub fn connect_to(
        name: String,
        endpoint: UpstreamEndpoint,
        settings: ProxySettings,
        base: Arc<dyn PoolBase>,
        store: Arc<dyn ShareStore>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client_config = ClientConfig {
            host: endpoint.host.clone(),
            port: endpoint.port,
            reconnect_delay: settings.reconnect_delay,
            request_timeout: settings.request_timeout,
        };
        let client = Arc::new(StratumClient::new(client_config, events_tx));
        Self::with_upstream(name, endpoint, settings, client, events_rx, base, store)
    }

    /// Proxy over an arbitrary upstream transport whose connection events arrive on `client_events`.
    ///
    /// The log span is created as a child of the caller's current span.
    pub fn with_upstream(
        name: String,
        endpoint: UpstreamEndpoint,
        settings: ProxySettings,
        rpc: Arc<dyn UpstreamRpc>,
        client_events: mpsc::UnboundedReceiver<ClientEvent>,
        base: Arc<dyn PoolBase>,
        store: Arc<dyn ShareStore>,
    ) -> Arc<Self> {
        let span = tracing::info_span!("proxy_pool", pool = %name, upstream = %endpoint.address());
        let version = settings.version.clone().unwrap_or_else(|| DEFAULT_PROTOCOL_VERSION.to_string());
        let jobs = JobState {
            history: JobHistory::new(settings.job_history_capacity),
            next_difficulty: None,
            grace_timer: None,
            grace_generation: 0,
        };
        let lifecycle = Lifecycle {
            state: LifecycleState::Stopped,
            halted: false,
            attempts: 0,
            watchdog: None,
            retry: None,
            pump: None,
        };

        Arc::new(Self {
            name,
            session: UpstreamSession::new(endpoint, version, rpc),
            base,
            store,
            settings,
            events: EventBus::new(),
            jobs: Mutex::new(jobs),
            lifecycle: Mutex::new(lifecycle),
            client_events: Arc::new(Mutex::new(client_events)),
            accepted_shares: AtomicU64::new(0),
            rejected_shares: AtomicU64::new(0),
            span,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &UpstreamEndpoint {
        self.session.endpoint()
    }

    pub fn host(&self) -> &str {
        &self.endpoint().host
    }

    pub fn port(&self) -> u16 {
        self.endpoint().port
    }

    pub fn username(&self) -> &str {
        &self.endpoint().username
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.lock().state
    }

    pub fn is_started(&self) -> bool {
        self.state().is_started()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn version(&self) -> String {
        self.session.version()
    }

    /// Protocol version announced on the next `mining.subscribe`
    pub fn set_version(&self, version: impl Into<String>) {
        self.session.set_version(version);
    }

    /// Subscription list of the last `mining.subscribe` result
    pub fn notifications(&self) -> Value {
        self.session.snapshot().notifications
    }

    pub fn extra_nonce_1(&self) -> Option<String> {
        self.session.snapshot().extra_nonce_1
    }

    pub fn extra_nonce_2_size(&self) -> Option<usize> {
        self.session.snapshot().extra_nonce_2_size
    }

    pub fn nonce_split(&self) -> NonceSplit {
        self.session.snapshot().split
    }

    pub fn accepted_shares(&self) -> u64 {
        self.accepted_shares.load(Ordering::Relaxed)
    }

    pub fn rejected_shares(&self) -> u64 {
        self.rejected_shares.load(Ordering::Relaxed)
    }

    pub fn next_difficulty(&self) -> Option<f64> {
        self.jobs.lock().next_difficulty
    }

    /// Pool difficulty recorded when `job_id` was received
    pub fn pool_difficulty(&self, job_id: &str) -> Option<f64> {
        self.jobs.lock().history.pool_difficulty(job_id)
    }

    pub fn current_job(&self) -> Option<Arc<Job>> {
        self.jobs.lock().history.current().cloned()
    }

    /// Retained job ids, oldest first
    pub fn job_ids(&self) -> Vec<String> {
        self.jobs.lock().history.ids()
    }

    pub fn stats(&self) -> ProxyStats {
        let session = self.session.snapshot();
        let (next_difficulty, current_job, retained_jobs) = {
            let jobs = self.jobs.lock();
            (jobs.next_difficulty, jobs.history.current().map(|job| job.id.clone()), jobs.history.len())
        };
        ProxyStats {
            name: self.name.clone(),
            upstream: self.endpoint().address(),
            state: self.state(),
            authenticated: session.authenticated,
            session_id: session.session_id,
            extra_nonce_1: session.extra_nonce_1,
            split: session.split,
            next_difficulty,
            current_job,
            retained_jobs,
            workers: self.base.workers().len(),
            accepted_shares: self.accepted_shares(),
            rejected_shares: self.rejected_shares(),
        }
    }

    /// Connect upstream and arm the authentication watchdog. No-op while started.
    ///
    /// Must be called from within a tokio runtime; otherwise an `Error` event is emitted and the
    /// proxy stays stopped.
    pub fn start(self: &Arc<Self>) {
        let _entered = self.span.enter();
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state.is_started() {
            tracing::debug!("[LIFECYCLE] already started");
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                drop(lifecycle);
                self.emit_error(format!("Cannot start outside a tokio runtime: {}", e));
                return;
            }
        };

        lifecycle.halted = false;
        if let Some(retry) = lifecycle.retry.take() {
            retry.abort();
        }
        let stale = self.drain_client_events();
        if stale > 0 {
            tracing::debug!("[LIFECYCLE] dropped {} events of the previous connection", stale);
        }
        if lifecycle.pump.is_none() {
            let pump = Self::pump(Arc::downgrade(self), self.client_events.clone()).instrument(self.span.clone());
            lifecycle.pump = Some(runtime.spawn(pump));
        }

        lifecycle.state = LifecycleState::Starting;
        tracing::info!("[LIFECYCLE] connecting to {}", self.endpoint().address());
        self.session.connect();
        lifecycle.state = LifecycleState::AwaitingAuth;
        self.arm_watchdog(&mut lifecycle);
    }

    /// Close the upstream session and cancel pending retries. No-op while stopped.
    pub fn stop(&self) {
        let _entered = self.span.enter();
        {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.halted = true;
            lifecycle.attempts = 0;
            for timer in [lifecycle.watchdog.take(), lifecycle.retry.take()].into_iter().flatten() {
                timer.abort();
            }
        }
        self.shutdown();
    }

    /// Difficulty for `worker`: the base pool's choice, capped by the pool difficulty
    pub fn compute_difficulty(&self, worker: &dyn WorkerConnection) -> f64 {
        effective_difficulty(self.base.compute_difficulty(worker), self.next_difficulty())
    }

    /// Register a worker and hand it its share of the upstream extranonce space.
    pub fn subscribe(&self, worker: &Arc<dyn WorkerConnection>) -> ProxyResult<WorkerSubscription> {
        let _entered = self.span.enter();
        let (upstream_extranonce1, split) = self.session.nonce_space().ok_or(ProxyError::SessionNotEstablished)?;
        let proxy_nonce = allocate_proxy_nonce(split.proxy_size);

        self.base.register(worker);
        let subscription = WorkerSubscription {
            extra_nonce_1: compose_extranonce1(&upstream_extranonce1, &proxy_nonce),
            extra_nonce_2_size: split.worker_size,
            difficulty: self.compute_difficulty(worker.as_ref()),
            job: self.current_job(),
        };
        tracing::debug!(
            "[SUBSCRIBE] {} got extranonce1={}, extranonce2_size={}, difficulty={}",
            worker.name(),
            subscription.extra_nonce_1,
            subscription.extra_nonce_2_size,
            subscription.difficulty
        );
        Ok(subscription)
    }

    /// Admit a worker's share and forward it upstream when it also meets the pool difficulty
    /// recorded for its job.
    ///
    /// Returns the locally validated share without waiting for the upstream verdict, which is
    /// written into the returned handle once it arrives. `None` means the submission was
    /// rejected; the request has then been answered with `false`.
    pub fn submit(self: &Arc<Self>, worker: &Arc<dyn WorkerConnection>, request: &dyn SubmitRequest) -> Option<SharedShare> {
        let _entered = self.span.enter();
        let admitted = match self.admit(worker, request) {
            Ok(share) => share,
            Err(ShareError::MalformedArgument(reason)) => {
                tracing::warn!("[SHARE] malformed submission from {}: {} (params: {:?})", worker.name(), reason, request.params());
                None
            }
            Err(ShareError::Internal(reason)) => {
                tracing::error!("[SHARE] failed to handle submission from {}: {} (params: {:?})", worker.name(), reason, request.params());
                None
            }
        };

        if admitted.is_none() && !request.responded() {
            request.respond(false);
        }
        admitted
    }

    fn admit(self: &Arc<Self>, worker: &Arc<dyn WorkerConnection>, request: &dyn SubmitRequest) -> Result<Option<SharedShare>, ShareError> {
        let job = request.params().get(1).and_then(Value::as_str).and_then(|job_id| self.jobs.lock().history.get(job_id).cloned());
        let validated = panic::catch_unwind(AssertUnwindSafe(|| self.base.submit(worker.as_ref(), request, job.as_ref())))
            .map_err(|payload| ShareError::Internal(format!("share validation panicked: {}", panic_message(&*payload))))?;
        let Some(mut share) = validated? else {
            tracing::debug!("[SHARE] submission from {} rejected by the base pool", worker.name());
            return Ok(None);
        };

        let params = MiningSubmitParams::try_from(request.params()).map_err(ShareError::MalformedArgument)?;
        share.pool_name.get_or_insert_with(|| self.name.clone());

        let pool_difficulty = self.pool_difficulty(&params.job_id);
        let forward = pool_difficulty.is_some_and(|target| share.matches_difficulty(target));
        let share: SharedShare = Arc::new(Mutex::new(share));
        if forward {
            self.forward(worker.as_ref(), params, &share)?;
        } else {
            tracing::debug!(
                "[SHARE] job {} from {} kept local (pool difficulty {:?})",
                params.job_id,
                worker.name(),
                pool_difficulty
            );
        }
        Ok(Some(share))
    }

    fn forward(self: &Arc<Self>, worker: &dyn WorkerConnection, params: MiningSubmitParams, share: &SharedShare) -> Result<(), ShareError> {
        let (upstream_extranonce1, split) =
            self.session.nonce_space().ok_or_else(|| ShareError::Internal(ProxyError::SessionNotEstablished.to_string()))?;
        let extra_nonce_2 = full_extranonce2(&worker.extra_nonce_one_assigned(), &upstream_extranonce1, split, &params.extra_nonce_2)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| ShareError::Internal(e.to_string()))?;

        let pool = self.clone();
        let share = share.clone();
        let worker_name = worker.name();
        let submission = async move {
            let response = pool.session.submit(&params.job_id, &extra_nonce_2, &params.ntime, &params.nonce).await;
            pool.record_pool_response(&worker_name, &share, response);
        };
        runtime.spawn(submission.instrument(self.span.clone()));
        Ok(())
    }

    fn record_pool_response(&self, worker_name: &str, share: &SharedShare, response: ProxyResult<bool>) {
        let snapshot = {
            let mut share = share.lock();
            match response {
                Ok(true) => {
                    self.accepted_shares.fetch_add(1, Ordering::Relaxed);
                    share.mark_accepted();
                    tracing::info!("[SHARE] accepted upstream: job {} from {} (difficulty {})", share.job_id, worker_name, share.difficulty);
                }
                Ok(false) => {
                    self.rejected_shares.fetch_add(1, Ordering::Relaxed);
                    share.mark_rejected("rejected by pool");
                    tracing::warn!("[SHARE] rejected upstream: job {} from {}", share.job_id, worker_name);
                }
                Err(e) => {
                    self.rejected_shares.fetch_add(1, Ordering::Relaxed);
                    share.mark_rejected(e.to_string());
                    tracing::warn!("[SHARE] rejected upstream: job {} from {}: {}", share.job_id, worker_name, e);
                }
            }
            share.clone()
        };

        if !snapshot.is_valid() {
            let json = serde_json::to_string(&snapshot).unwrap_or_else(|_| format!("{:?}", snapshot));
            tracing::error!("[SHARE] refusing to save invalid share from {}: {}", worker_name, json);
            return;
        }
        if let Err(e) = self.store.save(&snapshot) {
            tracing::error!("[SHARE] failed to save share {} from {}: {}", snapshot.ident, worker_name, e);
        }
    }

    async fn pump(pool: Weak<Self>, client_events: ClientEvents) {
        while let Some(event) = future::poll_fn(|cx| client_events.lock().poll_recv(cx)).await {
            let Some(pool) = pool.upgrade() else {
                break;
            };
            pool.handle_client_event(event).await;
        }
    }

    async fn handle_client_event(self: &Arc<Self>, event: ClientEvent) {
        if !self.is_started() {
            tracing::trace!("[UPSTREAM] dropping {:?} while stopped", event);
            return;
        }

        match event {
            ClientEvent::Connected => {
                tracing::debug!("[UPSTREAM] connected");
                self.authenticate().await;
            }
            ClientEvent::Reconnected => {
                tracing::info!("[UPSTREAM] reconnected");
                self.session.mark_unauthenticated();
                self.authenticate().await;
            }
            ClientEvent::Disconnected => self.on_disconnected(),
            ClientEvent::Notification { method, params } => match method.as_str() {
                METHOD_NOTIFY => match Job::from_notify_params(params) {
                    Ok(job) => self.on_pool_notify(job),
                    Err(e) => self.emit_error(format!("Bad {}: {}", METHOD_NOTIFY, e)),
                },
                METHOD_SET_DIFFICULTY => match params.first().and_then(Value::as_f64) {
                    Some(raw) if raw.is_finite() && raw >= 0.0 => self.on_pool_set_difficulty(raw),
                    _ => tracing::warn!("[DIFFICULTY] ignoring {} with params {:?}", METHOD_SET_DIFFICULTY, params),
                },
                other => tracing::debug!("[UPSTREAM] unhandled notification {}", other),
            },
        }
    }

    async fn authenticate(self: &Arc<Self>) {
        match self.session.subscribe().await {
            Ok(SessionChange::New(_)) => {
                let workers = self.base.workers();
                if !workers.is_empty() {
                    tracing::info!("[UPSTREAM] extranonce space changed, reconnecting {} workers", workers.len());
                }
                for worker in workers {
                    worker.reconnect();
                }
            }
            Ok(SessionChange::Resumed) => {}
            Err(e) => {
                self.fail(format!("During subscription: {}", e));
                return;
            }
        }

        match self.session.authorize().await {
            Ok(()) => self.on_authorized(),
            Err(ProxyError::NotAuthorized) => self.fail("not authorized".to_string()),
            Err(e) => self.fail(format!("During authorization: {}", e)),
        }
    }

    fn on_authorized(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if !lifecycle.state.is_started() {
                self.session.mark_unauthenticated();
                tracing::debug!("[UPSTREAM] authorized after stop, ignoring");
                return;
            }
            if let Some(watchdog) = lifecycle.watchdog.take() {
                watchdog.abort();
            }
            lifecycle.state = LifecycleState::Running;
            lifecycle.attempts = 0;
        }

        tracing::info!("[UPSTREAM] authorized as {}", self.endpoint().username);
        if !self.base.is_started() {
            self.base.start();
            self.events.emit(&ProxyEvent::Started);
        }
    }

    fn on_disconnected(self: &Arc<Self>) {
        self.session.mark_unauthenticated();
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == LifecycleState::Running {
            tracing::warn!("[UPSTREAM] disconnected, waiting for the session to come back");
            lifecycle.state = LifecycleState::AwaitingAuth;
            self.arm_watchdog(&mut lifecycle);
        }
    }

    fn on_pool_notify(self: &Arc<Self>, job: Job) {
        let job = Arc::new(job.tagged(&self.name));
        let workers = self.base.workers();
        for worker in &workers {
            worker.notify(&job);
        }

        let mut jobs = self.jobs.lock();
        let pool_difficulty = jobs.next_difficulty;
        jobs.history.insert(job.clone(), pool_difficulty);

        if job.clean_jobs {
            if let Some(timer) = jobs.grace_timer.take() {
                timer.abort();
            }
            jobs.history.retain_newest(2);
            jobs.grace_generation += 1;

            let generation = jobs.grace_generation;
            let grace = self.settings.clean_jobs_grace;
            let job_id = job.id.clone();
            let pool = Arc::downgrade(self);
            let expiry = async move {
                tokio::time::sleep(grace).await;
                if let Some(pool) = pool.upgrade() {
                    pool.expire_grace_window(generation, &job_id);
                }
            };
            jobs.grace_timer = Some(tokio::spawn(expiry.instrument(self.span.clone())));
        } else {
            let evicted = jobs.history.evict_overflow();
            if !evicted.is_empty() {
                tracing::trace!("[JOB] evicted {:?}", evicted);
            }
        }

        tracing::debug!(
            "[JOB] {} (clean: {}) sent to {} workers, {} jobs retained, pool difficulty {:?}",
            job.id,
            job.clean_jobs,
            workers.len(),
            jobs.history.len(),
            pool_difficulty
        );
    }

    /// Drop the jobs superseded by clean job `job_id`, unless a newer clean job took over.
    fn expire_grace_window(&self, generation: u64, job_id: &str) {
        let mut jobs = self.jobs.lock();
        if jobs.grace_generation != generation {
            return;
        }
        jobs.grace_timer = None;
        let dropped = jobs.history.drop_before(job_id);
        tracing::trace!("[JOB] grace window of {} over, dropped {} jobs", job_id, dropped);
    }

    fn on_pool_set_difficulty(&self, raw: f64) {
        let difficulty = pool_difficulty_from_raw(raw);
        self.jobs.lock().next_difficulty = Some(difficulty);

        let workers = self.base.workers();
        for worker in &workers {
            worker.set_difficulty(self.compute_difficulty(worker.as_ref()));
        }
        tracing::info!("[DIFFICULTY] pool difficulty {} (raw {}), {} workers updated", difficulty, raw, workers.len());
    }

    fn arm_watchdog(self: &Arc<Self>, lifecycle: &mut Lifecycle) {
        if let Some(previous) = lifecycle.watchdog.take() {
            previous.abort();
        }
        let timeout = self.settings.auth_timeout;
        let pool = Arc::downgrade(self);
        let watchdog = async move {
            tokio::time::sleep(timeout).await;
            if let Some(pool) = pool.upgrade() {
                pool.on_auth_timeout();
            }
        };
        lifecycle.watchdog = Some(tokio::spawn(watchdog.instrument(self.span.clone())));
    }

    fn on_auth_timeout(self: &Arc<Self>) {
        if self.session.is_authenticated() {
            return;
        }
        tracing::error!("[LIFECYCLE] not authenticated after {:?}, restarting", self.settings.auth_timeout);
        self.shutdown();

        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.halted {
            return;
        }
        lifecycle.attempts += 1;
        let attempts = lifecycle.attempts;
        match self.settings.retry.delay_for(attempts) {
            Some(delay) => {
                tracing::info!("[LIFECYCLE] retry {} in {:?}", attempts, delay);
                let pool = Arc::downgrade(self);
                let retry = async move {
                    tokio::time::sleep(delay).await;
                    if let Some(pool) = pool.upgrade() {
                        pool.retry_start();
                    }
                };
                lifecycle.retry = Some(tokio::spawn(retry.instrument(self.span.clone())));
            }
            None => {
                drop(lifecycle);
                let retries = attempts - 1;
                tracing::error!("[LIFECYCLE] giving up after {} retries", retries);
                self.events.emit(&ProxyEvent::RetriesExhausted { attempts: retries });
            }
        }
    }

    fn retry_start(self: &Arc<Self>) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.halted {
                return;
            }
            lifecycle.retry = None;
        }
        self.start();
    }

    fn drain_client_events(&self) -> usize {
        let mut client_events = self.client_events.lock();
        let mut drained = 0;
        while client_events.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }

    fn fail(&self, message: String) {
        self.emit_error(message);
        self.shutdown();
    }

    fn emit_error(&self, message: String) {
        tracing::error!("{}", message);
        self.events.emit(&ProxyEvent::Error(message));
    }

    /// Stopped transition shared by `stop()` and the internal failure paths. Leaves the timers alone.
    fn shutdown(&self) -> bool {
        {
            let mut lifecycle = self.lifecycle.lock();
            if !lifecycle.state.is_started() {
                return false;
            }
            lifecycle.state = LifecycleState::Stopped;
        }

        tracing::info!("[LIFECYCLE] stopping");
        self.session.close();
        if self.base.is_started() {
            self.base.stop();
        }
        self.events.emit(&ProxyEvent::Stopped);
        true
    }
}

impl Drop for ProxyPool {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle.get_mut();
        for task in [lifecycle.watchdog.take(), lifecycle.retry.take(), lifecycle.pump.take()].into_iter().flatten() {
            task.abort();
        }
        if let Some(timer) = self.jobs.get_mut().grace_timer.take() {
            timer.abort();
        }
        self.session.close();
        self.events.clear();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
