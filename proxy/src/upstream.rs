//! The single logical session with the upstream pool.

use crate::endpoint::UpstreamEndpoint;
use crate::errors::{ProxyError, ProxyResult};
use crate::nonce::NonceSplit;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use sproxy_stratum::protocol::{METHOD_AUTHORIZE, METHOD_SUBMIT, METHOD_SUBSCRIBE};
use sproxy_stratum::{MiningSubmitParams, StratumClient, StratumResult, SubscribeResult};
use std::sync::Arc;

/// Request/response surface of the upstream connection
#[async_trait]
pub trait UpstreamRpc: Send + Sync {
    /// Open the transport; no-op while already connecting or connected
    fn connect(&self);

    fn close(&self);

    async fn call(&self, method: &str, params: Vec<Value>) -> StratumResult<Value>;
}

#[async_trait]
impl UpstreamRpc for StratumClient {
    fn connect(&self) {
        StratumClient::connect(self)
    }

    fn close(&self) {
        StratumClient::close(self)
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> StratumResult<Value> {
        self.request(method, params).await
    }
}

/// What the pool granted at the last subscription
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpstreamConnectionState {
    pub protocol_version: String,
    pub session_id: Option<String>,
    pub extra_nonce_1: Option<String>,
    pub extra_nonce_2_size: Option<usize>,
    pub split: NonceSplit,
    /// Subscription list of the last `mining.subscribe` result
    pub notifications: Value,
    pub authenticated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionChange {
    /// Same extranonce space as before; worker assignments stay valid
    Resumed,
    /// New extranonce space; every worker must resubscribe
    New(NonceSplit),
}

pub struct UpstreamSession {
    endpoint: UpstreamEndpoint,
    rpc: Arc<dyn UpstreamRpc>,
    state: Mutex<UpstreamConnectionState>,
}

impl UpstreamSession {
    pub fn new(endpoint: UpstreamEndpoint, version: String, rpc: Arc<dyn UpstreamRpc>) -> Self {
        let state = UpstreamConnectionState { protocol_version: version, ..Default::default() };
        Self { endpoint, rpc, state: Mutex::new(state) }
    }

    pub fn endpoint(&self) -> &UpstreamEndpoint {
        &self.endpoint
    }

    pub fn connect(&self) {
        self.rpc.connect();
    }

    pub fn close(&self) {
        self.rpc.close();
        self.mark_unauthenticated();
    }

    pub fn mark_unauthenticated(&self) {
        self.state.lock().authenticated = false;
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.lock().authenticated
    }

    pub fn snapshot(&self) -> UpstreamConnectionState {
        self.state.lock().clone()
    }

    pub fn version(&self) -> String {
        self.state.lock().protocol_version.clone()
    }

    pub fn set_version(&self, version: impl Into<String>) {
        self.state.lock().protocol_version = version.into();
    }

    /// Upstream extranonce1 and the current split, once subscribed
    pub fn nonce_space(&self) -> Option<(String, NonceSplit)> {
        let state = self.state.lock();
        state.extra_nonce_1.clone().map(|extra_nonce_1| (extra_nonce_1, state.split))
    }

    /// `mining.subscribe` with the protocol version and the session id to resume, if any.
    ///
    /// The session counts as new when the extranonce1 or the extranonce2 size differ from the
    /// previous subscription.
    pub async fn subscribe(&self) -> ProxyResult<SessionChange> {
        let params = {
            let state = self.state.lock();
            let mut params = vec![Value::from(state.protocol_version.as_str())];
            if let Some(session_id) = &state.session_id {
                params.push(Value::from(session_id.as_str()));
            }
            params
        };

        let result = self.rpc.call(METHOD_SUBSCRIBE, params).await?;
        let subscribed = SubscribeResult::try_from(&result).map_err(ProxyError::MalformedSubscription)?;
        if !subscribed.has_well_formed_subscriptions() {
            tracing::warn!("[UPSTREAM] unexpected subscription list from pool: {}", subscribed.subscriptions);
        }

        let mut state = self.state.lock();
        if let Some(session_id) = subscribed.session_id() {
            state.session_id = Some(session_id);
        }
        state.notifications = subscribed.subscriptions.clone();

        let resumed = state.extra_nonce_1.as_deref() == Some(subscribed.extra_nonce_1.as_str())
            && state.extra_nonce_2_size == Some(subscribed.extra_nonce_2_size);
        if resumed {
            tracing::debug!("[UPSTREAM] session {:?} resumed", state.session_id);
            return Ok(SessionChange::Resumed);
        }

        let split = NonceSplit::from_extranonce2_size(subscribed.extra_nonce_2_size);
        state.extra_nonce_1 = Some(subscribed.extra_nonce_1);
        state.extra_nonce_2_size = Some(subscribed.extra_nonce_2_size);
        state.split = split;
        tracing::info!(
            "[UPSTREAM] new session {:?}: extranonce1={:?}, extranonce2_size={}, worker/proxy split={}/{}",
            state.session_id,
            state.extra_nonce_1,
            subscribed.extra_nonce_2_size,
            split.worker_size,
            split.proxy_size
        );
        Ok(SessionChange::New(split))
    }

    /// `mining.authorize`; only an explicit `true` authorizes.
    pub async fn authorize(&self) -> ProxyResult<()> {
        let params = vec![Value::from(self.endpoint.username.as_str()), Value::from(self.endpoint.password.as_str())];
        let result = self.rpc.call(METHOD_AUTHORIZE, params).await?;
        if result != Value::Bool(true) {
            tracing::debug!("[UPSTREAM] authorize answered {}", result);
            return Err(ProxyError::NotAuthorized);
        }
        self.state.lock().authenticated = true;
        Ok(())
    }

    /// `mining.submit` under the proxy's own username. `Ok(false)` is an explicit rejection
    /// without reason.
    pub async fn submit(&self, job_id: &str, extra_nonce_2: &str, ntime: &str, nonce: &str) -> ProxyResult<bool> {
        let params = MiningSubmitParams {
            username: self.endpoint.username.clone(),
            job_id: job_id.to_string(),
            extra_nonce_2: extra_nonce_2.to_string(),
            ntime: ntime.to_string(),
            nonce: nonce.to_string(),
        };
        let result = self.rpc.call(METHOD_SUBMIT, params.to_params()).await?;
        Ok(result == Value::Bool(true))
    }
}
