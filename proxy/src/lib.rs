pub mod app_config;
pub mod constants;
pub mod difficulty;
pub mod endpoint;
pub mod errors;
pub mod events;
pub mod job;
pub mod lifecycle;
pub mod nonce;
pub mod pool;
pub mod proxy_pool;
pub mod share;
pub mod upstream;
pub mod worker;

#[cfg(test)]
mod mock;

pub use app_config::{ProxiesConfig, ProxyPoolConfig, ProxySettings, RetryConfig};
pub use endpoint::{EndpointSpec, UpstreamEndpoint};
pub use errors::*;
pub use events::{EventBus, ListenerGuard, ListenerId, ProxyEvent};
pub use job::{Job, JobHistory};
pub use lifecycle::{LifecycleState, RetryPolicy};
pub use nonce::NonceSplit;
pub use pool::{PoolBase, WorkerSubscription};
pub use proxy_pool::{ProxyPool, ProxyStats};
pub use share::{PoolResult, Share, ShareStore, SharedShare};
pub use upstream::{SessionChange, UpstreamConnectionState, UpstreamRpc, UpstreamSession};
pub use worker::{SubmitRequest, WorkerConnection};
