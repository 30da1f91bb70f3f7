use std::time::Duration;

/// Time allowed between `start()` and a successful `mining.authorize`
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(30);

/// First delay before `start()` is retried after an authentication timeout
pub const RETRY_INITIAL_DELAY: Duration = Duration::from_secs(10);
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(300);
pub const RETRY_MULTIPLIER: f64 = 2.0;

/// Redial delay of the upstream client after the pool drops the connection
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long the job superseded by a clean job stays valid for in-flight shares
pub const CLEAN_JOBS_GRACE: Duration = Duration::from_secs(1);

pub const JOB_HISTORY_CAPACITY: usize = 50;

/// Pools send `mining.set_difficulty` in 16.16 fixed point
pub const POOL_DIFFICULTY_SCALE: f64 = 65536.0;

/// Sent as the first `mining.subscribe` parameter when no version is configured
pub const DEFAULT_PROTOCOL_VERSION: &str = concat!("sproxy/", env!("CARGO_PKG_VERSION"));
