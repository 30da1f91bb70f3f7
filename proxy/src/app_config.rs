use crate::constants::{
    AUTH_TIMEOUT, CLEAN_JOBS_GRACE, JOB_HISTORY_CAPACITY, RECONNECT_DELAY, REQUEST_TIMEOUT, RETRY_INITIAL_DELAY, RETRY_MAX_DELAY,
    RETRY_MULTIPLIER,
};
use crate::endpoint::{EndpointSpec, UpstreamEndpoint};
use crate::errors::{ProxyError, ProxyResult};
use crate::lifecycle::RetryPolicy;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

/// Configuration of one proxied upstream pool.
///
/// ```yaml
/// name: main
/// url: stratum+tcp://pool.example.com:3333
/// user: wallet.rig
/// password: x
/// retry:
///   max_attempts: 20
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyPoolConfig {
    pub name: Option<String>,
    pub url: Option<String>,
    pub uri: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Protocol version announced in `mining.subscribe`
    pub version: Option<String>,
    pub auth_timeout_ms: Option<u64>,
    pub reconnect_delay_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub clean_jobs_grace_ms: Option<u64>,
    pub job_history_capacity: Option<usize>,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub multiplier: Option<f64>,
    /// Give up after this many consecutive failed starts; retry forever when unset
    pub max_attempts: Option<u32>,
}

/// Timings and limits of one proxy instance
#[derive(Debug, Clone, PartialEq)]
pub struct ProxySettings {
    pub version: Option<String>,
    pub auth_timeout: Duration,
    pub reconnect_delay: Duration,
    pub request_timeout: Duration,
    pub clean_jobs_grace: Duration,
    pub job_history_capacity: usize,
    pub retry: RetryPolicy,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            version: None,
            auth_timeout: AUTH_TIMEOUT,
            reconnect_delay: RECONNECT_DELAY,
            request_timeout: REQUEST_TIMEOUT,
            clean_jobs_grace: CLEAN_JOBS_GRACE,
            job_history_capacity: JOB_HISTORY_CAPACITY,
            retry: RetryPolicy::default(),
        }
    }
}

impl ProxyPoolConfig {
    pub fn endpoint(&self) -> ProxyResult<UpstreamEndpoint> {
        EndpointSpec::Config(self.clone()).resolve()
    }

    /// Configured name, or the upstream host when unnamed
    pub fn resolved_name(&self) -> ProxyResult<String> {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Ok(name.to_string()),
            _ => Ok(self.endpoint()?.host),
        }
    }

    pub fn settings(&self) -> ProxyResult<ProxySettings> {
        let defaults = ProxySettings::default();
        let millis = |value: Option<u64>, default: Duration| value.map(Duration::from_millis).unwrap_or(default);

        let job_history_capacity = self.job_history_capacity.unwrap_or(defaults.job_history_capacity);
        if job_history_capacity < 2 {
            return Err(ProxyError::Config(format!("job_history_capacity must be at least 2, got {}", job_history_capacity)));
        }

        let retry = RetryPolicy {
            initial_delay: millis(self.retry.initial_delay_ms, RETRY_INITIAL_DELAY),
            max_delay: millis(self.retry.max_delay_ms, RETRY_MAX_DELAY),
            multiplier: self.retry.multiplier.unwrap_or(RETRY_MULTIPLIER),
            max_attempts: self.retry.max_attempts,
        };
        retry.validate()?;

        Ok(ProxySettings {
            version: self.version.clone(),
            auth_timeout: millis(self.auth_timeout_ms, defaults.auth_timeout),
            reconnect_delay: millis(self.reconnect_delay_ms, defaults.reconnect_delay),
            request_timeout: millis(self.request_timeout_ms, defaults.request_timeout),
            clean_jobs_grace: millis(self.clean_jobs_grace_ms, defaults.clean_jobs_grace),
            job_history_capacity,
            retry,
        })
    }
}

/// All proxied pools of a deployment.
///
/// A document with a top-level `pools:` list configures several pools; any other document
/// configures exactly one.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxiesConfig {
    pub pools: Vec<ProxyPoolConfig>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MultiPoolDocument {
    pools: Vec<ProxyPoolConfig>,
}

impl ProxiesConfig {
    pub fn from_yaml(content: &str) -> ProxyResult<Self> {
        let document: serde_yaml::Value = serde_yaml::from_str(content)?;
        let pools = match &document {
            serde_yaml::Value::Mapping(map) if map.contains_key("pools") => serde_yaml::from_value::<MultiPoolDocument>(document)?.pools,
            serde_yaml::Value::Mapping(_) => vec![serde_yaml::from_value::<ProxyPoolConfig>(document)?],
            serde_yaml::Value::Null => return Err(ProxyError::Config("empty YAML document".to_string())),
            _ => return Err(ProxyError::Config("expected a mapping at the document root".to_string())),
        };

        let config = Self { pools };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ProxyResult<()> {
        if self.pools.is_empty() {
            return Err(ProxyError::Config("no pools configured".to_string()));
        }

        let mut names = HashSet::new();
        for (index, pool) in self.pools.iter().enumerate() {
            let name = pool.resolved_name().map_err(|e| ProxyError::Config(format!("pool #{}: {}", index + 1, e)))?;
            pool.settings().map_err(|e| ProxyError::Config(format!("pool {}: {}", name, e)))?;
            if !names.insert(name.clone()) {
                return Err(ProxyError::Config(format!("duplicate pool name: {}", name)));
            }
        }
        Ok(())
    }
}
