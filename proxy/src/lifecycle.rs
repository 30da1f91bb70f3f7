use crate::constants::{RETRY_INITIAL_DELAY, RETRY_MAX_DELAY, RETRY_MULTIPLIER};
use crate::errors::{ProxyError, ProxyResult};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Stopped,
    /// Transport is being opened
    Starting,
    /// Connected or connecting, waiting for `mining.authorize` to succeed
    AwaitingAuth,
    Running,
}

impl LifecycleState {
    pub fn is_started(&self) -> bool {
        !matches!(self, LifecycleState::Stopped)
    }
}

/// Delay before `start()` is retried after the authentication watchdog fired
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { initial_delay: RETRY_INITIAL_DELAY, max_delay: RETRY_MAX_DELAY, multiplier: RETRY_MULTIPLIER, max_attempts: None }
    }
}

impl RetryPolicy {
    /// Same delay every time, never giving up
    pub fn fixed(delay: Duration) -> Self {
        Self { initial_delay: delay, max_delay: delay, multiplier: 1.0, max_attempts: None }
    }

    pub fn validate(&self) -> ProxyResult<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ProxyError::Config(format!("retry multiplier must be at least 1, got {}", self.multiplier)));
        }
        if self.max_delay < self.initial_delay {
            return Err(ProxyError::Config("retry max_delay is shorter than initial_delay".to_string()));
        }
        if self.max_attempts == Some(0) {
            return Err(ProxyError::Config("retry max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based), `None` once attempts are exhausted
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| attempt > max) {
            return None;
        }
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Some(if capped.is_finite() { Duration::from_secs_f64(capped) } else { self.max_delay })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Some(Duration::from_secs(10)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_secs(20)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_secs(40)));
        assert_eq!(policy.delay_for(6), Some(Duration::from_secs(300)));
        assert_eq!(policy.delay_for(1000), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let policy = RetryPolicy { max_attempts: Some(2), ..RetryPolicy::default() };
        assert!(policy.delay_for(2).is_some());
        assert_eq!(policy.delay_for(3), None);
    }

    #[test]
    fn test_fixed_policy() {
        let policy = RetryPolicy::fixed(Duration::from_secs(10));
        assert!(policy.validate().is_ok());
        assert!((1..50).all(|attempt| policy.delay_for(attempt) == Some(Duration::from_secs(10))));
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy { multiplier: 0.5, ..RetryPolicy::default() }.validate().is_err());
        assert!(RetryPolicy { multiplier: f64::NAN, ..RetryPolicy::default() }.validate().is_err());
        assert!(RetryPolicy { max_attempts: Some(0), ..RetryPolicy::default() }.validate().is_err());
        assert!(RetryPolicy { max_delay: Duration::from_secs(1), ..RetryPolicy::default() }.validate().is_err());
    }

    #[test]
    fn test_states() {
        assert!(!LifecycleState::Stopped.is_started());
        assert!(LifecycleState::AwaitingAuth.is_started());
        assert!(LifecycleState::Running.is_started());
    }
}
