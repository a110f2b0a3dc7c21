//! Per-identity login failure counters.
//!
//! Enforcement is the sign-in handler's job: it checks
//! [`LoginThrottle::is_locked`] before looking the identity up at all.

use std::sync::Arc;

use crate::db::kv::{KeyValueStore, KvError};

/// Failures allowed before an identity is locked out.
pub const MAX_FAILED_ATTEMPTS: u32 = 5;

/// Counters disappear this long after the first failure.
pub const FAILURE_WINDOW_SECS: u64 = 5 * 60;

#[derive(Clone)]
pub struct LoginThrottle {
    kv: Arc<dyn KeyValueStore>,
}

impl LoginThrottle {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    fn key(identity: &str) -> String {
        format!("fail:{}", identity.trim().to_lowercase())
    }

    pub async fn record_failure(&self, identity: &str) -> Result<u32, KvError> {
        let count = self
            .kv
            .incr_with_ttl(&Self::key(identity), FAILURE_WINDOW_SECS)
            .await?;
        Ok(count.max(0) as u32)
    }

    pub async fn record_success(&self, identity: &str) -> Result<(), KvError> {
        self.kv.del(&Self::key(identity)).await
    }

    pub async fn current_failure_count(&self, identity: &str) -> Result<u32, KvError> {
        let Some(value) = self.kv.get(&Self::key(identity)).await? else {
            return Ok(0);
        };
        value
            .parse()
            .map_err(|_| KvError::NotAnInteger(Self::key(identity)))
    }

    pub async fn is_locked(&self, identity: &str) -> Result<bool, KvError> {
        Ok(self.current_failure_count(identity).await? >= MAX_FAILED_ATTEMPTS)
    }
}
