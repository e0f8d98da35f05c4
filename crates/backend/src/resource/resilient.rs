// Retrying resource wrapper
//
// Busy responses are retried after a fixed pause, up to a bounded number of
// total attempts. Successes and non-busy failures pass through untouched.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{Resource, ResourceError};
use crate::actor::message::QueryResult;

/// Linear busy-retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  max_tries: u32,
  retry_interval: Duration,
}

impl RetryPolicy {
  /// Create a policy. `max_tries` counts the first attempt and must be >= 1.
  pub fn new(max_tries: u32, retry_interval: Duration) -> Result<Self, ResourceError> {
    if max_tries < 1 {
      return Err(ResourceError::InvalidRetryPolicy(format!(
        "max_tries must be at least 1, got {}",
        max_tries
      )));
    }
    Ok(Self {
      max_tries,
      retry_interval,
    })
  }

  pub fn from_config(config: &gatehouse_core::RetryConfig) -> Result<Self, ResourceError> {
    Self::new(config.max_tries, config.retry_interval())
  }

  pub fn max_tries(&self) -> u32 {
    self.max_tries
  }

  pub fn retry_interval(&self) -> Duration {
    self.retry_interval
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_tries: 2,
      retry_interval: Duration::from_millis(500),
    }
  }
}

/// A resource wrapper that retries busy responses
pub struct RetryingResource<R> {
  inner: R,
  policy: RetryPolicy,
}

impl<R: Resource> RetryingResource<R> {
  pub fn new(inner: R, policy: RetryPolicy) -> Self {
    Self { inner, policy }
  }

  pub fn policy(&self) -> &RetryPolicy {
    &self.policy
  }

  pub fn inner(&self) -> &R {
    &self.inner
  }

  /// Call the resource, retrying busy responses
  ///
  /// Returns the first non-busy result, or the last busy failure once every
  /// attempt is spent.
  pub async fn call_with_retry(&self, query: &str) -> QueryResult {
    let max_tries = self.policy.max_tries;
    let mut attempt = 1;

    loop {
      let result = self.inner.call(query).await;

      if !result.is_busy() {
        if attempt > 1 {
          info!(attempt, query, "Query succeeded after busy retry");
        }
        return result;
      }

      if attempt >= max_tries {
        warn!(attempt, max_tries, query, "Resource still busy, all attempts exhausted");
        return result;
      }

      debug!(
        attempt,
        max_tries,
        backoff_ms = self.policy.retry_interval.as_millis(),
        query,
        "Resource busy, will retry"
      );
      sleep(self.policy.retry_interval).await;
      attempt += 1;
    }
  }
}

#[async_trait]
impl<R: Resource> Resource for RetryingResource<R> {
  async fn call(&self, query: &str) -> QueryResult {
    self.call_with_retry(query).await
  }
}
