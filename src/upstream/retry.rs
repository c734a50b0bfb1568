//! Retry with randomized exponential backoff
//!
//! Only the establishment of an upstream call is retried. Once `call` has
//! returned a delta stream, the stream is handed over untouched and any
//! failure inside it is the consumer's problem.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use super::client::{DeltaStream, UpstreamClient};
use super::types::{CallParams, Message};
use crate::config::Config;
use crate::error::RelayError;
use crate::routes::metrics::record_upstream_attempt;

/// Bounded-attempt backoff policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Lower bound of every wait
    pub min_wait: Duration,
    /// Upper bound of every wait
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_wait: Duration::from_millis(500),
            max_wait: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.retry_count,
            min_wait: config.retry_min_wait,
            max_wait: config.retry_max_wait,
        }
    }

    /// Wait before the attempt following failed attempt `attempt` (1-based).
    ///
    /// The wait is drawn uniformly from `[min_wait, ceiling]`. The ceiling
    /// is `min_wait * 2^attempt` capped at `max_wait`, so even the first
    /// retry is jittered whenever `max_wait > min_wait`. A zero `min_wait`
    /// draws from the whole `[0, max_wait]` range.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = if self.min_wait.is_zero() {
            self.max_wait
        } else {
            self.min_wait
                .saturating_mul(1u32 << attempt.clamp(1, 31))
                .min(self.max_wait)
        };

        if ceiling <= self.min_wait {
            return self.min_wait;
        }
        rand::rng().random_range(self.min_wait..=ceiling)
    }
}

/// Wraps an [`UpstreamClient`] with establishment retry
#[derive(Clone)]
pub struct RetryingCaller {
    client: Arc<dyn UpstreamClient>,
    policy: RetryPolicy,
}

impl RetryingCaller {
    pub fn new(client: Arc<dyn UpstreamClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Establish a streaming call, retrying failures per the policy.
    ///
    /// Errors that cannot succeed on another attempt are returned without
    /// retrying.
    ///
    /// Fails with [`RelayError::UpstreamUnavailable`] carrying the last cause
    /// once every attempt has failed.
    pub async fn call_with_retry(
        &self,
        messages: &[Message],
        params: &CallParams,
    ) -> Result<DeltaStream, RelayError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.client.call(messages, params).await {
                Ok(stream) => {
                    record_upstream_attempt("success");
                    debug!(
                        provider = self.client.name(),
                        attempt = attempt,
                        "Upstream stream established"
                    );
                    return Ok(stream);
                }
                Err(e) => {
                    record_upstream_attempt("failure");
                    if !e.is_retryable() {
                        warn!(
                            provider = self.client.name(),
                            attempts = attempt,
                            error = %e,
                            "Upstream call cannot succeed, not retrying"
                        );
                        return Err(RelayError::UpstreamUnavailable {
                            attempts: attempt,
                            source: e,
                        });
                    }
                    if attempt >= max_attempts {
                        warn!(
                            provider = self.client.name(),
                            attempts = attempt,
                            error = %e,
                            "Upstream unavailable, giving up"
                        );
                        return Err(RelayError::UpstreamUnavailable {
                            attempts: attempt,
                            source: e,
                        });
                    }

                    let delay = self.policy.backoff(attempt);
                    warn!(
                        provider = self.client.name(),
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Upstream call failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
