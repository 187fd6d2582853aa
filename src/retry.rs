//! Bounded retry policy wrapping every remote call.
//!
//! A reported authorization failure (HTTP 401 equivalent) triggers one
//! re-authorization and one retry. Any other failure is retried with
//! exponential backoff. No call is retried indefinitely.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, warn};

use crate::auth::TokenProvider;
use crate::config::Config;
use crate::error::RemoteError;

/// Executes a remote operation with re-authorization and backoff.
#[derive(Clone)]
pub struct Retrier {
    auth: Arc<dyn TokenProvider>,
    max_attempts: u32,
    base_delay: Duration,
}

impl Retrier {
    /// Default policy: 5 attempts total, 1s base delay doubling per attempt.
    pub fn new(auth: Arc<dyn TokenProvider>) -> Self {
        Self::with_policy(auth, 5, Duration::from_secs(1))
    }

    pub fn with_policy(auth: Arc<dyn TokenProvider>, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            auth,
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(auth: Arc<dyn TokenProvider>, config: &Config) -> Self {
        Self::with_policy(
            auth,
            config.retry_max_attempts,
            Duration::from_millis(config.retry_base_delay_ms),
        )
    }

    /// Run `op` until it succeeds or the policy is exhausted.
    ///
    /// The caller observes exactly one outcome: the first success, or the
    /// last failure once attempts run out.
    pub async fn run<T, Op, Fut>(&self, mut op: Op) -> Result<T, RemoteError>
    where
        Op: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, RemoteError>> + Send,
    {
        let mut attempts: u32 = 0;
        let mut reauthorized = false;

        loop {
            attempts += 1;

            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if err.is_auth() {
                if reauthorized {
                    // one re-authorization per call, the second 401 is final
                    return Err(err);
                }
                reauthorized = true;
                if self.auth.reauthorize().await {
                    debug!("retrying request after re-authorization");
                    continue;
                }
                error!("authorization failed: no access token could be retrieved");
                return Err(RemoteError::AuthorizationFailed);
            }

            if attempts >= self.max_attempts {
                error!(attempts, error = %err, "remote call failed, attempts exhausted");
                return Err(err);
            }

            let delay = self.backoff_delay(attempts);
            warn!(attempt = attempts, delay_ms = delay.as_millis() as u64, error = %err,
                "remote call failed, backing off");
            tokio::time::sleep(delay).await;
        }
    }

    // exponential delay: base * 2^(attempt-1) plus 0-100ms of jitter
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis() as u64 * (1u64 << (attempt - 1).min(16));
        let jitter = rand::thread_rng().gen_range(0..100);
        Duration::from_millis(exp + jitter)
    }
}
