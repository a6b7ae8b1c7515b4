use std::future::Future;
use std::time::Duration;

use super::error::{ErrorKind, SyncError};
use super::events::{EventSink, SyncEvent};

/// Bounded exponential backoff. Rate limiting gets fewer attempts than
/// ordinary network failures; auth and validation errors get none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_transient_retries: u32,
    pub max_rate_limit_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_transient_retries: 3,
            max_rate_limit_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn max_retries(&self, kind: ErrorKind) -> u32 {
        match kind {
            ErrorKind::Authentication | ErrorKind::Validation => 0,
            ErrorKind::RateLimited => self.max_rate_limit_retries,
            ErrorKind::TransientNetwork => self.max_transient_retries,
        }
    }

    /// Delay before retry number `attempt` (0-based): base * 2^attempt, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Runs `op` until it succeeds or the policy gives up on its error.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        sink: &dyn EventSink,
        mut op: F,
    ) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let mut retries = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if retries >= self.max_retries(error.kind()) {
                        return Err(error);
                    }
                    let delay = self.delay_for(retries);
                    retries += 1;
                    sink.record(SyncEvent::Retrying {
                        operation,
                        attempt: retries,
                        delay,
                        error,
                    });
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
