//! Retry with exponential backoff
//!
//! Every call into Postgres, the search index and the state file goes
//! through [`retry`]. Transient failures are retried with no attempt limit:
//! a dependency that stays down blocks the loop instead of failing it.
//! Permanent failures are returned on the first occurrence.

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::error::{ErrorCategory, Result};

/// `delay = min(start * factor^attempt, border)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub start: Duration,
    pub factor: f64,
    pub border: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            start: Duration::from_millis(100),
            factor: 2.0,
            border: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn new(start: Duration, factor: f64, border: Duration) -> Self {
        Self {
            start,
            factor,
            border,
        }
    }

    /// Same policy with a different first delay.
    pub fn with_start(self, start: Duration) -> Self {
        Self { start, ..self }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.start.as_secs_f64() * self.factor.powi(exponent);
        if !secs.is_finite() || secs >= self.border.as_secs_f64() {
            self.border
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Run `op` until it succeeds or fails permanently.
///
/// `operation` only labels the log lines.
pub async fn retry<T, F, Fut>(policy: &BackoffPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.category() == ErrorCategory::Transient => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
            Err(err) => {
                error!(operation, category = %err.category(), error = %err, "giving up");
                return Err(err);
            }
        }
    }
}
