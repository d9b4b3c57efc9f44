use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Explicit retry policy: how many attempts, the backoff curve, and an
/// optional overall deadline. Which errors are retryable is decided by the
/// predicate passed to [`retry`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// `None` = bounded only by `total_timeout`.
    pub max_attempts: Option<u32>,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub total_timeout: Option<Duration>,
    /// Full jitter: each delay is drawn uniformly from `0..=computed`.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Broker publish: 100ms doubling to 10s, give up after 60s.
    pub fn publish() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            total_timeout: Some(Duration::from_secs(60)),
            jitter: false,
        }
    }

    /// Outbound HTTP calls (push provider, collaborators): 3 attempts, 1s..10s.
    pub fn http() -> Self {
        Self {
            max_attempts: Some(3),
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            total_timeout: None,
            jitter: false,
        }
    }

    /// Social scrape: 3 attempts, randomised exponential capped at 3s.
    pub fn scrape() -> Self {
        Self {
            max_attempts: Some(3),
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(3),
            total_timeout: None,
            jitter: true,
        }
    }

    pub fn once() -> Self {
        Self {
            max_attempts: Some(1),
            initial_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
            total_timeout: None,
            jitter: false,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    pub fn without_delay(mut self) -> Self {
        self.initial_delay = Duration::ZERO;
        self.max_delay = Duration::ZERO;
        self
    }

    /// Delay to wait after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);
        let capped = Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()));
        if self.jitter && !capped.is_zero() {
            let millis = capped.as_millis() as u64;
            Duration::from_millis(rand::rng().random_range(0..=millis))
        } else {
            capped
        }
    }

    /// Whether another attempt is allowed after `attempt` failures, given the
    /// time already spent and the delay about to be slept.
    pub fn allows_another(&self, attempt: u32, elapsed: Duration, next_delay: Duration) -> bool {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return false;
            }
        }
        match self.total_timeout {
            Some(limit) => elapsed + next_delay <= limit,
            None => true,
        }
    }
}

/// Run `op` under `policy`, retrying errors for which `is_retryable` holds.
/// Returns the last error once attempts or the deadline run out.
pub async fn retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    operation: &str,
    is_retryable: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                if !is_retryable(&e) {
                    return Err(e);
                }
                let delay = policy.delay_for(attempt);
                if !policy.allows_another(attempt, started.elapsed(), delay) {
                    warn!(operation, attempt, error = %e, "Retries exhausted");
                    return Err(e);
                }
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
