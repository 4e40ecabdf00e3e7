//! Retry policy shared by notification channels.

use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::NotifyConfig;
use crate::utils::{pause, secs_f64};

/// Statuses worth another attempt.
pub const RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// A raw API answer.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

/// What to do with one attempt's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Done,
    Retry,
    Fail,
}

impl RetryDecision {
    pub fn for_status(status: u16) -> Self {
        if RETRY_STATUSES.contains(&status) {
            Self::Retry
        } else if (200..300).contains(&status) {
            Self::Done
        } else {
            Self::Fail
        }
    }
}

/// Attempt budget and delay schedule: `delay * backoff^(attempt-1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
    pub backoff: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            delay: Duration::from_secs(2),
            backoff: 1.5,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &NotifyConfig) -> Self {
        Self {
            retries: config.retries.max(1),
            delay: secs_f64(config.delay_secs),
            backoff: config.backoff,
        }
    }

    /// Wait before the attempt after `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        secs_f64(self.delay.as_secs_f64() * self.backoff.powi(exp))
    }
}

/// Run `send` until it succeeds, fails permanently, or the budget runs out.
///
/// Transport errors and [`RETRY_STATUSES`] are retried; any other non-2xx
/// status fails at once.
pub async fn send_with_retries<F, Fut>(channel: &str, policy: &RetryPolicy, mut send: F) -> Result<Reply>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Reply>>,
{
    let retries = policy.retries.max(1);
    let mut last = String::new();

    for attempt in 1..=retries {
        match send().await {
            Ok(reply) => match RetryDecision::for_status(reply.status) {
                RetryDecision::Done => return Ok(reply),
                RetryDecision::Fail => {
                    log::error!("[notify] {} rejected with {}: {}", channel, reply.status, reply.body);
                    return Err(AppError::notify(channel, format!("status {}", reply.status)));
                }
                RetryDecision::Retry => {
                    log::warn!(
                        "[notify] {} attempt {}/{}: retryable status {}",
                        channel,
                        attempt,
                        retries,
                        reply.status
                    );
                    last = format!("status {}", reply.status);
                }
            },
            Err(e) => {
                log::warn!("[notify] {} attempt {}/{}: {}", channel, attempt, retries, e);
                last = e.to_string();
            }
        }
        if attempt < retries {
            pause(policy.delay_for(attempt)).await;
        }
    }

    log::error!("[notify] {} retries exhausted", channel);
    Err(AppError::notify(channel, format!("retries exhausted ({last})")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn instant_policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            delay: Duration::ZERO,
            backoff: 1.5,
        }
    }

    fn reply(status: u16) -> Result<Reply> {
        Ok(Reply {
            status,
            body: String::new(),
        })
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(3));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4500));
    }

    #[test]
    fn test_decisions() {
        assert_eq!(RetryDecision::for_status(200), RetryDecision::Done);
        assert_eq!(RetryDecision::for_status(429), RetryDecision::Retry);
        assert_eq!(RetryDecision::for_status(502), RetryDecision::Retry);
        assert_eq!(RetryDecision::for_status(400), RetryDecision::Fail);
        assert_eq!(RetryDecision::for_status(501), RetryDecision::Fail);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = Cell::new(0);
        let result = send_with_retries("test", &instant_policy(5), || {
            calls.set(calls.get() + 1);
            let status = if calls.get() < 3 { 503 } else { 200 };
            async move { reply(status) }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = Cell::new(0);
        let result = send_with_retries("test", &instant_policy(5), || {
            calls.set(calls.get() + 1);
            async { reply(400) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_budget_is_bounded() {
        let calls = Cell::new(0);
        let result = send_with_retries("test", &instant_policy(5), || {
            calls.set(calls.get() + 1);
            async { Err(AppError::validation("connection refused")) }
        })
        .await;

        assert!(matches!(result, Err(AppError::Notify { .. })));
        assert_eq!(calls.get(), 5);
    }
}
