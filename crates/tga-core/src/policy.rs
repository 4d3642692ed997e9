use std::{future::Future, time::Duration};

use crate::Result;

/// Per-channel deadline and retry budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunPolicy {
    /// Upper bound for one channel fetch; a stall becomes `SourceTransport`.
    pub fetch_timeout: Option<Duration>,
    /// Attempts per step (fetch, upload). `1` disables retries.
    pub max_attempts: u32,
    /// Sleep before attempt `n + 1` is `retry_backoff * n`.
    pub retry_backoff: Duration,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            fetch_timeout: Some(Duration::from_secs(15 * 60)),
            max_attempts: 1,
            retry_backoff: Duration::from_secs(2),
        }
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// attempt budget is spent.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RunPolicy,
    step: &str,
    channel: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max = policy.max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < max => {
                let wait = policy.retry_backoff * attempt;
                tracing::warn!(
                    channel,
                    step,
                    attempt,
                    error = %e,
                    "retrying in {}ms",
                    wait.as_millis()
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RunPolicy {
        RunPolicy {
            fetch_timeout: None,
            max_attempts,
            retry_backoff: Duration::from_secs(2),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_use_linear_backoff_until_budget_is_spent() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let res: Result<()> = with_retry(&policy(3), "upload", "c", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::SinkWrite("503".into()))
        })
        .await;

        assert!(matches!(res, Err(Error::SinkWrite(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 2s after the first attempt, 4s after the second.
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test]
    async fn permanent_errors_are_returned_at_once() {
        let calls = AtomicU32::new(0);
        let res: Result<()> = with_retry(&policy(5), "fetch", "c", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::ChannelUnavailable("c".into()))
        })
        .await;

        assert!(matches!(res, Err(Error::ChannelUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
