/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::{future::Future, time::Duration};
use tracing::debug;

/// A fixed number of attempts separated by a fixed sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub attempts: u32,
    pub interval: Duration,
}
impl Backoff {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }
}

/// Repeatedly runs `op` until it succeeds or the attempt budget is spent.
///
/// The closure receives the attempt number (starting at 1). Between failed attempts the task
/// sleeps for `backoff.interval`; no sleep happens after the final attempt. When every attempt
/// fails the last error is returned with `what` attached as context.
///
/// A budget of zero attempts is treated as one attempt.
pub async fn retry<T, F, Fut>(backoff: Backoff, what: &str, mut op: F) -> anyhow::Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempts = backoff.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(val) => return Ok(val),

            Err(err) if attempt >= attempts => {
                return Err(err.context(format!("{what} (gave up after {attempts} attempts)")));
            }

            Err(err) => {
                debug!("{what}: attempt {attempt}/{attempts} failed, retrying: {err:#}");
                tokio::time::sleep(backoff.interval).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn returns_first_success() -> anyhow::Result<()> {
        let calls = AtomicU32::new(0);
        let backoff = Backoff::new(5, Duration::ZERO);
        let val = retry(backoff, "op", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await?;

        assert_eq!(val, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn retries_until_success() -> anyhow::Result<()> {
        let backoff = Backoff::new(5, Duration::from_millis(1));
        let val = retry(backoff, "op", |attempt| async move {
            if attempt < 3 {
                Err(anyhow::anyhow!("not yet"))
            } else {
                Ok(attempt)
            }
        })
        .await?;

        assert_eq!(val, 3);
        Ok(())
    }

    #[tokio::test]
    async fn gives_up_with_last_error() {
        let calls = AtomicU32::new(0);
        let backoff = Backoff::new(4, Duration::ZERO);
        let res: anyhow::Result<()> = retry(backoff, "doing it", |n| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(anyhow::anyhow!("failure {n}")) }
        })
        .await;

        let err = res.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(format!("{err:#}").contains("failure 4"));
        assert!(err.to_string().contains("doing it"));
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let backoff = Backoff::new(0, Duration::ZERO);
        let res: anyhow::Result<()> = retry(backoff, "op", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("nope")) }
        })
        .await;

        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
