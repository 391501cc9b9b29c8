// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities for waiting on a condition with a bounded wait

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Result of one check of the condition passed to [`wait_for_condition()`]
#[derive(Debug, Error)]
pub enum CondCheckError<E: std::error::Error + Send + Sync + 'static> {
    /// the condition does not hold yet; try again after the poll interval
    #[error("poll condition not yet ready")]
    NotYet,
    /// checking the condition failed in a way that retrying will not fix
    #[error("non-retryable error while checking on condition")]
    Failed(#[from] E),
}

/// Error returned by [`wait_for_condition()`]
#[derive(Debug, Error)]
pub enum Error<E: std::error::Error + Send + Sync + 'static> {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("non-retryable error while polling condition")]
    PermanentError(#[source] E),
}

/// Poll `cond` every `poll_interval` until it completes, fails permanently, or
/// `poll_max` has elapsed
///
/// `cond` is always checked at least once, even if `poll_max` is zero.  Time
/// is measured with [`tokio::time::Instant`], so tests running with a paused
/// clock see the wait complete without actually sleeping.
pub async fn wait_for_condition<O, E, Func, Fut>(
    mut cond: Func,
    poll_interval: &Duration,
    poll_max: &Duration,
) -> Result<O, Error<E>>
where
    Func: FnMut() -> Fut,
    Fut: Future<Output = Result<O, CondCheckError<E>>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let poll_start = Instant::now();
    loop {
        match cond().await {
            Ok(output) => return Ok(output),
            Err(CondCheckError::Failed(e)) => {
                return Err(Error::PermanentError(e));
            }
            Err(CondCheckError::NotYet) => (),
        }

        let duration = Instant::now().duration_since(poll_start);
        if duration >= *poll_max {
            return Err(Error::TimedOut(duration));
        }

        tokio::time::sleep(*poll_interval).await;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Error)]
    #[error("condition exploded")]
    struct Boom;

    #[tokio::test(start_paused = true)]
    async fn test_condition_eventually_holds() {
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;
        let result = wait_for_condition(
            move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(CondCheckError::<Boom>::NotYet)
                } else {
                    Ok("ready")
                }
            },
            &Duration::from_millis(100),
            &Duration::from_secs(10),
        )
        .await;
        assert_eq!(result.unwrap(), "ready");
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_condition_times_out() {
        let result = wait_for_condition(
            || async { Err::<(), _>(CondCheckError::<Boom>::NotYet) },
            &Duration::from_millis(250),
            &Duration::from_secs(1),
        )
        .await;
        assert_matches!(result, Err(Error::TimedOut(d)) => {
            assert!(d >= Duration::from_secs(1));
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_stops_polling() {
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;
        let result = wait_for_condition(
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(CondCheckError::Failed(Boom))
            },
            &Duration::from_millis(100),
            &Duration::from_secs(10),
        )
        .await;
        assert_matches!(result, Err(Error::PermanentError(Boom)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_wait_checks_once() {
        let result = wait_for_condition(
            || async { Ok::<_, CondCheckError<Boom>>(7) },
            &Duration::from_millis(100),
            &Duration::ZERO,
        )
        .await;
        assert_eq!(result.unwrap(), 7);
    }
}
