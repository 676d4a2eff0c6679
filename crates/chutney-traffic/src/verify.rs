//! Retrying verification inside a time budget.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::error::{Result, TrafficError};

/// Pause between failed tries, so an immediate failure does not spin.
pub const RETRY_PAUSE: Duration = Duration::from_secs(5);

/// Run `attempt` until it succeeds or `budget` has passed. Each failure is
/// followed by `pause`; the budget is checked after the pause, so at least
/// one try always happens.
pub async fn verify_with_budget<T, F, Fut>(budget: Duration, pause: Duration, mut attempt: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = Instant::now() + budget;
    info!(budget_secs = budget.as_secs(), "verifying data transmission");
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt(tries).await {
            Ok(value) => {
                info!(tries, "transmission: success");
                return Ok(value);
            }
            Err(e) => {
                warn!(tries, error = %e, "transmission failed");
                sleep(pause).await;
                if Instant::now() >= deadline {
                    warn!(tries, "transmission: failure; set CHUTNEY_DEBUG to diagnose");
                    return Err(TrafficError::BudgetExhausted {
                        tries,
                        budget,
                        last: Box::new(e),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let began = Instant::now();
        let out = verify_with_budget(Duration::from_secs(60), RETRY_PAUSE, |try_no| async move {
            if try_no < 3 {
                Err(TrafficError::NoClients)
            } else {
                Ok(try_no)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 3);
        assert_eq!(began.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget() {
        let began = Instant::now();
        let err = verify_with_budget(Duration::from_secs(12), RETRY_PAUSE, |_| async {
            Err::<(), _>(TrafficError::NoTargets)
        })
        .await
        .unwrap_err();
        match err {
            TrafficError::BudgetExhausted { tries, last, .. } => {
                assert_eq!(tries, 3);
                assert!(matches!(*last, TrafficError::NoTargets));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(began.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_budget_still_tries_once() {
        let mut calls = 0;
        let out = verify_with_budget(Duration::ZERO, RETRY_PAUSE, |_| {
            calls += 1;
            async { Ok(()) }
        })
        .await;
        assert!(out.is_ok());
        assert_eq!(calls, 1);
    }
}
