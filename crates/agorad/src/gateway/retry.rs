//! Per-call timeout with a single retry.
//!
//! Every gateway call goes through `with_retry`. The first failure (error or
//! deadline) is retried once after a fixed backoff; the second failure is
//! handed back to the stage, which degrades instead of failing the turn.

use super::Stage;
use agora_shared::GatewayError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::warn;

/// Result of a retried call, with the error that triggered the retry
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, GatewayError>,
    pub retried_after: Option<GatewayError>,
}

impl<T> Attempted<T> {
    pub fn retried(&self) -> bool {
        self.retried_after.is_some()
    }

    pub fn into_result(self) -> Result<T, GatewayError> {
        self.result
    }
}

/// Run `op` with `deadline`; on failure wait `backoff` and run it once more
pub async fn with_retry<T, F, Fut>(
    stage: Stage,
    deadline: Duration,
    backoff: Duration,
    mut op: F,
) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let first = attempt(deadline, op()).await;
    let first_err = match first {
        Ok(value) => {
            return Attempted {
                result: Ok(value),
                retried_after: None,
            }
        }
        Err(e) => e,
    };

    warn!("{} call failed ({}), retrying once", stage, first_err.label());
    // Rate limits get a longer pause
    let wait = if first_err == GatewayError::RateLimited {
        backoff * 2
    } else {
        backoff
    };
    sleep(wait).await;

    let second = attempt(deadline, op()).await;
    if let Err(e) = &second {
        warn!("{} call failed after retry ({}), degrading", stage, e.label());
    }
    Attempted {
        result: second,
        retried_after: Some(first_err),
    }
}

async fn attempt<T, Fut>(deadline: Duration, fut: Fut) -> Result<T, GatewayError>
where
    Fut: Future<Output = Result<T, GatewayError>>,
{
    match timeout(deadline, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(GatewayError::Timeout),
    }
}
