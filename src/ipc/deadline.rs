//! Deadline composition for blocking IPC operations
//!
//! Every suspension point (connect, send, receive) runs under the earlier
//! of a caller timeout and a caller cancellation token. The two outcomes
//! stay distinguishable: the timer yields [`Error::Timeout`], the token
//! yields [`Error::Cancelled`].

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::common::{Error, Result};

/// Run `operation` until it completes, `timeout` elapses, or `cancel` fires
pub async fn bounded<F, T>(timeout: Duration, cancel: &CancellationToken, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        outcome = tokio::time::timeout(timeout, operation) => match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(millis(timeout))),
        },
    }
}

/// Milliseconds of a duration, saturating
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
