//! Exponential-backoff RPC retry, grounded on
//! `original_source/src/grpcretry.cpp`.
//!
//! The source builds a fresh `grpc::ClientContext` per attempt and sleeps
//! `RECC_RETRY_DELAY * 2^attempt` milliseconds between failures; this is
//! the same policy, but cancellation-aware (spec §4.F: "cancellation
//! received while sleeping must abort promptly").

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::error;
use tonic::{Code, Status};

use crate::errors::{RecExecError, Result};

/// Invoke `attempt` (an async RPC call, given a fresh attempt index
/// starting at 0) up to `retry_limit + 1` times total, sleeping
/// `base_delay * 2^n` between failures. `cancel` is polled during the
/// sleep so a SIGINT observed mid-backoff aborts immediately with
/// `RecExecError::Cancelled` instead of completing the retry.
pub async fn retry<F, Fut, T>(
    retry_limit: u32,
    base_delay: Duration,
    cancel: &AtomicBool,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, Status>>,
{
    let mut n_attempts = 0u32;
    let mut last_status: Option<Status> = None;

    loop {
        if cancel.load(Ordering::SeqCst) {
            return Err(RecExecError::Cancelled);
        }
        match attempt(n_attempts).await {
            Ok(value) => return Ok(value),
            Err(status) => {
                if n_attempts < retry_limit {
                    let delay = base_delay * 2u32.pow(n_attempts.min(16));
                    error!(
                        "Attempt {}/{} failed with gRPC error {}: {}. Retrying in {:?}...",
                        n_attempts + 1,
                        retry_limit + 1,
                        status.code(),
                        status.message(),
                        delay,
                    );
                    if !sleep_cancellable(delay, cancel).await {
                        return Err(RecExecError::Cancelled);
                    }
                }
                last_status = Some(status);
                n_attempts += 1;
                if n_attempts >= retry_limit + 1 {
                    break;
                }
            }
        }
    }

    let status = last_status.unwrap_or_else(|| Status::new(Code::Unknown, "no attempts made"));
    Err(RecExecError::RpcFailed {
        code: status.code(),
        message: status.message().to_string(),
    })
}

/// Sleep for `delay`, checking `cancel` every 50ms. Returns `false` if
/// cancellation was observed before the sleep completed.
pub(crate) async fn sleep_cancellable(delay: Duration, cancel: &AtomicBool) -> bool {
    const POLL_INTERVAL: Duration = Duration::from_millis(50);
    let mut remaining = delay;
    while remaining > Duration::ZERO {
        if cancel.load(Ordering::SeqCst) {
            return false;
        }
        let step = remaining.min(POLL_INTERVAL);
        tokio::time::sleep(step).await;
        remaining -= step;
    }
    !cancel.load(Ordering::SeqCst)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_succeeds_without_retry() {
        let cancel = AtomicBool::new(false);
        let calls = AtomicU32::new(0);
        let result: Result<i32> = retry(2, Duration::from_millis(1), &cancel, |_n| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let cancel = AtomicBool::new(false);
        let calls = AtomicU32::new(0);
        let result: Result<i32> = retry(3, Duration::from_millis(1), &cancel, |n| {
            let count = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err(Status::unavailable("transient"))
                } else {
                    Ok(n as i32)
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_retry_limit() {
        let cancel = AtomicBool::new(false);
        let result: Result<i32> = retry(1, Duration::from_millis(1), &cancel, |_n| async {
            Err(Status::unavailable("down"))
        })
        .await;
        assert!(matches!(result, Err(RecExecError::RpcFailed { .. })));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_immediately() {
        let cancel = AtomicBool::new(true);
        let result: Result<i32> = retry(5, Duration::from_secs(10), &cancel, |_n| async {
            Err(Status::unavailable("down"))
        })
        .await;
        assert!(matches!(result, Err(RecExecError::Cancelled)));
    }
}
