//! SIGINT handling scoped to an in-flight `Execute` call, grounded on
//! `original_source/src/remoteexecutionsignals.cpp`'s
//! `setup_signal_handler`/`block_sigint`/`unblock_sigint` trio: install a
//! handler only while a request is outstanding, and make sure it's torn
//! down afterward rather than leaking process-wide state.
//!
//! The source installs a raw `sigaction` and flips a
//! `volatile sig_atomic_t`; this listens on `tokio::signal::ctrl_c()`
//! instead; dropping the guard aborts the listener task, so once no guard
//! is alive a Ctrl+C goes back to terminating the process normally.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::task::JoinHandle;

/// Owns the background task listening for Ctrl+C. Dropping it aborts the
/// listener, restoring the default SIGINT behavior for anyone else.
pub struct CancellationGuard {
    handle: JoinHandle<()>,
}

impl CancellationGuard {
    /// Start listening for SIGINT and return the flag it sets, plus a
    /// guard that stops listening when dropped. Call this immediately
    /// before an `Execute` RPC and let the guard fall out of scope right
    /// after, per spec §4.H's "signal handling is scoped to the call".
    pub fn install() -> (Arc<AtomicBool>, Self) {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let handle = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        });
        (cancel, CancellationGuard { handle })
    }
}

impl Drop for CancellationGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_guard_does_not_set_flag_without_signal() {
        let (cancel, _guard) = CancellationGuard::install();
        tokio::task::yield_now().await;
        assert!(!cancel.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dropping_guard_aborts_listener() {
        let (cancel, guard) = CancellationGuard::install();
        drop(guard);
        assert!(!cancel.load(Ordering::SeqCst));
    }
}
