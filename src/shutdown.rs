//! Cooperative shutdown signal.
//!
//! One [`ShutdownSignal`] is shared by the router, its nodes and every poller.
//! It can be triggered from anywhere (an OS signal, a handler calling
//! `request_shutdown`, a test) and is observed either by polling
//! [`is_triggered`](ShutdownSignal::is_triggered) or by awaiting
//! [`cancelled`](ShutdownSignal::cancelled).

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Clonable, one-way shutdown flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes every waiter. Idempotent.
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            info!("shutdown requested");
        }
        self.token.cancel();
    }

    /// Returns true once [`trigger`](Self::trigger) has been called.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the signal is triggered.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// Triggers `signal` on Ctrl+C or, on Unix, SIGTERM.
///
/// Runs until one of the signals arrives or `signal` is triggered by
/// someone else.
pub async fn listen_for_signals(signal: ShutdownSignal) {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                warn!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => signal.trigger(),
        () = terminate => signal.trigger(),
        () = signal.cancelled() => {}
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_trigger_is_visible_to_clones() {
        let signal = ShutdownSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_triggered());
        signal.trigger();
        assert!(clone.is_triggered());
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_triggered() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiters() {
        let signal = ShutdownSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };
        tokio::task::yield_now().await;
        signal.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_listener_exits_when_triggered_elsewhere() {
        let signal = ShutdownSignal::new();
        let listener = tokio::spawn(listen_for_signals(signal.clone()));
        signal.trigger();
        tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .unwrap()
            .unwrap();
    }
}
