//! Cooperative shutdown primitive (§5): a `watch`-channel based signal,
//! wrapped as a cloneable handle so each subsystem can hold its own copy
//! instead of reaching into process-global statics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug)]
struct Inner {
    sender: watch::Sender<bool>,
    forceful: AtomicBool,
    graceful_period: Duration,
    forceful_period: Duration,
}

/// A cloneable cooperative-cancellation token. Every long-running task holds
/// a clone and checks [`Shutdown::is_shutting_down`] at its loop boundary, or
/// awaits [`Shutdown::await_shutdown_begin`] to suspend until shutdown is
/// signalled.
#[derive(Debug, Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
    receiver: watch::Receiver<bool>,
}

impl Shutdown {
    /// Builds a new shutdown handle. `graceful_period` is how long spawned
    /// tasks are given to wind down after a graceful signal;
    /// `forceful_period` is the hard cap after a second signal (or an
    /// unresponsive graceful period) before the process should abort.
    #[must_use]
    pub fn spawn(graceful_period: Duration, forceful_period: Duration) -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                sender,
                forceful: AtomicBool::new(false),
                graceful_period,
                forceful_period,
            }),
            receiver,
        }
    }

    /// Installs OS signal handlers (SIGINT/SIGTERM on unix, Ctrl-C
    /// elsewhere) that trigger [`Shutdown::shutdown`] on first receipt and
    /// escalate to `std::process::exit(1)` if a second signal arrives after
    /// `forceful_period`.
    pub fn install_signal_handler(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            warn!("received shutdown signal");
            this.shutdown();

            wait_for_signal().await;
            warn!("received second shutdown signal, forcing exit");
            std::process::exit(1);
        });
    }

    /// Signals shutdown; idempotent.
    pub fn shutdown(&self) {
        if !self.inner.forceful.swap(true, Ordering::SeqCst) {
            info!("shutdown requested");
        }
        let _ = self.inner.sender.send(true);
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once shutdown has been signalled.
    pub async fn await_shutdown_begin(&self) {
        let mut receiver = self.receiver.clone();
        if *receiver.borrow() {
            return;
        }
        let _ = receiver.changed().await;
    }

    #[must_use]
    pub fn graceful_period(&self) -> Duration {
        self.inner.graceful_period
    }

    #[must_use]
    pub fn forceful_period(&self) -> Duration {
        self.inner.forceful_period
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_wakes_waiters() {
        let shutdown = Shutdown::spawn(Duration::from_secs(30), Duration::from_secs(1));
        assert!(!shutdown.is_shutting_down());

        let waiter = shutdown.clone();
        let handle = tokio::spawn(async move {
            waiter.await_shutdown_begin().await;
        });

        shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should resolve promptly")
            .unwrap();
        assert!(shutdown.is_shutting_down());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let shutdown = Shutdown::spawn(Duration::from_secs(30), Duration::from_secs(1));
        shutdown.shutdown();
        shutdown.shutdown();
        assert!(shutdown.is_shutting_down());
    }
}
