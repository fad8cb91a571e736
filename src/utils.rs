//! Task-spawning helpers (§5): a future that should run forever gets
//! retried with exponential backoff and is cancelled cooperatively via a
//! [`Shutdown`] handle instead of being aborted mid-flight.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tracing::{error, info, warn};

use crate::shutdown::Shutdown;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Spawns `make_future` repeatedly: each time the produced future returns
/// (successfully or with an error) or panics, it is retried after an
/// exponentially increasing backoff, reset to [`INITIAL_BACKOFF`] on success.
/// The loop exits the moment `shutdown` is signalled, without waiting out an
/// in-progress backoff sleep.
pub fn spawn_with_backoff_cancel_on_shutdown<F, Fut>(
    name: impl Into<String>,
    shutdown: Shutdown,
    mut make_future: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let name = name.into();
    tokio::spawn(async move {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            if shutdown.is_shutting_down() {
                info!(task = %name, "shutting down before next attempt");
                return;
            }

            let result = retry_future(make_future()).await;

            if shutdown.is_shutting_down() {
                info!(task = %name, "shutting down after task exit");
                return;
            }

            match result {
                Ok(()) => {
                    warn!(task = %name, "task returned, restarting immediately");
                    backoff = INITIAL_BACKOFF;
                }
                Err(err) => {
                    error!(task = %name, error = %err, backoff = ?backoff, "task failed, backing off");
                    tokio::select! {
                        () = tokio::time::sleep(backoff) => {}
                        () = shutdown.await_shutdown_begin() => {
                            info!(task = %name, "shutdown during backoff sleep");
                            return;
                        }
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    })
}

/// Like [`spawn_with_backoff_cancel_on_shutdown`] but for a task that does
/// not need to be cancelled early: it still honors `shutdown` by exiting
/// between attempts, but never interrupts a sleep early.
pub fn spawn_with_backoff<F, Fut>(
    name: impl Into<String>,
    shutdown: Shutdown,
    make_future: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    spawn_with_backoff_cancel_on_shutdown(name, shutdown, make_future)
}

/// Runs `fut`, converting a panic into an `Err` instead of propagating it,
/// so one misbehaving iteration does not tear down the whole process.
async fn retry_future<Fut>(fut: Fut) -> anyhow::Result<()>
where
    Fut: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(anyhow::anyhow!("task panicked: {message}"))
        }
    }
}

/// Spawns a plain one-shot task, aborting the process if it panics. Used for
/// tasks whose failure indicates a programmer error rather than a transient
/// fault (e.g. the admin HTTP server).
pub fn spawn_or_abort<Fut>(fut: Fut) -> tokio::task::JoinHandle<()>
where
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
            error!("critical task panicked, aborting process");
            std::process::abort();
        }
    })
}
