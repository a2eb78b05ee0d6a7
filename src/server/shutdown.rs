//! Coordinated shutdown for the controller process.
//!
//! [`wait_for_signal`] blocks until SIGTERM or SIGINT; the main task then
//! triggers the [`Shutdown`] handle, and every [`ShutdownListener`] wakes up
//! to stop accepting work. Listeners are cheap to clone and hand out.

use tokio::sync::watch;
use tracing::info;

/// Trigger half of the shutdown pair. Held by the main task.
pub struct Shutdown {
    sender: watch::Sender<bool>,
}

impl Shutdown {
    pub fn trigger(&self) {
        let _ = self.sender.send(true);
        info!("shutdown triggered");
    }
}

/// Listener half of the shutdown pair. Cloned into every component that must
/// wind down gracefully.
#[derive(Clone)]
pub struct ShutdownListener {
    receiver: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Resolve once shutdown has been triggered (or the trigger was dropped).
    pub async fn wait(&mut self) {
        while !*self.receiver.borrow() {
            if self.receiver.changed().await.is_err() {
                break;
            }
        }
    }

    /// Non-blocking check.
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Create a connected `(Shutdown, ShutdownListener)` pair.
pub fn shutdown_pair() -> (Shutdown, ShutdownListener) {
    let (sender, receiver) = watch::channel(false);
    (Shutdown { sender }, ShutdownListener { receiver })
}

/// Block until SIGTERM or SIGINT arrives; returns the signal name.
///
/// # Panics
/// Panics if the signal handlers cannot be registered (OS resource
/// exhaustion at startup).
#[cfg(unix)]
pub async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).unwrap_or_else(|e| panic!("cannot register SIGTERM handler: {e}"));
    let mut sigint =
        signal(SignalKind::interrupt()).unwrap_or_else(|e| panic!("cannot register SIGINT handler: {e}"));

    tokio::select! {
        _ = sigterm.recv() => {
            info!("received SIGTERM");
            "SIGTERM"
        }
        _ = sigint.recv() => {
            info!("received SIGINT");
            "SIGINT"
        }
    }
}

/// Non-unix fallback: wait for Ctrl+C.
///
/// # Panics
/// Panics if the Ctrl+C handler cannot be registered.
#[cfg(not(unix))]
pub async fn wait_for_signal() -> &'static str {
    tokio::signal::ctrl_c()
        .await
        .unwrap_or_else(|e| panic!("cannot wait for Ctrl+C: {e}"));
    info!("received Ctrl+C");
    "CTRL_C"
}
