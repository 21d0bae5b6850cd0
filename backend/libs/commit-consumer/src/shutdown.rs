//! Cooperative shutdown for the consumer loop
//!
//! The signal task only flips a flag; the loop checks it at iteration
//! boundaries so an in-flight record is processed and committed before
//! the loop stops.

use std::future::Future;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Create a connected trigger/signal pair
pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

/// Sending half: requests shutdown
#[derive(Clone, Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// A new signal observing this trigger
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving half: observed by the loop
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Whether shutdown was requested. A dropped trigger counts as a request.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolve once shutdown is requested or the trigger is dropped
    pub async fn triggered(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Wait for SIGINT or SIGTERM
#[cfg(unix)]
pub async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

/// Wait for Ctrl+C
#[cfg(not(unix))]
pub async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Exit code when a second signal interrupts a pending shutdown
pub const FORCED_EXIT_CODE: i32 = 1;

/// Trigger shutdown on the first signal. Returns `true` if a second signal
/// arrived while the shutdown was still pending.
async fn relay_signals<F, Fut>(trigger: ShutdownTrigger, mut next_signal: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = next_signal().await {
        error!(error = %e, "Failed to listen for shutdown signal, shutting down");
        trigger.trigger();
        return false;
    }

    info!("Shutdown signal received, finishing in-flight record");
    trigger.trigger();

    match next_signal().await {
        Ok(()) => {
            warn!("Second shutdown signal received, exiting without waiting");
            true
        }
        Err(_) => false,
    }
}

/// Spawn a task that triggers shutdown on SIGINT/SIGTERM.
///
/// A second signal ends the process immediately with [`FORCED_EXIT_CODE`];
/// the in-flight record is then redelivered on restart.
pub fn spawn_signal_listener(trigger: ShutdownTrigger) -> JoinHandle<()> {
    tokio::spawn(async move {
        if relay_signals(trigger, wait_for_signal).await {
            std::process::exit(FORCED_EXIT_CODE);
        }
    })
}
