//! Shutdown Coordination
//!
//! Every way the process can be asked to stop funnels into one
//! [`ShutdownController`]: termination signals (SIGINT, SIGTERM) and panics
//! anywhere in the process. The first trigger wins and records why; later
//! triggers are no-ops. The accept loop waits on the controller and starts
//! draining as soon as it fires.
//!
//! A panic is treated as an unrecoverable fault: internal state can no
//! longer be trusted, so the server drains and exits non-zero rather than
//! limping along.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, info};

/// Why shutdown was initiated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownKind {
    /// A termination signal asked us to stop; exit 0
    Voluntary,
    /// An unrecoverable fault forced the stop; exit 1
    Fault,
}

/// Single point through which all shutdown triggers pass
pub struct ShutdownController {
    /// Lock-free fast path for "are we shutting down" checks
    triggered: AtomicBool,
    /// Provenance of the winning trigger
    kind: Mutex<Option<ShutdownKind>>,
    /// Wakes tasks blocked in [`ShutdownController::wait`]
    notify: Notify,
}

impl ShutdownController {
    /// Create a controller; shared between the signal listener, the panic
    /// hook, and the server
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            triggered: AtomicBool::new(false),
            kind: Mutex::new(None),
            notify: Notify::new(),
        })
    }

    /// Initiate shutdown. Returns whether this call was the one that
    /// initiated it; a trigger while already shutting down is a no-op.
    pub fn trigger(&self, kind: ShutdownKind) -> bool {
        let mut slot = self.kind.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(kind);
        self.triggered.store(true, Ordering::SeqCst);
        drop(slot);

        self.notify.notify_waiters();
        true
    }

    /// Whether shutdown has been initiated
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Provenance of the trigger, if any fired yet
    pub fn kind(&self) -> Option<ShutdownKind> {
        *self.kind.lock()
    }

    /// Wait until shutdown is initiated. Returns immediately if it already
    /// was.
    pub async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a trigger that lands between
        // the check and the await cannot be lost.
        notified.as_mut().enable();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }
}

/// Route panics into the controller as fault-triggered shutdown
///
/// The previous hook still runs first, so panic messages and backtraces
/// keep printing the way they always have.
pub fn install_panic_hook(controller: &Arc<ShutdownController>) {
    let controller = Arc::clone(controller);
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        previous(info);
        error!(panic = %info, "unrecoverable fault, initiating shutdown");
        controller.trigger(ShutdownKind::Fault);
    }));
}

/// Listen for termination signals and trigger voluntary shutdown
pub fn spawn_signal_listener(controller: &Arc<ShutdownController>) {
    let controller = Arc::clone(controller);
    tokio::spawn(async move {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {
                info!("Received Ctrl+C, shutting down");
            }
            () = terminate => {
                info!("Received SIGTERM, shutting down");
            }
        }

        controller.trigger(ShutdownKind::Voluntary);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_trigger_wins() {
        let controller = ShutdownController::new();
        assert!(!controller.is_triggered());
        assert_eq!(controller.kind(), None);

        assert!(controller.trigger(ShutdownKind::Voluntary));
        assert!(controller.is_triggered());
        assert_eq!(controller.kind(), Some(ShutdownKind::Voluntary));

        // Second trigger is a no-op and cannot rewrite the provenance
        assert!(!controller.trigger(ShutdownKind::Fault));
        assert_eq!(controller.kind(), Some(ShutdownKind::Voluntary));
    }

    #[tokio::test]
    async fn wait_wakes_on_trigger() {
        let controller = ShutdownController::new();
        let waiter = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.wait().await })
        };

        controller.trigger(ShutdownKind::Voluntary);
        waiter.await.expect("waiter should complete");
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_already_triggered() {
        let controller = ShutdownController::new();
        controller.trigger(ShutdownKind::Fault);
        controller.wait().await;
    }
}
