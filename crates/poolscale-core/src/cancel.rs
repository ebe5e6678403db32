//! Cancellation signal shared by one orchestration call.
//!
//! A thin wrapper over a `watch` channel, the same shape the daemon uses
//! for its shutdown signal. Dropping the [`CancelHandle`] without
//! cancelling leaves receivers waiting forever rather than waking them.

use tokio::sync::watch;

/// Fires a [`Cancellation`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel every clone of the paired [`Cancellation`].
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Cloneable cancellation signal passed into long-running operations.
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    /// Create a linked handle/signal pair.
    pub fn new() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, Self { rx })
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancelled. Pends forever if the handle is dropped first.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::never()
    }
}
