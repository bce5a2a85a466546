//! Cooperative cancellation shared between the engine and handler tasks.

use tokio::sync::watch;

/// A cooperative cancellation signal.
///
/// Wraps a `tokio::sync::watch` channel. Clones share state, so the engine
/// keeps one copy and hands another to the running handler or transport task.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until cancellation is requested. Returns immediately if it
    /// already was.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // wait_for checks the current value first
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Owned future, for combinators that need `'static`
    pub fn cancelled_owned(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let handle = self.clone();
        async move { handle.cancelled().await }
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}
