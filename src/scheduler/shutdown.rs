//! Shutdown signalling for workers.

use std::sync::Arc;

use tokio::sync::watch;

/// Level-triggered shutdown signal observed by workers and blocking dequeues.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
    /// Keeps the channel open for signals that have no controller.
    _owner: Option<Arc<watch::Sender<bool>>>,
}

impl ShutdownSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _owner: Some(Arc::new(tx)),
        }
    }

    /// Check if shutdown was requested.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is requested.
    ///
    /// Also resolves if the controller was dropped.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}

/// Owner side of a [`ShutdownSignal`].
#[derive(Debug)]
pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Creates a new signal tied to this controller.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
            _owner: None,
        }
    }

    /// Signal shutdown to every subscriber.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Re-arms the controller so it can drive a new generation of workers.
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_reaches_all_signals() {
        let controller = ShutdownController::new();
        let mut a = controller.signal();
        let b = controller.signal();
        assert!(!a.is_triggered());

        controller.trigger();
        assert!(b.is_triggered());
        assert!(controller.is_triggered());
        tokio::time::timeout(Duration::from_secs(1), a.wait())
            .await
            .expect("wait should resolve after trigger");
    }

    #[tokio::test]
    async fn test_signal_created_after_trigger_sees_it() {
        let controller = ShutdownController::new();
        controller.trigger();
        assert!(controller.signal().is_triggered());

        controller.reset();
        assert!(!controller.signal().is_triggered());
    }

    #[tokio::test]
    async fn test_never_does_not_fire() {
        let mut signal = ShutdownSignal::never();
        assert!(!signal.is_triggered());
        let waited = tokio::time::timeout(Duration::from_millis(20), signal.wait()).await;
        assert!(waited.is_err());
    }
}
