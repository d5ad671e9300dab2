//! Ambient shutdown signal shared by long-running tasks

use tokio::sync::watch;

/// Create a linked trigger/observer pair. Dropping the trigger without
/// firing it also releases the observers, so tasks die with the node.
pub fn shutdown_pair() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

/// Cloneable observer side of the shutdown signal.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Resolves once the node is shutting down.
    pub async fn cancelled(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow() {
                return;
            }
        }
        // Trigger dropped: treat as shutdown.
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_releases_waiters() {
        let (trigger, shutdown) = shutdown_pair();
        let mut observer = shutdown.clone();

        let waiter = tokio::spawn(async move { observer.cancelled().await });
        trigger.trigger();
        waiter.await.unwrap();
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_trigger_releases_waiters() {
        let (trigger, mut shutdown) = shutdown_pair();
        drop(trigger);
        shutdown.cancelled().await;
    }
}
