use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

/// Listens for the controller-wide shutdown signal.
///
/// Once the signal is observed it stays observed, so later `recv` calls
/// return immediately.
#[derive(Debug)]
pub struct Shutdown {
    is_shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub fn new(notify: broadcast::Receiver<()>) -> Self {
        Self {
            is_shutdown: false,
            notify,
        }
    }

    /// Check for a pending signal without waiting
    pub fn is_shutdown(&mut self) -> bool {
        if !self.is_shutdown {
            self.is_shutdown = !matches!(self.notify.try_recv(), Err(TryRecvError::Empty));
        }
        self.is_shutdown
    }

    /// Wait for the signal. A dropped sender counts as shutdown.
    pub async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_is_sticky() {
        let (tx, rx) = broadcast::channel(1);
        let mut shutdown = Shutdown::new(rx);
        assert!(!shutdown.is_shutdown());

        tx.send(()).unwrap();
        assert!(shutdown.is_shutdown());
        assert!(shutdown.is_shutdown());
        shutdown.recv().await;
    }

    #[tokio::test]
    async fn test_dropped_sender_counts_as_shutdown() {
        let (tx, rx) = broadcast::channel::<()>(1);
        let mut shutdown = Shutdown::new(rx);
        drop(tx);

        shutdown.recv().await;
        assert!(shutdown.is_shutdown());
    }
}
