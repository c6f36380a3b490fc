//! Minimal cancellation signal shared by the adapter's schedulers.
//!
//! Narrower than a full phased shutdown: the accrual core only needs "stop
//! picking up new batches" and "how long do I have left to drain." Modeled
//! on the broadcast/watch channel pair the rest of this codebase uses for
//! shutdown coordination.

use tokio::sync::watch;

#[derive(Clone)]
pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Signals all subscribed tokens that shutdown has begun.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves as soon as shutdown is triggered; resolves immediately if
    /// it already has been.
    pub async fn cancelled(&mut self) {
        if self.is_triggered() {
            return;
        }
        let _ = self.rx.changed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_observes_trigger() {
        let controller = ShutdownController::new();
        let mut token = controller.token();
        assert!(!token.is_triggered());
        controller.trigger();
        token.cancelled().await;
        assert!(token.is_triggered());
    }
}
