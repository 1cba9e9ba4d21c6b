//! A one-shot signal (§5, §9): tasks wait on it, triggering it is
//! idempotent, and it can optionally carry a typed value set at trigger
//! time. Used to coordinate shutdown across the program I/O multiplexer's
//! independent tasks (stream forwarders, pipe reader, input-prompt driver,
//! heartbeat timer).

use tokio::sync::watch;

#[derive(Clone)]
pub struct Latch<T: Clone> {
    tx: watch::Sender<Option<T>>,
    rx: watch::Receiver<Option<T>>,
}

impl<T: Clone> Latch<T> {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self { tx, rx }
    }

    /// Idempotent: triggering an already-triggered latch with a new value
    /// is a no-op, matching "one-shot" semantics.
    pub fn trigger(&self, value: T) {
        if self.rx.borrow().is_none() {
            let _ = self.tx.send(Some(value));
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn value(&self) -> Option<T> {
        self.rx.borrow().clone()
    }

    /// Waits until triggered, returning the value it was triggered with.
    pub async fn wait(&self) -> T {
        let mut rx = self.rx.clone();
        loop {
            if let Some(v) = rx.borrow().clone() {
                return v;
            }
            if rx.changed().await.is_err() {
                // Sender dropped without ever triggering; treat as a
                // permanent wait (callers race this against other futures).
                std::future::pending::<()>().await;
            }
        }
    }
}

impl<T: Clone> Default for Latch<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub type UnitLatch = Latch<()>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_is_idempotent() {
        let latch: Latch<u32> = Latch::new();
        latch.trigger(1);
        latch.trigger(2);
        assert_eq!(latch.value(), Some(1));
    }

    #[tokio::test]
    async fn wait_resolves_after_trigger() {
        let latch: UnitLatch = Latch::new();
        let waiter = latch.clone();
        let handle = tokio::spawn(async move {
            waiter.wait().await;
        });
        latch.trigger(());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn is_triggered_reflects_state() {
        let latch: UnitLatch = Latch::new();
        assert!(!latch.is_triggered());
        latch.trigger(());
        assert!(latch.is_triggered());
    }
}
