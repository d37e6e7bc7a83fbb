use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::{LinkError, Result};

/// A single-resolution slot for one in-flight callback operation.
///
/// The sender is taken out of the slot before it is used, so a late or
/// duplicated callback finds the slot empty and is dropped.
pub(crate) struct PendingSlot<T> {
    op: &'static str,
    sender: Mutex<Option<oneshot::Sender<Result<T>>>>,
}

impl<T> PendingSlot<T> {
    pub(crate) const fn new(op: &'static str) -> Self {
        Self {
            op,
            sender: Mutex::new(None),
        }
    }

    /// Arm the slot. Fails if an operation of this kind is already pending.
    pub(crate) fn install(&self) -> Result<oneshot::Receiver<Result<T>>> {
        let mut guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(LinkError::Busy(self.op));
        }
        let (tx, rx) = oneshot::channel();
        *guard = Some(tx);
        Ok(rx)
    }

    /// Complete the pending operation. Returns false if nothing was pending.
    pub(crate) fn resolve(&self, value: Result<T>) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Disarm without resolving.
    pub(crate) fn clear(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Wait for the completion, clearing the slot if `timeout` elapses first.
    pub(crate) async fn wait(
        &self,
        rx: oneshot::Receiver<Result<T>>,
        timeout: Duration,
    ) -> Result<T> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LinkError::Closed),
            Err(_) => {
                self.clear();
                Err(LinkError::Timeout {
                    op: self.op,
                    after: timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_exactly_once() {
        let slot = PendingSlot::<u16>::new("mtu");
        let rx = slot.install().unwrap();
        assert!(slot.resolve(Ok(247)));
        assert!(!slot.resolve(Ok(23)), "duplicate callback must be ignored");
        assert_eq!(slot.wait(rx, Duration::from_millis(50)).await, Ok(247));
    }

    #[tokio::test]
    async fn second_install_is_busy() {
        let slot = PendingSlot::<()>::new("connect");
        let _rx = slot.install().unwrap();
        assert_eq!(slot.install().unwrap_err(), LinkError::Busy("connect"));
    }

    #[tokio::test]
    async fn timeout_clears_slot_and_drops_late_callback() {
        let slot = PendingSlot::<()>::new("discover");
        let rx = slot.install().unwrap();
        let err = slot.wait(rx, Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, LinkError::Timeout { op: "discover", .. }));
        assert!(!slot.is_pending());
        assert!(!slot.resolve(Ok(())), "late callback must not resolve anything");
    }

    #[tokio::test]
    async fn abandoned_receiver_does_not_block_reinstall() {
        let slot = PendingSlot::<bool>::new("notify");
        drop(slot.install().unwrap());
        assert!(slot.install().is_ok());
    }
}
