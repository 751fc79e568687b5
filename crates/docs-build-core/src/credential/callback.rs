//! Delivery of sign-in callback URIs from the host to a waiting sign-in flow.
//!
//! The host calls [`CallbackHub::deliver`] whenever its registered URI
//! scheme is opened. At most one sign-in flow listens at a time. Dropping
//! the [`PendingCallback`] disposes the listener, so a callback arriving
//! after a timeout finds nobody and is ignored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::debug;
use url::Url;

#[derive(Debug, Default)]
struct Slot {
    listener: Option<(u64, oneshot::Sender<Url>)>,
}

/// Routes callback URIs to the current listener.
#[derive(Debug, Clone, Default)]
pub struct CallbackHub {
    slot: Arc<Mutex<Slot>>,
    next_id: Arc<AtomicU64>,
}

impl CallbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener, replacing any previous one.
    pub fn listen(&self) -> PendingCallback {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = oneshot::channel();
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.listener = Some((id, sender));
        PendingCallback {
            id,
            receiver,
            slot: Arc::clone(&self.slot),
        }
    }

    /// Hand a callback URI to the listener. Returns `false` when nobody is
    /// listening.
    pub fn deliver(&self, uri: Url) -> bool {
        let listener = {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            slot.listener.take()
        };
        match listener {
            Some((id, sender)) => {
                let delivered = sender.send(uri).is_ok();
                debug!(listener = id, delivered, "sign-in callback delivered");
                delivered
            }
            None => {
                debug!("sign-in callback ignored: no listener");
                false
            }
        }
    }

    pub fn has_listener(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .listener
            .is_some()
    }
}

/// A registered listener. Dropping it disposes the registration.
#[derive(Debug)]
pub struct PendingCallback {
    id: u64,
    receiver: oneshot::Receiver<Url>,
    slot: Arc<Mutex<Slot>>,
}

impl PendingCallback {
    /// Wait for the callback. `None` if the listener was replaced.
    pub async fn recv(&mut self) -> Option<Url> {
        (&mut self.receiver).await.ok()
    }
}

impl Drop for PendingCallback {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(slot.listener, Some((id, _)) if id == self.id) {
            slot.listener = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri() -> Url {
        Url::parse("docs-build://docs-build/github-authenticate?id=1").unwrap()
    }

    #[tokio::test]
    async fn test_deliver_reaches_listener() {
        let hub = CallbackHub::new();
        let mut pending = hub.listen();
        assert!(hub.deliver(uri()));
        assert_eq!(pending.recv().await, Some(uri()));
        assert!(!hub.has_listener());
    }

    #[test]
    fn test_deliver_without_listener_is_ignored() {
        let hub = CallbackHub::new();
        assert!(!hub.deliver(uri()));
    }

    #[test]
    fn test_dropping_pending_disposes_listener() {
        let hub = CallbackHub::new();
        let pending = hub.listen();
        assert!(hub.has_listener());
        drop(pending);
        assert!(!hub.has_listener());
        assert!(!hub.deliver(uri()));
    }

    #[tokio::test]
    async fn test_new_listener_replaces_old() {
        let hub = CallbackHub::new();
        let mut first = hub.listen();
        let mut second = hub.listen();
        assert_eq!(first.recv().await, None);

        // Dropping the stale listener must not dispose the new one.
        drop(first);
        assert!(hub.has_listener());
        assert!(hub.deliver(uri()));
        assert_eq!(second.recv().await, Some(uri()));
    }
}
