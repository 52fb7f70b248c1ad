//! Cross-tab broadcast bus.
//!
//! Best-effort fan-out between browsing contexts of the same profile. Messages may arrive
//! late, out of order, or not at all; receivers re-read authoritative state instead of
//! trusting payloads. When the transport is unavailable the bus is a no-op on both ends.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::client::local_store::LocalDraft;

/// Default number of undelivered messages kept per subscriber before the oldest are dropped.
pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// Messages which can be sent between tabs.
#[derive(Clone, Debug, PartialEq)]
pub enum BusMessage {
    /// The shared local draft was written.
    StorageUpdate(LocalDraft),

    /// The shared local draft was removed.
    StorageClear,

    /// A document reached the Document Store.
    SyncSuccess(Uuid),
}

#[derive(Clone, Debug)]
struct Envelope {
    origin: Uuid,
    message: BusMessage,
}

/// One tab's handle on the bus. Cloning keeps the same origin; use [`BroadcastBus::sibling`]
/// for another tab.
#[derive(Clone, Debug)]
pub struct BroadcastBus {
    tx: Option<broadcast::Sender<Envelope>>,
    origin: Uuid,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx: Some(tx),
            origin: Uuid::new_v4(),
        }
    }

    /// A bus for environments without cross-tab messaging.
    pub fn unsupported() -> Self {
        Self {
            tx: None,
            origin: Uuid::new_v4(),
        }
    }

    /// Handle for another tab on the same channel.
    pub fn sibling(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            origin: Uuid::new_v4(),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.tx.is_some()
    }

    /// Fire and forget. Having no listeners is not an error.
    pub fn publish(&self, message: BusMessage) {
        let Some(tx) = &self.tx else {
            return;
        };
        let envelope = Envelope {
            origin: self.origin,
            message,
        };
        if tx.send(envelope).is_err() {
            trace!("No tabs listening on the broadcast bus");
        }
    }

    /// Receives messages from every other tab, never this one's own.
    pub fn subscribe(&self) -> BusSubscriber {
        BusSubscriber {
            rx: self.tx.as_ref().map(|tx| tx.subscribe()),
            origin: self.origin,
        }
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

pub struct BusSubscriber {
    rx: Option<broadcast::Receiver<Envelope>>,
    origin: Uuid,
}

impl BusSubscriber {
    /// Waits for the next message from a sibling. `None` once the bus is closed or when it
    /// was never supported.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(envelope) if envelope.origin == self.origin => continue,
                Ok(envelope) => return Some(envelope.message),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Broadcast subscriber lagged; {skipped} message(s) dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.try_recv() {
                Ok(envelope) if envelope.origin == self.origin => continue,
                Ok(envelope) => return Some(envelope.message),
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!("Broadcast subscriber lagged; {skipped} message(s) dropped");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_siblings_receive_but_sender_does_not() {
        let tab_a = BroadcastBus::new(8);
        let tab_b = tab_a.sibling();
        let mut a_rx = tab_a.subscribe();
        let mut b_rx = tab_b.subscribe();

        let id = Uuid::new_v4();
        tab_a.publish(BusMessage::SyncSuccess(id));

        assert_eq!(b_rx.recv().await, Some(BusMessage::SyncSuccess(id)));
        assert_eq!(a_rx.try_recv(), None);
    }

    #[test]
    fn test_unsupported_bus_is_a_noop() {
        let bus = BroadcastBus::unsupported();
        assert!(!bus.is_supported());
        let mut rx = bus.sibling().subscribe();
        bus.publish(BusMessage::StorageClear);
        assert_eq!(rx.try_recv(), None);
    }

    #[tokio::test]
    async fn test_unsupported_recv_returns_none() {
        let mut rx = BroadcastBus::unsupported().subscribe();
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_lagging_subscriber_skips_dropped_messages() {
        let tab_a = BroadcastBus::new(2);
        let mut rx = tab_a.sibling().subscribe();
        for _ in 0..5 {
            tab_a.publish(BusMessage::StorageClear);
        }
        let last = Uuid::new_v4();
        tab_a.publish(BusMessage::SyncSuccess(last));

        let mut received = Vec::new();
        while let Some(msg) = rx.try_recv() {
            received.push(msg);
        }
        assert_eq!(received.last(), Some(&BusMessage::SyncSuccess(last)));
        assert!(received.len() <= 2);
    }

    #[test]
    fn test_publish_without_listeners_is_fine() {
        BroadcastBus::new(4).publish(BusMessage::StorageClear);
    }
}
