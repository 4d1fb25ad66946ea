//! Typed update channels.
//!
//! A wallet publishes [`Update`]s (threads and devices coming and going,
//! invites arriving) and every thread publishes [`ThreadUpdate`]s for the
//! blocks it applies. Each subscriber gets its own bounded queue and sees
//! every event published after it subscribed. A subscriber that falls
//! behind skips the oldest events rather than slowing publishers down.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use weft_core::{BlockId, BlockKind, PeerId, ThreadId};

/// What changed at the wallet level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpdateKind {
    ThreadAdded,
    ThreadRemoved,
    DeviceAdded,
    DeviceRemoved,
    /// A direct invite addressed to this wallet arrived.
    InviteReceived,
}

/// A wallet-level event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Update {
    /// Hex id of the thread, device or invite block.
    pub id: String,
    pub name: String,
    pub kind: UpdateKind,
}

/// A block was applied to a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadUpdate {
    pub block: BlockId,
    pub thread: ThreadId,
    pub thread_name: String,
    pub kind: BlockKind,
    pub author: PeerId,
}

/// A broadcast channel that can be closed explicitly.
///
/// After [`close`](Self::close), subscribers drain what was already queued
/// and then observe the end of the stream. Publishing to a closed bus is a
/// no-op.
pub struct UpdateBus<T> {
    sender: Mutex<Option<broadcast::Sender<T>>>,
}

impl<T: Clone + Send + 'static> UpdateBus<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    /// Publish an event. Returns how many subscribers will see it.
    pub fn publish(&self, event: T) -> usize {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            // No subscribers is not an error.
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Subscribe to future events. On a closed bus the subscription ends
    /// immediately.
    pub fn subscribe(&self) -> Subscription<T> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let receiver = match guard.as_ref() {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        };
        Subscription { receiver }
    }

    pub fn subscriber_count(&self) -> usize {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map_or(0, |s| s.receiver_count())
    }

    /// Close the bus. Idempotent.
    pub fn close(&self) {
        let mut guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.take().is_some() {
            debug!("update bus closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// The receiving end of an [`UpdateBus`]. Dropping it unsubscribes.
pub struct Subscription<T> {
    receiver: broadcast::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    /// Wait for the next event.
    ///
    /// Returns `None` once the bus is closed and the queue is drained.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    debug!(lagged = count, "subscriber lagged, some updates dropped");
                    continue;
                }
            }
        }
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    debug!(lagged = count, "subscriber lagged, some updates dropped");
                    continue;
                }
                Err(_) => return None,
            }
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        debug!("update subscription dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(n: u8) -> Update {
        Update {
            id: format!("{:02x}", n),
            name: format!("thread {}", n),
            kind: UpdateKind::ThreadAdded,
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_event() {
        let bus = UpdateBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        assert_eq!(bus.publish(update(1)), 2);
        bus.publish(update(2));

        for sub in [&mut a, &mut b] {
            assert_eq!(sub.recv().await, Some(update(1)));
            assert_eq!(sub.recv().await, Some(update(2)));
        }
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscribers() {
        let bus = UpdateBus::new(16);
        bus.publish(update(1));
        let mut late = bus.subscribe();
        assert!(late.try_recv().is_none());
        bus.publish(update(2));
        assert_eq!(late.recv().await, Some(update(2)));
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let bus = UpdateBus::new(16);
        let mut sub = bus.subscribe();
        bus.publish(update(1));
        bus.close();
        bus.close();

        assert!(bus.is_closed());
        assert_eq!(sub.recv().await, Some(update(1)));
        assert_eq!(sub.recv().await, None);
        assert_eq!(bus.publish(update(2)), 0);
        assert_eq!(bus.subscribe().recv().await, None);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_oldest() {
        let bus = UpdateBus::new(2);
        let mut sub = bus.subscribe();
        for n in 0..5 {
            bus.publish(update(n));
        }
        assert_eq!(sub.recv().await, Some(update(3)));
        assert_eq!(sub.recv().await, Some(update(4)));
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus: UpdateBus<Update> = UpdateBus::new(4);
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(update(1)), 0);
    }
}
