//! Cache notifications
//!
//! Events are fanned out to subscriber channels from whichever thread caused
//! them: `Added`, `Deleted`, `StartedLoading` and the first `DoneLoading` of a
//! batch on the calling thread, `NeedsReload` from a load thread or the
//! context thread, `Changed` from the context thread only. Subscribers drain
//! their receiver on any thread they like.

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use uuid::Uuid;

/// Observable change to the cache
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceEvent {
    /// Handle registered
    Added(Uuid),
    /// Handle finished post-construction
    Changed(Uuid),
    /// Payload unloaded, or handle deleted from the registry
    Deleted(Uuid),
    /// In-flight count went from 0 to 1
    StartedLoading,
    /// In-flight count went from 1 to 0
    DoneLoading,
    /// Payload missing and no load in flight
    NeedsReload(Uuid),
}

/// Fan-out of [`ResourceEvent`]s to channel subscribers
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<ResourceEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// New unbounded subscription; dropping the receiver unsubscribes
    pub fn subscribe(&self) -> Receiver<ResourceEvent> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: ResourceEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
