//! Synchronous in-process broadcast with history and listener isolation.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::Event;

/// Callback invoked for every emitted event.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`]; pass to
/// [`EventBus::unsubscribe`] to detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct BusInner {
    listeners: Vec<(SubscriptionId, Listener)>,
    history: Vec<Event>,
    next_id: u64,
}

/// Append-only, order-preserving event broadcast.
///
/// `emit` records the event in history and then invokes every listener in
/// registration order. Each listener is isolated: a panic in one listener is
/// logged and swallowed so it cannot block delivery to the rest, corrupt
/// history, or reach the emitter.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&Event) + Send + Sync + 'static) -> SubscriptionId {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        inner.listeners.push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock().unwrap();
        inner.listeners.retain(|(sub, _)| *sub != id);
    }

    pub fn emit(&self, event: Event) {
        // Snapshot the listener set so delivery happens outside the lock;
        // listeners may subscribe or emit re-entrantly.
        let listeners: Vec<Listener> = {
            let mut inner = self.inner.lock().unwrap();
            inner.history.push(event.clone());
            inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                tracing::warn!(event = event.kind.name(), "event listener panicked");
            }
        }
    }

    /// Every event emitted so far, oldest first.
    pub fn history(&self) -> Vec<Event> {
        self.inner.lock().unwrap().history.clone()
    }

    /// Remove all listeners and empty the history.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.listeners.clear();
        inner.history.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().history.is_empty()
    }
}
