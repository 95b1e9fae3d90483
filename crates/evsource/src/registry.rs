// Subscription registry — routes events by type to callbacks.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use crate::event::Event;

/// Callback invoked for each matching event, on the thread driving the
/// connection. Blocking here stalls the read loop.
pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Where a subscription listens.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Bucket {
    /// Every event, regardless of type.
    All,
    /// Events whose type equals the key; the empty key matches unnamed
    /// events.
    Type(String),
}

struct Subscription {
    bucket: Bucket,
    callback: EventCallback,
}

#[derive(Default)]
struct RegistryInner {
    subscriptions: HashMap<u64, Subscription>,
    /// Registration-ordered ids per type key.
    by_type: HashMap<String, Vec<u64>>,
    /// Registration-ordered wildcard ids.
    wildcard: Vec<u64>,
    next_id: u64,
    closed: bool,
}

impl RegistryInner {
    fn insert(&mut self, bucket: Bucket, callback: EventCallback) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        match &bucket {
            Bucket::All => self.wildcard.push(id),
            Bucket::Type(key) => self.by_type.entry(key.clone()).or_default().push(id),
        }
        self.subscriptions.insert(id, Subscription { bucket, callback });
        id
    }

    fn remove(&mut self, id: u64) {
        let Some(subscription) = self.subscriptions.remove(&id) else {
            return;
        };
        match subscription.bucket {
            Bucket::All => self.wildcard.retain(|&other| other != id),
            Bucket::Type(key) => {
                if let Some(ids) = self.by_type.get_mut(&key) {
                    ids.retain(|&other| other != id);
                    if ids.is_empty() {
                        self.by_type.remove(&key);
                    }
                }
            }
        }
    }

    /// Callbacks matching `event`: wildcard subscribers first, then the
    /// type bucket, each in registration order.
    fn snapshot(&self, event_type: &str) -> Vec<EventCallback> {
        let type_ids = self.by_type.get(event_type).map(Vec::as_slice).unwrap_or(&[]);
        self.wildcard
            .iter()
            .chain(type_ids)
            .filter_map(|id| self.subscriptions.get(id))
            .map(|s| Arc::clone(&s.callback))
            .collect()
    }
}

/// The set of callbacks attached to one connection.
///
/// Subscribe and remove are callable from any thread at any time, including
/// from inside a callback. Each dispatch takes a snapshot under the lock
/// and invokes callbacks outside it, so a removal during dispatch lets the
/// in-flight delivery complete but is honored before the next event.
pub(crate) struct SubscriptionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner::default())),
        }
    }

    pub(crate) fn subscribe(&self, event_type: String, callback: EventCallback) -> SubscriptionHandle {
        self.add(Bucket::Type(event_type), callback)
    }

    pub(crate) fn subscribe_all(&self, callback: EventCallback) -> SubscriptionHandle {
        self.add(Bucket::All, callback)
    }

    fn add(&self, bucket: Bucket, callback: EventCallback) -> SubscriptionHandle {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        if inner.closed {
            // The connection already reached a terminal state; hand back an
            // inert handle.
            return SubscriptionHandle {
                registry: Weak::new(),
                id: 0,
            };
        }
        let id = inner.insert(bucket, callback);
        SubscriptionHandle {
            registry: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Invoke every matching callback. A panicking callback is contained
    /// and logged; dispatch continues with the remaining subscribers.
    pub(crate) fn dispatch(&self, event: &Event) {
        let callbacks = {
            let inner = self.inner.lock().expect("registry lock poisoned");
            inner.snapshot(&event.event_type)
        };
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                tracing::warn!(event_type = %event.event_type, "event callback panicked");
            }
        }
    }

    /// Terminal state: existing subscriptions are dropped and later
    /// subscribes become no-ops.
    pub(crate) fn close(&self) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.closed = true;
        inner.subscriptions.clear();
        inner.by_type.clear();
        inner.wildcard.clear();
    }
}

/// Removal token returned by the subscribe methods.
///
/// Holds only a weak reference to the registry, so keeping handles around
/// does not keep a finished connection alive. `remove` is idempotent and
/// safe to call from inside the subscription's own callback.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    registry: Weak<Mutex<RegistryInner>>,
    id: u64,
}

impl SubscriptionHandle {
    /// Detach the subscription. The currently in-flight dispatch (if any)
    /// still reaches the callback; no later event will.
    pub fn remove(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().expect("registry lock poisoned").remove(self.id);
        }
    }
}
