//! Event type → handler table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

/// Callback invoked with an envelope's `data`.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

struct Entry {
    id: u64,
    handler: Handler,
}

/// At most one handler per event type; the last registration wins.
#[derive(Default)]
pub struct SubscriptionTable {
    entries: Mutex<HashMap<String, Entry>>,
    next_id: AtomicU64,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `handler` for `event_type`, replacing any previous one.
    pub fn subscribe<F>(self: &Arc<Self>, event_type: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let previous = self.lock().insert(
            event_type.to_string(),
            Entry {
                id,
                handler: Arc::new(handler),
            },
        );
        if previous.is_some() {
            tracing::debug!(event_type, "handler replaced");
        }
        Subscription {
            table: Arc::clone(self),
            event_type: event_type.to_string(),
            id,
        }
    }

    /// Removes the registration `id` if it is still the active one.
    fn remove(&self, event_type: &str, id: u64) -> bool {
        let mut entries = self.lock();
        match entries.get(event_type) {
            Some(entry) if entry.id == id => {
                entries.remove(event_type);
                true
            }
            _ => false,
        }
    }

    /// Invokes the handler for `event_type`, if any. Returns whether one ran.
    ///
    /// The handler runs after the table lock is released, so it may
    /// subscribe or unsubscribe.
    pub fn dispatch(&self, event_type: &str, data: &Value) -> bool {
        let handler = self.lock().get(event_type).map(|e| Arc::clone(&e.handler));
        match handler {
            Some(h) => {
                h(data);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.lock().contains_key(event_type)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// One registration in a [`SubscriptionTable`].
///
/// Dropping it leaves the handler installed; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
pub struct Subscription {
    table: Arc<SubscriptionTable>,
    event_type: String,
    id: u64,
}

impl Subscription {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Removes this registration. A newer handler for the same type is
    /// left untouched. Returns whether anything was removed.
    pub fn unsubscribe(self) -> bool {
        self.table.remove(&self.event_type, self.id)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event_type", &self.event_type)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Value) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move |_: &Value| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn last_registration_wins() {
        let table = Arc::new(SubscriptionTable::new());
        let (h1_calls, h1) = counter();
        let (h2_calls, h2) = counter();

        let _s1 = table.subscribe("x", h1);
        let _s2 = table.subscribe("x", h2);
        assert!(table.dispatch("x", &json!(null)));

        assert_eq!(h1_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h2_calls.load(Ordering::SeqCst), 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn unsubscribe_removes_handler() {
        let table = Arc::new(SubscriptionTable::new());
        let (calls, h) = counter();

        let sub = table.subscribe("x", h);
        assert!(sub.unsubscribe());
        assert!(!table.dispatch("x", &json!({})));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stale_unsubscribe_keeps_newer_handler() {
        let table = Arc::new(SubscriptionTable::new());
        let (_old_calls, old) = counter();
        let (new_calls, new) = counter();

        let stale = table.subscribe("x", old);
        let _current = table.subscribe("x", new);

        assert!(!stale.unsubscribe());
        assert!(table.dispatch("x", &json!(1)));
        assert_eq!(new_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_without_handler_is_noop() {
        let table = Arc::new(SubscriptionTable::new());
        assert!(!table.dispatch("unknown", &json!({"a": 1})));
        assert!(table.is_empty());
    }

    #[test]
    fn handler_receives_payload() {
        let table = Arc::new(SubscriptionTable::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = table.subscribe("metrics_updated", move |data| {
            s.lock().unwrap().push(data.clone());
        });

        table.dispatch("metrics_updated", &json!({"accuracy": 0.95}));
        assert_eq!(*seen.lock().unwrap(), vec![json!({"accuracy": 0.95})]);
    }

    #[test]
    fn handler_may_resubscribe_reentrantly() {
        let table = Arc::new(SubscriptionTable::new());
        let t = table.clone();
        let _sub = table.subscribe("once", move |_| {
            // Replaces itself from inside dispatch.
            let _ = t.subscribe("once", |_| {});
        });

        assert!(table.dispatch("once", &json!(null)));
        assert!(table.contains("once"));
    }
}
