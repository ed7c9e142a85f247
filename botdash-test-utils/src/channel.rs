use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use botdash_transport::{
    EventChannel, EventHandler, SubscriptionId, TransportError, TransportResult,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

/// Synchronous [`EventChannel`] double: events are delivered by the test itself.
#[derive(Default)]
pub struct InMemoryChannel {
    handlers: RwLock<BTreeMap<String, Vec<(SubscriptionId, EventHandler)>>>,
    next_id: AtomicU64,
    connected: AtomicBool,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    emitted: Mutex<Vec<(String, Value)>>,
    reject_emits: AtomicBool,
}

impl InMemoryChannel {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Run every handler subscribed to `topic` with `payload`, in registration order.
    pub fn deliver(&self, topic: &str, payload: Value) -> usize {
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .get(topic)
            .map(|entries| entries.iter().map(|(_, handler)| handler.clone()).collect())
            .unwrap_or_default();
        for handler in &handlers {
            handler(&payload);
        }
        handlers.len()
    }

    /// Flip the transport flag without dispatching lifecycle events.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    #[must_use]
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn emitted(&self) -> Vec<(String, Value)> {
        self.emitted.lock().clone()
    }

    /// Make [`EventChannel::emit`] fail as if the channel were closed.
    pub fn reject_emits(&self, reject: bool) {
        self.reject_emits.store(reject, Ordering::SeqCst);
    }

    /// Topics with at least one listener.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }
}

impl EventChannel for InMemoryChannel {
    fn subscribe(&self, topic: &str, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.handlers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let mut removed = false;
        handlers.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|(entry, _)| *entry != id);
            removed |= before != entries.len();
            !entries.is_empty()
        });
        removed
    }

    fn unsubscribe_topic(&self, topic: &str) -> usize {
        self.handlers
            .write()
            .remove(topic)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    fn listener_count(&self, topic: &str) -> usize {
        self.handlers.read().get(topic).map(Vec::len).unwrap_or(0)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connect(&self) {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn emit(&self, topic: &str, payload: Value) -> TransportResult<()> {
        if self.reject_emits.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.emitted.lock().push((topic.to_string(), payload));
        Ok(())
    }
}
