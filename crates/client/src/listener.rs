//! Cache-event fan-out: per-key and per-filter listener registries, and the
//! `Receiver` that feeds a channel's decoded [`CacheEventMessage`]s into
//! them (§4.5 "Events").

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use pof::PofValue;
use protocol::cache::CacheEventMessage;

use crate::channel::{Channel, Receiver};

/// Receives cache events this process has subscribed to. Implementors are
/// expected to be cheap and non-blocking — events run synchronously on the
/// channel's receive task (§5).
pub trait CacheEventListener: Send + Sync {
    fn on_event(&self, event: &CacheEventMessage);
}

fn listener_key(listener: &Arc<dyn CacheEventListener>) -> usize {
    Arc::as_ptr(listener) as *const () as usize
}

/// Fans a channel's cache events out to whichever listeners subscribed to
/// the event's key or one of its filter ids. A listener registered under
/// both fires once (§4.5 "a listener registered more than once for an
/// event still observes it exactly once").
///
/// `PofValue` has no total order or hash (floats), so key listeners are
/// kept in a linear-scan table rather than a map; filter ids are plain
/// `i64`s and use a real `HashMap`.
#[derive(Default)]
pub struct ListenerRegistry {
    key_listeners: Mutex<Vec<(PofValue, Vec<Arc<dyn CacheEventListener>>)>>,
    filter_listeners: Mutex<HashMap<i64, Vec<Arc<dyn CacheEventListener>>>>,
    /// Notified on cache truncation and other whole-cache lifecycle events,
    /// never on ordinary per-entry events (§4.5).
    deactivation_listeners: Mutex<Vec<Arc<dyn CacheEventListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key_listener(&self, key: PofValue, listener: Arc<dyn CacheEventListener>) {
        let mut table = self.key_listeners.lock();
        match table.iter_mut().find(|(k, _)| *k == key) {
            Some((_, listeners)) => listeners.push(listener),
            None => table.push((key, vec![listener])),
        }
    }

    pub fn remove_key_listener(&self, key: &PofValue, listener: &Arc<dyn CacheEventListener>) {
        let mut table = self.key_listeners.lock();
        if let Some(index) = table.iter().position(|(k, _)| k == key) {
            let listeners = &mut table[index].1;
            listeners.retain(|l| !Arc::ptr_eq(l, listener));
            if listeners.is_empty() {
                table.remove(index);
            }
        }
    }

    pub fn add_filter_listener(&self, filter_id: i64, listener: Arc<dyn CacheEventListener>) {
        self.filter_listeners.lock().entry(filter_id).or_default().push(listener);
    }

    pub fn remove_filter_listener(&self, filter_id: i64, listener: &Arc<dyn CacheEventListener>) {
        let mut table = self.filter_listeners.lock();
        if let Some(listeners) = table.get_mut(&filter_id) {
            listeners.retain(|l| !Arc::ptr_eq(l, listener));
            if listeners.is_empty() {
                table.remove(&filter_id);
            }
        }
    }

    pub fn add_deactivation_listener(&self, listener: Arc<dyn CacheEventListener>) {
        self.deactivation_listeners.lock().push(listener);
    }

    pub fn remove_deactivation_listener(&self, listener: &Arc<dyn CacheEventListener>) {
        self.deactivation_listeners.lock().retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn dispatch(&self, event: &CacheEventMessage) {
        if event.flags.contains(protocol::cache::CacheEventFlags::TRUNCATE) {
            for listener in self.deactivation_listeners.lock().iter() {
                listener.on_event(event);
            }
            return;
        }

        let mut seen = std::collections::HashSet::new();
        let mut fire = Vec::new();

        if let Some((_, listeners)) = self
            .key_listeners
            .lock()
            .iter()
            .find(|(k, _)| *k == event.key)
        {
            for listener in listeners {
                if seen.insert(listener_key(listener)) {
                    fire.push(Arc::clone(listener));
                }
            }
        }

        if !event.filter_ids.is_empty() {
            let table = self.filter_listeners.lock();
            for filter_id in &event.filter_ids {
                if let Some(listeners) = table.get(filter_id) {
                    for listener in listeners {
                        if seen.insert(listener_key(listener)) {
                            fire.push(Arc::clone(listener));
                        }
                    }
                }
            }
        }

        for listener in fire {
            listener.on_event(event);
        }
    }
}

impl Receiver for ListenerRegistry {
    fn receive(&self, _channel: &Channel, message: Box<dyn protocol::Message>) {
        if let Some(event) = message.as_any().downcast_ref::<CacheEventMessage>() {
            self.dispatch(event);
        }
    }
}
