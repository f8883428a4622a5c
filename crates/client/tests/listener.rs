//! Cache-event fan-out semantics: per-key, per-filter, dedup, and
//! deactivation-only truncate delivery (§4.5).

use std::sync::{Arc, Mutex};

use client::{CacheEventListener, ListenerRegistry};
use pof::PofValue;
use protocol::cache::{CacheEventFlags, CacheEventKind, CacheEventMessage, TransformState};

struct Recorder(Mutex<Vec<PofValue>>);

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(Vec::new())))
    }

    fn seen(&self) -> Vec<PofValue> {
        self.0.lock().unwrap().clone()
    }
}

impl CacheEventListener for Recorder {
    fn on_event(&self, event: &CacheEventMessage) {
        self.0.lock().unwrap().push(event.key.clone());
    }
}

fn event(key: PofValue, filter_ids: Vec<i64>) -> CacheEventMessage {
    CacheEventMessage {
        kind: CacheEventKind::Inserted,
        flags: CacheEventFlags::default(),
        transform_state: TransformState::default(),
        key,
        old_value: None,
        new_value: Some(PofValue::Int32(1)),
        filter_ids,
    }
}

#[test]
fn key_listener_fires_only_for_its_own_key() {
    let registry = ListenerRegistry::new();
    let recorder = Recorder::new();
    let listener: Arc<dyn CacheEventListener> = recorder.clone();
    registry.add_key_listener(PofValue::Int32(1), listener);

    registry.dispatch(&event(PofValue::Int32(1), vec![]));
    registry.dispatch(&event(PofValue::Int32(2), vec![]));

    assert_eq!(recorder.seen(), vec![PofValue::Int32(1)]);
}

#[test]
fn filter_listener_fires_for_any_of_its_matching_ids() {
    let registry = ListenerRegistry::new();
    let recorder = Recorder::new();
    let listener: Arc<dyn CacheEventListener> = recorder.clone();
    registry.add_filter_listener(7, listener);

    registry.dispatch(&event(PofValue::Int32(9), vec![7, 8]));

    assert_eq!(recorder.seen().len(), 1);
}

#[test]
fn a_listener_registered_under_both_key_and_filter_fires_once() {
    let registry = ListenerRegistry::new();
    let recorder = Recorder::new();
    let listener: Arc<dyn CacheEventListener> = recorder.clone();
    registry.add_key_listener(PofValue::Int32(1), listener.clone());
    registry.add_filter_listener(7, listener);

    registry.dispatch(&event(PofValue::Int32(1), vec![7]));

    assert_eq!(recorder.seen().len(), 1);
}

#[test]
fn truncate_events_reach_only_deactivation_listeners() {
    let registry = ListenerRegistry::new();
    let key_recorder = Recorder::new();
    let deactivation_recorder = Recorder::new();
    registry.add_key_listener(PofValue::Int32(1), key_recorder.clone());
    registry.add_deactivation_listener(deactivation_recorder.clone());

    let mut truncated = event(PofValue::Int32(1), vec![]);
    truncated.flags = CacheEventFlags::default().with(CacheEventFlags::TRUNCATE);
    registry.dispatch(&truncated);

    assert!(key_recorder.seen().is_empty());
    assert_eq!(deactivation_recorder.seen().len(), 1);
}

#[test]
fn removing_a_key_listener_stops_further_delivery() {
    let registry = ListenerRegistry::new();
    let recorder = Recorder::new();
    let listener: Arc<dyn CacheEventListener> = recorder.clone();
    registry.add_key_listener(PofValue::Int32(1), listener.clone());
    registry.remove_key_listener(&PofValue::Int32(1), &listener);

    registry.dispatch(&event(PofValue::Int32(1), vec![]));

    assert!(recorder.seen().is_empty());
}
