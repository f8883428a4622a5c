//! Connection lifecycle on demand: lazily connects, reconnects after a
//! failure, and publishes lifecycle events to anyone listening (§4.4).
//!
//! Mirrors the broadcast-based UI event pattern used elsewhere for service
//! lifecycle notifications, adapted to this crate's connection states
//! rather than a serialized wire event.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::ClientResult;

const EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub enum InitiatorEvent {
    Opened,
    Closed,
    Error(String),
}

/// Owns at most one live [`Connection`] at a time — no connection pool,
/// since a single named-cache client only ever talks to one remote member.
pub struct Initiator {
    config: ClientConfig,
    connection: Mutex<Option<Arc<Connection>>>,
    events: broadcast::Sender<InitiatorEvent>,
}

impl Initiator {
    pub fn new(config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            connection: Mutex::new(None),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InitiatorEvent> {
        self.events.subscribe()
    }

    /// Returns the current connection, establishing one first if there is
    /// none yet or the existing one has since failed.
    pub async fn ensure_connection(&self) -> ClientResult<Arc<Connection>> {
        let mut guard = self.connection.lock().await;
        if let Some(connection) = guard.as_ref() {
            if !connection.is_closed() {
                return Ok(Arc::clone(connection));
            }
        }

        match Connection::connect(self.config.clone()).await {
            Ok(connection) => {
                *guard = Some(Arc::clone(&connection));
                let _ = self.events.send(InitiatorEvent::Opened);
                spawn_fault_watcher(&connection, self.events.clone());
                Ok(connection)
            }
            Err(err) => {
                *guard = None;
                let _ = self.events.send(InitiatorEvent::Error(err.to_string()));
                Err(err)
            }
        }
    }

    pub async fn close(&self) {
        let mut guard = self.connection.lock().await;
        if let Some(connection) = guard.take() {
            connection.close();
            let _ = self.events.send(InitiatorEvent::Closed);
        }
    }
}

/// Watches a connection's fault signal and republishes it as exactly one
/// [`InitiatorEvent::Error`] — unless the connection is torn down
/// deliberately first, in which case its background tasks are aborted, the
/// fault sender is dropped, and this watcher exits silently.
fn spawn_fault_watcher(connection: &Arc<Connection>, events: broadcast::Sender<InitiatorEvent>) {
    let mut fault = connection.fault();
    tokio::spawn(async move {
        if fault.changed().await.is_ok() {
            if let Some(reason) = fault.borrow().clone() {
                let _ = events.send(InitiatorEvent::Error(reason));
            }
        }
    });
}
