//! Live event fan-out to a user's WebSocket connections.
//!
//! The service emits an [`Event`] after each committed mutation. The
//! [`ConnectionHub`] keeps, per user, the set of open sockets as bounded
//! channels. Pushing never waits on a client: a socket whose queue is full is
//! dropped from the hub, which closes it.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Names of the events pushed to clients.
pub mod actions {
    pub const TASK_CREATED: &str = "task_created";
    pub const TASK_UPDATED: &str = "task_updated";
    pub const TASK_COMPLETED: &str = "task_completed";
    pub const TASK_UNCOMPLETED: &str = "task_uncompleted";
    pub const TASK_SKIPPED: &str = "task_skipped";
    pub const TASK_DELETED: &str = "task_deleted";
    pub const APP_TOKEN_CREATED: &str = "app_token_created";
    pub const APP_TOKEN_DELETED: &str = "app_token_deleted";
}

/// A broadcast frame: same envelope as a WebSocket response, without `requestId`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub action: &'static str,
    pub status: u16,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(action: &'static str, data: impl Serialize) -> Self {
        Self {
            action,
            status: 200,
            data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
        }
    }
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Sink for post-commit events.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Deliver `event` to every live connection of `user_id`. Returns how many received it.
    async fn broadcast(&self, user_id: i64, event: Event) -> Result<usize, BroadcastError>;
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBroadcaster;

#[async_trait]
impl Broadcaster for NoopBroadcaster {
    async fn broadcast(&self, _user_id: i64, _event: Event) -> Result<usize, BroadcastError> {
        Ok(0)
    }
}

/// Keeps every event it is given, for assertions.
#[derive(Debug, Default)]
pub struct RecordingBroadcaster {
    events: Mutex<Vec<(i64, Event)>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(i64, Event)> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn actions(&self) -> Vec<&'static str> {
        self.events().into_iter().map(|(_, e)| e.action).collect()
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn broadcast(&self, user_id: i64, event: Event) -> Result<usize, BroadcastError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((user_id, event));
        Ok(1)
    }
}

/// Identifier of one registered socket.
pub type ConnectionId = u64;

/// Frames buffered per socket before the hub gives up on it.
pub const CONNECTION_QUEUE: usize = 64;

type Senders = HashMap<i64, HashMap<ConnectionId, mpsc::Sender<String>>>;

/// Per-user registry of open WebSocket connections.
#[derive(Debug, Default)]
pub struct ConnectionHub {
    next_id: AtomicU64,
    connections: Mutex<Senders>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a socket for `user_id`. Frames pushed to it arrive on the returned
    /// receiver, which ends once the hub drops the socket.
    pub fn register(&self, user_id: i64) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CONNECTION_QUEUE);
        self.lock().entry(user_id).or_default().insert(id, tx);
        debug!(user_id, connection_id = id, "WebSocket registered");
        (id, rx)
    }

    /// Remove a socket. Returns `true` if it was registered.
    pub fn unregister(&self, user_id: i64, id: ConnectionId) -> bool {
        let mut map = self.lock();
        let Some(conns) = map.get_mut(&user_id) else {
            return false;
        };
        let removed = conns.remove(&id).is_some();
        if conns.is_empty() {
            map.remove(&user_id);
        }
        removed
    }

    pub fn connection_count(&self, user_id: i64) -> usize {
        self.lock().get(&user_id).map_or(0, HashMap::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Senders> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Broadcaster for ConnectionHub {
    async fn broadcast(&self, user_id: i64, event: Event) -> Result<usize, BroadcastError> {
        let frame = serde_json::to_string(&event)?;
        let mut map = self.lock();
        let Some(conns) = map.get_mut(&user_id) else {
            return Ok(0);
        };
        conns.retain(|&id, tx| match tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    user_id,
                    connection_id = id,
                    "WebSocket queue full, dropping connection"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        let delivered = conns.len();
        if conns.is_empty() {
            map.remove(&user_id);
        }
        Ok(delivered)
    }
}
