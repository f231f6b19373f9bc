use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use feira_types::events::ServerEvent;

/// What happened to a single push onto a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Typing/presence signal dropped to keep room for durable events.
    DroppedEphemeral,
    /// Queue full; the event is lost for this connection.
    DroppedFull,
    /// The connection's writer is gone.
    Closed,
}

/// Sending half of one live connection's bounded outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: Uuid,
    user_id: String,
    tx: mpsc::Sender<ServerEvent>,
    ephemeral_headroom: usize,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer task drains.
    pub fn channel(
        user_id: &str,
        capacity: usize,
        ephemeral_headroom: usize,
    ) -> (Self, mpsc::Receiver<ServerEvent>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let handle = Self {
            conn_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            tx,
            ephemeral_headroom: ephemeral_headroom.min(capacity - 1),
        };
        (handle, rx)
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Enqueue without waiting. Never blocks the caller.
    pub fn push(&self, event: ServerEvent) -> PushOutcome {
        if self.tx.is_closed() {
            return PushOutcome::Closed;
        }
        if event.is_ephemeral() && self.tx.capacity() <= self.ephemeral_headroom {
            return PushOutcome::DroppedEphemeral;
        }
        match self.tx.try_send(event) {
            Ok(()) => PushOutcome::Queued,
            Err(TrySendError::Full(_)) => PushOutcome::DroppedFull,
            Err(TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }
}

/// Tracks which users are connected and through which connections.
/// A user is present iff they have at least one handle; empty sets are
/// never kept.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    /// user_id -> (conn_id -> handle)
    users: Arc<RwLock<HashMap<String, HashMap<Uuid, ConnectionHandle>>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. Returns true if the user was offline before.
    /// Registering the same handle twice is a no-op.
    pub async fn register(&self, handle: ConnectionHandle) -> bool {
        let mut users = self.users.write().await;
        let came_online = !users.contains_key(handle.user_id());
        users
            .entry(handle.user_id().to_string())
            .or_default()
            .insert(handle.conn_id(), handle);
        came_online
    }

    /// Remove a connection. Returns true exactly when this removed the
    /// user's last connection; redundant calls return false.
    pub async fn deregister(&self, user_id: &str, conn_id: Uuid) -> bool {
        let mut users = self.users.write().await;
        let Some(conns) = users.get_mut(user_id) else {
            return false;
        };
        if conns.remove(&conn_id).is_none() {
            return false;
        }
        if conns.is_empty() {
            users.remove(user_id);
            return true;
        }
        false
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.users.read().await.contains_key(user_id)
    }

    pub async fn connections_for(&self, user_id: &str) -> Vec<ConnectionHandle> {
        self.users
            .read()
            .await
            .get(user_id)
            .map(|conns| conns.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn connection_count(&self, user_id: &str) -> usize {
        self.users.read().await.get(user_id).map_or(0, |c| c.len())
    }

    /// Sorted snapshot of everyone online.
    pub async fn all_online_user_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.users.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Fan an event out to every connection of a user. Returns how many
    /// connections accepted it; zero for offline users.
    pub async fn send_to_user(&self, user_id: &str, event: ServerEvent) -> usize {
        let users = self.users.read().await;
        let Some(conns) = users.get(user_id) else {
            return 0;
        };

        let mut queued = 0;
        for handle in conns.values() {
            match handle.push(event.clone()) {
                PushOutcome::Queued => queued += 1,
                PushOutcome::DroppedEphemeral => {
                    debug!(
                        "{} to {} ({}) dropped, outbound queue near full",
                        event.kind(),
                        user_id,
                        handle.conn_id()
                    );
                }
                PushOutcome::DroppedFull => {
                    warn!(
                        "{} to {} ({}) dropped, outbound queue full",
                        event.kind(),
                        user_id,
                        handle.conn_id()
                    );
                }
                PushOutcome::Closed => {
                    debug!(
                        "{} to {} ({}) skipped, connection closing",
                        event.kind(),
                        user_id,
                        handle.conn_id()
                    );
                }
            }
        }
        queued
    }
}
