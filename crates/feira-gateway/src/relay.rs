use std::sync::Arc;

use tracing::{debug, error};
use uuid::Uuid;

use feira_db::Database;
use feira_types::api::FieldError;
use feira_types::events::ServerEvent;

use crate::error::GatewayError;
use crate::locks::ShardedLocks;
use crate::presence::{ConnectionHandle, PresenceRegistry};
use crate::run_blocking;

const PRESENCE_LOCK_SHARDS: usize = 64;

/// Ephemeral signals: typing indicators and presence changes. Nothing here
/// is stored, and offline targets are skipped.
#[derive(Clone)]
pub struct SignalRelay {
    db: Arc<Database>,
    presence: PresenceRegistry,
    /// Per-user: a presence transition and its announcement happen under
    /// one guard, so counterparts see announcements in transition order.
    user_locks: Arc<ShardedLocks>,
}

impl SignalRelay {
    pub fn new(db: Arc<Database>, presence: PresenceRegistry) -> Self {
        Self {
            db,
            presence,
            user_locks: Arc::new(ShardedLocks::new(PRESENCE_LOCK_SHARDS)),
        }
    }

    /// Register a connection and, if the user just came online, tell their
    /// counterparts. Returns true on the offline to online transition.
    pub async fn join(&self, handle: ConnectionHandle) -> bool {
        let user_id = handle.user_id().to_string();
        let _user = self.user_locks.lock(user_id.as_str()).await;

        let came_online = self.presence.register(handle).await;
        if came_online {
            if let Err(e) = self.announce_online(&user_id).await {
                error!("Failed to announce {} online: {}", user_id, e);
            }
        }
        came_online
    }

    /// Deregister a connection and, if it was the user's last one, tell
    /// their counterparts. Returns true on the online to offline transition.
    pub async fn leave(&self, user_id: &str, conn_id: Uuid) -> bool {
        let _user = self.user_locks.lock(user_id).await;

        let went_offline = self.presence.deregister(user_id, conn_id).await;
        if went_offline {
            if let Err(e) = self.announce_offline(user_id).await {
                error!("Failed to announce {} offline: {}", user_id, e);
            }
        }
        went_offline
    }

    pub async fn typing(
        &self,
        sender_id: &str,
        receiver_id: &str,
        is_typing: bool,
    ) -> Result<(), GatewayError> {
        if receiver_id.trim().is_empty() {
            return Err(GatewayError::InvalidMessage(vec![FieldError::new(
                "receiverId",
                "is required",
            )]));
        }

        let event = if is_typing {
            ServerEvent::UserTyping {
                sender_id: sender_id.to_string(),
            }
        } else {
            ServerEvent::UserStoppedTyping {
                sender_id: sender_id.to_string(),
            }
        };
        self.presence.send_to_user(receiver_id, event).await;
        Ok(())
    }

    /// Tell online counterparts that `user_id` came online.
    /// Returns the number of connections notified.
    async fn announce_online(&self, user_id: &str) -> Result<usize, GatewayError> {
        self.announce(
            user_id,
            ServerEvent::UserOnline {
                user_id: user_id.to_string(),
            },
        )
        .await
    }

    async fn announce_offline(&self, user_id: &str) -> Result<usize, GatewayError> {
        self.announce(
            user_id,
            ServerEvent::UserOffline {
                user_id: user_id.to_string(),
            },
        )
        .await
    }

    pub async fn online_users(&self) -> Vec<String> {
        self.presence.all_online_user_ids().await
    }

    /// Only users sharing conversation history hear about presence changes.
    async fn announce(&self, user_id: &str, event: ServerEvent) -> Result<usize, GatewayError> {
        let uid = user_id.to_string();
        let counterparts = run_blocking(&self.db, move |db| db.list_counterparts(&uid)).await?;

        let mut notified = 0;
        for counterpart in &counterparts {
            notified += self.presence.send_to_user(counterpart, event.clone()).await;
        }
        debug!(
            "{} for {} reached {} connection(s) across {} counterpart(s)",
            event.kind(),
            user_id,
            notified,
            counterparts.len()
        );
        Ok(notified)
    }
}
