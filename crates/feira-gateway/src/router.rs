use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use feira_db::{Database, ReadOutcome};
use feira_types::api::{FieldError, SendMessageDto};
use feira_types::events::ServerEvent;
use feira_types::models::Message;

use crate::error::GatewayError;
use crate::locks::ShardedLocks;
use crate::presence::PresenceRegistry;
use crate::run_blocking;

const PAIR_LOCK_SHARDS: usize = 64;

/// Outcome of a successful read receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadReceipt {
    /// This call marked the message read and notified the sender.
    Transitioned,
    /// Already read; no notification sent.
    AlreadyRead,
}

/// Persists messages and fans them out to live connections.
#[derive(Clone)]
pub struct MessageRouter {
    db: Arc<Database>,
    presence: PresenceRegistry,
    pair_locks: Arc<ShardedLocks>,
}

impl MessageRouter {
    pub fn new(db: Arc<Database>, presence: PresenceRegistry) -> Self {
        Self {
            db,
            presence,
            pair_locks: Arc::new(ShardedLocks::new(PAIR_LOCK_SHARDS)),
        }
    }

    /// Validate, store, then push `messageReceived` to the receiver's
    /// connections and `messageSent` to all of the sender's.
    pub async fn send(
        &self,
        sender_id: &str,
        dto: SendMessageDto,
    ) -> Result<Message, GatewayError> {
        let outgoing = dto.validate().map_err(GatewayError::InvalidMessage)?;
        if outgoing.receiver_id == sender_id {
            return Err(GatewayError::InvalidMessage(vec![FieldError::new(
                "receiverId",
                "must differ from the sender",
            )]));
        }

        // Held across insert and enqueue: a pair's messages reach each
        // connection queue in commit order.
        let _pair = self.pair_locks.lock_pair(sender_id, &outgoing.receiver_id).await;

        let sender = sender_id.to_string();
        let message =
            run_blocking(&self.db, move |db| db.insert_message(&sender, &outgoing)).await?;

        let delivered = self
            .presence
            .send_to_user(&message.receiver_id, ServerEvent::MessageReceived(message.clone()))
            .await;
        if delivered == 0 {
            debug!(
                "{} -> {} message {} stored, receiver has no live connection",
                message.sender_id, message.receiver_id, message.id
            );
        } else {
            debug!(
                "{} -> {} message {} pushed to {} connection(s)",
                message.sender_id, message.receiver_id, message.id, delivered
            );
        }

        self.presence
            .send_to_user(sender_id, ServerEvent::MessageSent(message.clone()))
            .await;

        Ok(message)
    }

    /// Mark a received message read. Only the call that flips the flag
    /// notifies; repeats succeed silently.
    pub async fn mark_read(
        &self,
        reader_id: &str,
        message_id: Uuid,
    ) -> Result<ReadReceipt, GatewayError> {
        let reader = reader_id.to_string();
        let outcome =
            run_blocking(&self.db, move |db| db.mark_read_by_receiver(message_id, &reader)).await?;

        match outcome {
            ReadOutcome::NotFound => Err(GatewayError::NotFound),
            ReadOutcome::AlreadyRead => Ok(ReadReceipt::AlreadyRead),
            ReadOutcome::Transitioned(message) => {
                info!("{} read message {} from {}", reader_id, message_id, message.sender_id);
                let event = ServerEvent::MessageReadNotification {
                    message_id,
                    reader_id: reader_id.to_string(),
                };
                self.presence.send_to_user(&message.sender_id, event.clone()).await;
                // Reader's other devices clear their badge too
                self.presence.send_to_user(reader_id, event).await;
                Ok(ReadReceipt::Transitioned)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::ConnectionHandle;
    use feira_types::api::LocationDto;
    use tokio::sync::mpsc;

    fn router() -> (MessageRouter, PresenceRegistry, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let presence = PresenceRegistry::new();
        (MessageRouter::new(db.clone(), presence.clone()), presence, db)
    }

    async fn connect(presence: &PresenceRegistry, user: &str) -> mpsc::Receiver<ServerEvent> {
        let (handle, rx) = ConnectionHandle::channel(user, 32, 4);
        presence.register(handle).await;
        rx
    }

    fn text_to(receiver: &str, content: &str) -> SendMessageDto {
        SendMessageDto {
            receiver_id: Some(receiver.into()),
            content: Some(content.into()),
            ..Default::default()
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn send_persists_exactly_one_unread_message() {
        let (router, _presence, db) = router();
        let msg = router.send("alice", text_to("bob", "Olá")).await.unwrap();

        assert!(!msg.read);
        assert_eq!(db.get_message_by_id(msg.id).unwrap().unwrap(), msg);
        assert_eq!(db.get_messages_between("alice", "bob", 10, None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn live_receiver_gets_one_event_and_sender_devices_get_ack() {
        let (router, presence, _db) = router();
        let mut bob = connect(&presence, "bob").await;
        let mut alice_phone = connect(&presence, "alice").await;
        let mut alice_laptop = connect(&presence, "alice").await;

        let msg = router.send("alice", text_to("bob", "oi")).await.unwrap();

        assert_eq!(drain(&mut bob), vec![ServerEvent::MessageReceived(msg.clone())]);
        assert_eq!(drain(&mut alice_phone), vec![ServerEvent::MessageSent(msg.clone())]);
        assert_eq!(drain(&mut alice_laptop), vec![ServerEvent::MessageSent(msg)]);
    }

    #[tokio::test]
    async fn offline_receiver_is_not_an_error() {
        let (router, presence, db) = router();
        let mut alice = connect(&presence, "alice").await;

        let msg = router.send("alice", text_to("bob", "Olá")).await.unwrap();

        assert_eq!(drain(&mut alice), vec![ServerEvent::MessageSent(msg.clone())]);
        let convs = db.list_conversations_for("bob").unwrap();
        assert_eq!(convs.len(), 1);
        assert_eq!(convs[0].unread_count, 1);
        assert_eq!(convs[0].last_message.content.as_deref(), Some("Olá"));
    }

    #[tokio::test]
    async fn invalid_payloads_are_rejected_before_storage() {
        let (router, _presence, db) = router();

        let err = router.send("alice", text_to("alice", "me")).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidMessage(ref f) if f[0].field == "receiverId"));

        let err = router.send("alice", text_to("bob", "")).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_MESSAGE");

        let bad_location = SendMessageDto {
            receiver_id: Some("bob".into()),
            location: Some(LocationDto {
                lat: None,
                lng: Some(10.0),
                address: None,
            }),
            ..Default::default()
        };
        assert!(router.send("alice", bad_location).await.is_err());

        assert!(db.list_conversations_for("alice").unwrap().is_empty());
    }

    #[tokio::test]
    async fn pair_messages_arrive_in_commit_order() {
        let (router, presence, _db) = router();
        let mut bob = connect(&presence, "bob").await;

        let first = router.send("alice", text_to("bob", "primeira")).await.unwrap();
        let second = router.send("alice", text_to("bob", "segunda")).await.unwrap();

        assert_eq!(
            drain(&mut bob),
            vec![
                ServerEvent::MessageReceived(first),
                ServerEvent::MessageReceived(second)
            ]
        );
    }

    #[tokio::test]
    async fn concurrent_sends_keep_queue_order_equal_to_store_order() {
        let (router, presence, db) = router();
        let mut bob = connect(&presence, "bob").await;

        let mut tasks = Vec::new();
        for i in 0..20 {
            let router = router.clone();
            tasks.push(tokio::spawn(async move {
                router.send("alice", text_to("bob", &i.to_string())).await.unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let pushed: Vec<Uuid> = drain(&mut bob)
            .into_iter()
            .map(|e| match e {
                ServerEvent::MessageReceived(m) => m.id,
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        let mut stored: Vec<Uuid> = db
            .get_messages_between("bob", "alice", 100, None)
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        stored.reverse();

        assert_eq!(pushed, stored);
    }

    #[tokio::test]
    async fn mark_read_notifies_sender_once() {
        let (router, presence, db) = router();
        let mut alice = connect(&presence, "alice").await;
        let msg = router.send("alice", text_to("bob", "oi")).await.unwrap();
        drain(&mut alice);

        assert_eq!(router.mark_read("bob", msg.id).await.unwrap(), ReadReceipt::Transitioned);
        assert_eq!(db.count_unread("bob", "alice").unwrap(), 0);
        assert_eq!(router.mark_read("bob", msg.id).await.unwrap(), ReadReceipt::AlreadyRead);

        assert_eq!(
            drain(&mut alice),
            vec![ServerEvent::MessageReadNotification {
                message_id: msg.id,
                reader_id: "bob".into()
            }]
        );
    }

    #[tokio::test]
    async fn concurrent_mark_read_fires_one_notification() {
        let (router, presence, _db) = router();
        let mut alice = connect(&presence, "alice").await;
        let msg = router.send("alice", text_to("bob", "oi")).await.unwrap();
        drain(&mut alice);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let router = router.clone();
                tokio::spawn(async move { router.mark_read("bob", msg.id).await })
            })
            .collect();

        let mut transitions = 0;
        for task in tasks {
            if task.await.unwrap().unwrap() == ReadReceipt::Transitioned {
                transitions += 1;
            }
        }

        assert_eq!(transitions, 1);
        assert_eq!(drain(&mut alice).len(), 1);
    }

    #[tokio::test]
    async fn reader_devices_are_synced_on_read() {
        let (router, presence, _db) = router();
        let msg = router.send("alice", text_to("bob", "oi")).await.unwrap();
        let mut bob_tablet = connect(&presence, "bob").await;

        router.mark_read("bob", msg.id).await.unwrap();

        assert_eq!(
            drain(&mut bob_tablet),
            vec![ServerEvent::MessageReadNotification {
                message_id: msg.id,
                reader_id: "bob".into()
            }]
        );
    }

    #[tokio::test]
    async fn only_the_receiver_can_mark_read() {
        let (router, _presence, _db) = router();
        let msg = router.send("alice", text_to("bob", "oi")).await.unwrap();

        assert!(matches!(router.mark_read("alice", msg.id).await, Err(GatewayError::NotFound)));
        assert!(matches!(router.mark_read("carol", msg.id).await, Err(GatewayError::NotFound)));
        assert!(matches!(
            router.mark_read("bob", Uuid::now_v7()).await,
            Err(GatewayError::NotFound)
        ));
    }
}
