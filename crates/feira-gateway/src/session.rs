use tokio::sync::mpsc;
use tracing::{error, info, warn};

use feira_types::events::{ClientCommand, ServerEvent};

use crate::Gateway;
use crate::error::GatewayError;
use crate::presence::ConnectionHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport open, identity not verified yet.
    Connecting,
    /// Identity verified and registered; writer not running yet.
    Authenticated,
    /// Processing commands.
    Active,
    Closed,
}

/// Server-side state of one client connection, independent of the
/// transport. The WebSocket driver in `connection` feeds it.
pub struct Session {
    gateway: Gateway,
    state: SessionState,
    user_id: Option<String>,
    handle: Option<ConnectionHandle>,
}

impl Session {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            state: SessionState::Connecting,
            user_id: None,
            handle: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Bind a verified identity: create the outbound queue, register with
    /// presence and, on the user's first connection, announce them online.
    /// Returns the queue receiver for the writer task.
    pub async fn authenticate(
        &mut self,
        user_id: String,
    ) -> Result<mpsc::Receiver<ServerEvent>, GatewayError> {
        if self.state != SessionState::Connecting {
            return Err(GatewayError::InvalidState("session already identified"));
        }

        let config = self.gateway.config();
        let (handle, rx) = ConnectionHandle::channel(
            &user_id,
            config.outbound_capacity,
            config.ephemeral_headroom,
        );

        handle.push(ServerEvent::Ready {
            user_id: user_id.clone(),
        });

        let came_online = self.gateway.relay().join(handle.clone()).await;
        info!(
            "{} authenticated on connection {} (first: {})",
            user_id,
            handle.conn_id(),
            came_online
        );

        self.user_id = Some(user_id);
        self.handle = Some(handle);
        self.state = SessionState::Authenticated;

        Ok(rx)
    }

    /// Writer is draining the queue; start accepting commands.
    pub fn activate(&mut self) {
        if self.state == SessionState::Authenticated {
            self.state = SessionState::Active;
        }
    }

    pub async fn handle_command(&mut self, cmd: ClientCommand) -> Result<(), GatewayError> {
        if self.state != SessionState::Active {
            return Err(GatewayError::Unauthenticated);
        }
        let (Some(user_id), Some(handle)) = (self.user_id.as_deref(), self.handle.as_ref()) else {
            return Err(GatewayError::Unauthenticated);
        };

        match cmd {
            ClientCommand::Identify { .. } => {
                return Err(GatewayError::InvalidState("session already identified"));
            }

            ClientCommand::SendMessage(dto) => {
                self.gateway.router().send(user_id, dto).await?;
            }

            ClientCommand::Typing { receiver_id } => {
                self.gateway.relay().typing(user_id, &receiver_id, true).await?;
            }

            ClientCommand::StopTyping { receiver_id } => {
                self.gateway.relay().typing(user_id, &receiver_id, false).await?;
            }

            ClientCommand::MessageRead { message_id } => {
                self.gateway.router().mark_read(user_id, message_id).await?;
            }

            ClientCommand::GetOnlineUsers => {
                let user_ids = self.gateway.relay().online_users().await;
                handle.push(ServerEvent::OnlineUsersList { user_ids });
            }

            ClientCommand::Ping => {
                handle.push(ServerEvent::Pong);
            }
        }

        Ok(())
    }

    /// Report a failed command to this connection only.
    pub fn report(&self, err: &GatewayError) {
        match err {
            GatewayError::Store(e) => error!("Store failure for {:?}: {:#}", self.user_id, e),
            other => warn!("Rejected command from {:?}: {}", self.user_id, other),
        }
        if let Some(handle) = &self.handle {
            handle.push(err.to_event());
        }
    }

    /// Deregister and, if this was the user's last connection, announce
    /// them offline. Returns false if the session was already closed.
    pub async fn close(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.state = SessionState::Closed;

        let (Some(user_id), Some(handle)) = (self.user_id.as_deref(), self.handle.take()) else {
            return true;
        };

        self.gateway.relay().leave(user_id, handle.conn_id()).await;
        info!("{} closed connection {}", user_id, handle.conn_id());

        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;
    use crate::config::GatewayConfig;
    use feira_db::Database;
    use feira_types::api::SendMessageDto;

    fn gateway() -> Gateway {
        let db = Arc::new(Database::open_in_memory().unwrap());
        Gateway::new(db, "test-secret".into(), GatewayConfig::default())
    }

    async fn active(gateway: &Gateway, user: &str) -> (Session, mpsc::Receiver<ServerEvent>) {
        let mut session = Session::new(gateway.clone());
        let mut rx = session.authenticate(user.to_string()).await.unwrap();
        session.activate();
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerEvent::Ready {
                user_id: user.to_string()
            }
        );
        (session, rx)
    }

    fn is_presence(event: &ServerEvent) -> bool {
        matches!(
            event,
            ServerEvent::UserOnline { .. } | ServerEvent::UserOffline { .. }
        )
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn commands_before_identify_are_rejected() {
        let mut session = Session::new(gateway());
        assert_eq!(session.state(), SessionState::Connecting);

        let err = session.handle_command(ClientCommand::Ping).await.unwrap_err();
        assert_eq!(err.code(), "UNAUTHENTICATED");
    }

    #[tokio::test]
    async fn lifecycle_moves_through_states() {
        let gw = gateway();
        let mut session = Session::new(gw.clone());

        let _rx = session.authenticate("alice".into()).await.unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);
        assert!(gw.presence().is_online("alice").await);
        assert!(session.authenticate("alice".into()).await.is_err());

        session.activate();
        assert_eq!(session.state(), SessionState::Active);

        assert!(session.close().await);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!gw.presence().is_online("alice").await);
        assert!(!session.close().await);
    }

    #[tokio::test]
    async fn ping_and_online_users_reply_to_caller() {
        let gw = gateway();
        let (mut alice, mut alice_rx) = active(&gw, "alice").await;
        let (_bob, _bob_rx) = active(&gw, "bob").await;

        alice.handle_command(ClientCommand::Ping).await.unwrap();
        alice.handle_command(ClientCommand::GetOnlineUsers).await.unwrap();

        assert_eq!(
            drain(&mut alice_rx),
            vec![
                ServerEvent::Pong,
                ServerEvent::OnlineUsersList {
                    user_ids: vec!["alice".into(), "bob".into()]
                }
            ]
        );
    }

    #[tokio::test]
    async fn typing_then_disconnect_sends_single_offline() {
        let gw = gateway();
        let (mut alice, _alice_rx) = active(&gw, "alice").await;
        let (_bob, mut bob_rx) = active(&gw, "bob").await;

        // Presence only flows between users with history
        alice
            .handle_command(ClientCommand::SendMessage(SendMessageDto {
                receiver_id: Some("bob".into()),
                content: Some("oi".into()),
                ..Default::default()
            }))
            .await
            .unwrap();
        alice
            .handle_command(ClientCommand::Typing {
                receiver_id: "bob".into(),
            })
            .await
            .unwrap();

        let events = drain(&mut bob_rx);
        assert!(matches!(events[0], ServerEvent::MessageReceived(_)));
        assert_eq!(
            events[1],
            ServerEvent::UserTyping {
                sender_id: "alice".into()
            }
        );

        assert!(alice.close().await);
        assert!(!alice.close().await);
        assert!(!alice.close().await);

        assert_eq!(
            drain(&mut bob_rx),
            vec![ServerEvent::UserOffline {
                user_id: "alice".into()
            }]
        );
    }

    #[tokio::test]
    async fn second_device_does_not_rebroadcast_presence() {
        let gw = gateway();
        let (mut alice, _rx) = active(&gw, "alice").await;
        let (_bob, mut bob_rx) = active(&gw, "bob").await;
        alice
            .handle_command(ClientCommand::SendMessage(SendMessageDto {
                receiver_id: Some("bob".into()),
                content: Some("oi".into()),
                ..Default::default()
            }))
            .await
            .unwrap();
        drain(&mut bob_rx);

        let (mut alice_laptop, _rx2) = active(&gw, "alice").await;
        assert!(drain(&mut bob_rx).is_empty());

        alice_laptop.close().await;
        assert!(drain(&mut bob_rx).is_empty());

        alice.close().await;
        assert_eq!(
            drain(&mut bob_rx),
            vec![ServerEvent::UserOffline {
                user_id: "alice".into()
            }]
        );
    }

    #[tokio::test]
    async fn reconnect_announces_online_to_counterparts() {
        let gw = gateway();
        let (mut alice, _rx) = active(&gw, "alice").await;
        alice
            .handle_command(ClientCommand::SendMessage(SendMessageDto {
                receiver_id: Some("bob".into()),
                content: Some("Olá".into()),
                ..Default::default()
            }))
            .await
            .unwrap();
        alice.close().await;

        let (_bob, mut bob_rx) = active(&gw, "bob").await;
        assert!(drain(&mut bob_rx).is_empty());

        let (_alice2, _rx2) = active(&gw, "alice").await;
        assert_eq!(
            drain(&mut bob_rx),
            vec![ServerEvent::UserOnline {
                user_id: "alice".into()
            }]
        );
    }

    #[tokio::test]
    async fn errors_are_reported_to_originating_connection_only() {
        let gw = gateway();
        let (mut alice, mut alice_rx) = active(&gw, "alice").await;
        let (_bob, mut bob_rx) = active(&gw, "bob").await;

        let err = alice
            .handle_command(ClientCommand::MessageRead {
                message_id: Uuid::now_v7(),
            })
            .await
            .unwrap_err();
        alice.report(&err);

        match drain(&mut alice_rx).as_slice() {
            [ServerEvent::Error { code, .. }] => assert_eq!(code, "NOT_FOUND"),
            other => panic!("unexpected events {:?}", other),
        }
        assert!(drain(&mut bob_rx).is_empty());
        assert_eq!(alice.state(), SessionState::Active);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn device_handover_leaves_counterparts_seeing_online() {
        let gw = gateway();
        let (_bob, mut bob_rx) = active(&gw, "bob").await;
        let (mut alice, mut alice_rx) = active(&gw, "alice").await;
        alice
            .handle_command(ClientCommand::SendMessage(SendMessageDto {
                receiver_id: Some("bob".into()),
                content: Some("oi".into()),
                ..Default::default()
            }))
            .await
            .unwrap();
        drain(&mut bob_rx);

        for _ in 0..200 {
            let closing = tokio::spawn(async move {
                alice.close().await;
            });
            let opening = tokio::spawn({
                let gw = gw.clone();
                async move {
                    let mut session = Session::new(gw);
                    let rx = session.authenticate("alice".into()).await.unwrap();
                    session.activate();
                    (session, rx)
                }
            });
            closing.await.unwrap();
            (alice, alice_rx) = opening.await.unwrap();
            drain(&mut alice_rx);

            assert!(gw.presence().is_online("alice").await);
            let last_presence = drain(&mut bob_rx).into_iter().rev().find(is_presence);
            if let Some(event) = last_presence {
                assert_eq!(
                    event,
                    ServerEvent::UserOnline {
                        user_id: "alice".into()
                    }
                );
            }
        }
    }
}
