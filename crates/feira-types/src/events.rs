use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{FieldError, SendMessageDto};
use crate::models::Message;

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Send a direct message
    SendMessage(SendMessageDto),

    #[serde(rename_all = "camelCase")]
    Typing { receiver_id: String },

    #[serde(rename_all = "camelCase")]
    StopTyping { receiver_id: String },

    /// Read receipt for a message this user received
    #[serde(rename_all = "camelCase")]
    MessageRead { message_id: Uuid },

    GetOnlineUsers,

    Ping,
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Server confirms successful authentication
    #[serde(rename_all = "camelCase")]
    Ready { user_id: String },

    /// A message addressed to this user was stored
    MessageReceived(Message),

    /// Echo of a message this user sent, to every one of their devices
    MessageSent(Message),

    #[serde(rename_all = "camelCase")]
    MessageReadNotification { message_id: Uuid, reader_id: String },

    #[serde(rename_all = "camelCase")]
    UserTyping { sender_id: String },

    #[serde(rename_all = "camelCase")]
    UserStoppedTyping { sender_id: String },

    #[serde(rename_all = "camelCase")]
    UserOnline { user_id: String },

    #[serde(rename_all = "camelCase")]
    UserOffline { user_id: String },

    #[serde(rename_all = "camelCase")]
    OnlineUsersList { user_ids: Vec<String> },

    Pong,

    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        fields: Vec<FieldError>,
    },
}

impl ServerEvent {
    /// Typing and presence signals. These are superseded by the next signal
    /// and are the first to go when a connection's queue fills up.
    pub fn is_ephemeral(&self) -> bool {
        matches!(
            self,
            Self::UserTyping { .. }
                | Self::UserStoppedTyping { .. }
                | Self::UserOnline { .. }
                | Self::UserOffline { .. }
        )
    }

    /// Wire name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::MessageReceived(_) => "messageReceived",
            Self::MessageSent(_) => "messageSent",
            Self::MessageReadNotification { .. } => "messageReadNotification",
            Self::UserTyping { .. } => "userTyping",
            Self::UserStoppedTyping { .. } => "userStoppedTyping",
            Self::UserOnline { .. } => "userOnline",
            Self::UserOffline { .. } => "userOffline",
            Self::OnlineUsersList { .. } => "onlineUsersList",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
        }
    }
}
