use feira_types::api::FieldError;
use feira_types::events::ServerEvent;

/// Failures reported back to the client that caused them. None of these
/// close the session.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid message")]
    InvalidMessage(Vec<FieldError>),

    #[error("message not found")]
    NotFound,

    #[error("not authenticated")]
    Unauthenticated,

    #[error("{0}")]
    InvalidState(&'static str),

    #[error("store failure: {0}")]
    Store(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidMessage(_) => "INVALID_MESSAGE",
            Self::NotFound => "NOT_FOUND",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::Store(_) => "INTERNAL",
        }
    }

    /// The `error` event sent to the client. Store details stay in the logs.
    pub fn to_event(&self) -> ServerEvent {
        let (message, fields) = match self {
            Self::InvalidMessage(fields) => (self.to_string(), fields.clone()),
            Self::Store(_) => ("internal error, please retry".to_string(), Vec::new()),
            _ => (self.to_string(), Vec::new()),
        };
        ServerEvent::Error {
            code: self.code().to_string(),
            message,
            fields,
        }
    }

    /// A frame that could not be parsed as a command.
    pub fn malformed(detail: &str) -> Self {
        Self::InvalidMessage(vec![FieldError::new("payload", detail)])
    }
}
