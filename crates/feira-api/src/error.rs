use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use feira_gateway::error::GatewayError;
use feira_types::api::{ErrorBody, FieldError};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or invalid bearer token")]
    Unauthenticated,

    #[error("not found")]
    NotFound,

    #[error("invalid request")]
    Invalid(Vec<FieldError>),

    #[error("{0}")]
    InvalidState(&'static str),

    #[error("internal error")]
    Internal,
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidMessage(fields) => Self::Invalid(fields),
            GatewayError::NotFound => Self::NotFound,
            GatewayError::Unauthenticated => Self::Unauthenticated,
            GatewayError::InvalidState(reason) => Self::InvalidState(reason),
            GatewayError::Store(e) => {
                error!("Store failure: {:#}", e);
                Self::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::Unauthenticated => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
            Self::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Invalid(_) => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_MESSAGE"),
            Self::InvalidState(_) => (StatusCode::CONFLICT, "INVALID_STATE"),
            Self::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        };
        let message = self.to_string();
        let fields = match self {
            Self::Invalid(fields) => fields,
            _ => Vec::new(),
        };
        (
            status,
            Json(ErrorBody {
                code: code.to_string(),
                message,
                fields,
            }),
        )
            .into_response()
    }
}
