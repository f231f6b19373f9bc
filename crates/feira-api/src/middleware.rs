use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use feira_gateway::identity;

use crate::error::ApiError;
use crate::state::AppState;

/// Verified caller identity, inserted by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

/// Extract and validate the bearer token from the Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user_id = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(|token| identity::verify_token(token, state.gateway.jwt_secret()))
        .ok_or(ApiError::Unauthenticated)?;

    req.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(req).await)
}
