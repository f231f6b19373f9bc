pub mod config;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use feira_api::{AppState, AppStateInner};
use feira_db::Database;
use feira_gateway::{Gateway, connection, identity};
use feira_types::api::ErrorBody;

use crate::config::ServerConfig;

/// Build shared state from an opened database.
pub fn build_state(db: Arc<Database>, config: &ServerConfig) -> AppState {
    let gateway = Gateway::new(db.clone(), config.jwt_secret.clone(), config.gateway.clone());
    Arc::new(AppStateInner { db, gateway })
}

pub fn app(state: AppState) -> Router {
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health))
        .merge(feira_api::routes(state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// `?token=` authenticates at upgrade time; without it the client has the
/// identify grace period to send `identify`.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let gateway = state.gateway.clone();

    match query.token {
        Some(token) => {
            let Some(user_id) = identity::verify_token(&token, gateway.jwt_secret()) else {
                warn!("Gateway upgrade with invalid token rejected");
                let body = ErrorBody {
                    code: "UNAUTHENTICATED".into(),
                    message: "invalid or expired token".into(),
                    fields: Vec::new(),
                };
                return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
            };
            ws.on_upgrade(move |socket| {
                connection::handle_connection_authenticated(socket, gateway, user_id)
            })
        }
        None => ws.on_upgrade(move |socket| connection::handle_connection(socket, gateway)),
    }
}
