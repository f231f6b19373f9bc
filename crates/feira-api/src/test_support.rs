use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use jsonwebtoken::{EncodingKey, Header, encode};
use tower::ServiceExt;

use feira_db::Database;
use feira_gateway::Gateway;
use feira_gateway::config::GatewayConfig;
use feira_types::api::{Claims, SendMessageDto};
use feira_types::models::Message;

use crate::state::AppStateInner;

const SECRET: &str = "api-test-secret";

pub struct TestApp {
    router: Router,
    gateway: Gateway,
}

impl TestApp {
    pub fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let gateway = Gateway::new(db.clone(), SECRET.into(), GatewayConfig::default());
        let state = Arc::new(AppStateInner {
            db,
            gateway: gateway.clone(),
        });
        Self {
            router: crate::routes(state),
            gateway,
        }
    }

    pub async fn send(&self, from: &str, dto: SendMessageDto) -> Message {
        self.gateway.router().send(from, dto).await.unwrap()
    }

    pub async fn get(&self, user: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        self.get_with_token(uri, &token(user)).await
    }

    pub async fn get_with_token(&self, uri: &str, token: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::get(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        self.call(req).await
    }

    pub async fn get_anonymous(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        self.call(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn post(&self, user: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::post(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token(user)))
            .body(Body::empty())
            .unwrap();
        self.call(req).await
    }

    async fn call(&self, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }
}

pub fn token(user: &str) -> String {
    let claims = Claims {
        sub: user.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

pub fn text_to(receiver: &str, content: &str) -> SendMessageDto {
    SendMessageDto {
        receiver_id: Some(receiver.into()),
        content: Some(content.into()),
        ..Default::default()
    }
}
