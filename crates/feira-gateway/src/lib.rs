pub mod config;
pub mod connection;
pub mod error;
pub mod identity;
mod locks;
pub mod presence;
pub mod relay;
pub mod router;
pub mod session;

use std::sync::Arc;

use feira_db::Database;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::presence::PresenceRegistry;
use crate::relay::SignalRelay;
use crate::router::MessageRouter;

/// Everything a connection needs, handed to each session at construction.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    presence: PresenceRegistry,
    router: MessageRouter,
    relay: SignalRelay,
    config: GatewayConfig,
    jwt_secret: String,
}

impl Gateway {
    pub fn new(db: Arc<Database>, jwt_secret: String, config: GatewayConfig) -> Self {
        let presence = PresenceRegistry::new();
        let router = MessageRouter::new(db.clone(), presence.clone());
        let relay = SignalRelay::new(db, presence.clone());
        Self {
            inner: Arc::new(GatewayInner {
                presence,
                router,
                relay,
                config,
                jwt_secret,
            }),
        }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.inner.presence
    }

    pub fn router(&self) -> &MessageRouter {
        &self.inner.router
    }

    pub fn relay(&self) -> &SignalRelay {
        &self.inner.relay
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn jwt_secret(&self) -> &str {
        &self.inner.jwt_secret
    }
}

/// Run a blocking store call off the async runtime.
pub(crate) async fn run_blocking<F, T>(db: &Arc<Database>, f: F) -> Result<T, GatewayError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| GatewayError::Store(anyhow::anyhow!("spawn_blocking join error: {}", e)))?
        .map_err(GatewayError::Store)
}
