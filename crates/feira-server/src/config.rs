use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

use feira_gateway::config::GatewayConfig;

const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "change-me-in-production",
    "change-me",
    "changeme",
    "secret",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub gateway: GatewayConfig,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("FEIRA_JWT_SECRET").unwrap_or_default();
        if jwt_secret.trim().is_empty() {
            bail!("FEIRA_JWT_SECRET must be set");
        }
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("FEIRA_JWT_SECRET is a placeholder value, refusing to start");
        }

        let db_path = PathBuf::from(lookup("FEIRA_DB_PATH").unwrap_or_else(|| "feira.db".into()));
        let host = lookup("FEIRA_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse_or(&lookup, "FEIRA_PORT", 3000)?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let defaults = GatewayConfig::default();
        let gateway = GatewayConfig {
            identify_timeout: Duration::from_secs(parse_or(
                &lookup,
                "FEIRA_IDENTIFY_TIMEOUT_SECS",
                defaults.identify_timeout.as_secs(),
            )?),
            push_timeout: Duration::from_millis(parse_or(
                &lookup,
                "FEIRA_PUSH_TIMEOUT_MS",
                defaults.push_timeout.as_millis() as u64,
            )?),
            outbound_capacity: parse_or(
                &lookup,
                "FEIRA_OUTBOUND_CAPACITY",
                defaults.outbound_capacity,
            )?,
            ephemeral_headroom: parse_or(
                &lookup,
                "FEIRA_EPHEMERAL_HEADROOM",
                defaults.ephemeral_headroom,
            )?,
            heartbeat_interval: Duration::from_secs(parse_or(
                &lookup,
                "FEIRA_HEARTBEAT_SECS",
                defaults.heartbeat_interval.as_secs(),
            )?),
        };

        Ok(Self {
            jwt_secret,
            db_path,
            addr,
            gateway,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has invalid value {:?}", key, raw)),
        None => Ok(default),
    }
}
