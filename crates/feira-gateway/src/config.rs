use std::time::Duration;

/// Gateway tunables. Defaults match the documented `FEIRA_*` env defaults.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How long a fresh connection may stay unidentified.
    pub identify_timeout: Duration,
    /// Deadline for writing one event to a client socket.
    pub push_timeout: Duration,
    /// Outbound queue size per connection.
    pub outbound_capacity: usize,
    /// Free slots kept for durable events; typing/presence signals are
    /// dropped once the queue has this few slots left.
    pub ephemeral_headroom: usize,
    /// Server sends a Ping this often; two missed Pongs drop the connection.
    pub heartbeat_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            identify_timeout: Duration::from_secs(10),
            push_timeout: Duration::from_millis(2000),
            outbound_capacity: 64,
            ephemeral_headroom: 16,
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}
