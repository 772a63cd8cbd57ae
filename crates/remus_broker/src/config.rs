//! Broker configuration, usable both from the CLI and as a library embedder.

use remus_protocol::{DEFAULT_CLIENT_PORT, DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_PUBLISH_PORT, DEFAULT_WORKER_PORT};

/// Construction parameters for a [`crate::Router`].
///
/// The `*_addr` fields take full ZMQ endpoint strings (`tcp://0.0.0.0:50505`,
/// `ipc:///tmp/remus-client.sock`, ...) so embedders aren't forced onto TCP.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub client_addr: String,
    pub worker_addr: String,
    pub publish_addr: Option<String>,
    pub heartbeat_interval_ms: u64,
    pub max_workers: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            client_addr: format!("tcp://0.0.0.0:{DEFAULT_CLIENT_PORT}"),
            worker_addr: format!("tcp://0.0.0.0:{DEFAULT_WORKER_PORT}"),
            publish_addr: Some(format!("tcp://0.0.0.0:{DEFAULT_PUBLISH_PORT}")),
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            max_workers: 64,
        }
    }
}
