use shared::{DEFAULT_HEIGHT, DEFAULT_PORT, DEFAULT_WIDTH, MAX_PEERS};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the TCP listener to
    pub bind_addr: String,
    /// Peer slots; connections beyond this are rejected
    pub max_peers: usize,
    /// Where the canvas is persisted on shutdown (None = not persisted)
    pub save_path: Option<PathBuf>,
    /// Size of the canvas used when nothing has been saved yet
    pub default_width: i16,
    pub default_height: i16,
    /// Silence after which a peer is treated as disconnected
    pub peer_timeout: Duration,
    /// How long shutdown waits for peers to acknowledge the disconnect
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            max_peers: MAX_PEERS,
            save_path: Some(PathBuf::from("savedcanvas.dat")),
            default_width: DEFAULT_WIDTH,
            default_height: DEFAULT_HEIGHT,
            peer_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}
