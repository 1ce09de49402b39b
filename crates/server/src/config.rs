use std::path::PathBuf;
use std::time::Duration;

use fray::{GameSettings, MAX_CLIENTS};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Connection slots, at most [`MAX_CLIENTS`].
    pub max_clients: usize,
    pub settings: GameSettings,
    pub map_number: u32,
    pub rng_seed: u32,
    /// Save-game scratch file the full-state transfer stages through.
    pub scratch_path: PathBuf,
    /// Record every inbound message here when set.
    pub demo_path: Option<PathBuf>,
    /// Elevates a client to moderator when presented via an auth request.
    pub password: Option<String>,
    /// Buffered commands per peer before the peer counts as flooding.
    pub command_flood_limit: usize,
    /// Bounded wait for the per-tick transport drain.
    pub poll_timeout: Duration,
    /// Ticks between client-status updates to each peer.
    pub status_interval_ticks: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_clients: MAX_CLIENTS,
            settings: GameSettings::default(),
            map_number: 0,
            rng_seed: 0x29a_119,
            scratch_path: std::env::temp_dir().join("fray-server.state"),
            demo_path: None,
            password: None,
            command_flood_limit: 48,
            poll_timeout: Duration::from_millis(1),
            status_interval_ticks: 35,
        }
    }
}

impl ServerConfig {
    pub fn effective_max_clients(&self) -> usize {
        self.max_clients.min(MAX_CLIENTS)
    }
}
