use std::path::PathBuf;
use std::time::Duration;

use fray::PlayerPreferences;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub name: String,
    pub skin: String,
    pub prefs: PlayerPreferences,
    /// Record every inbound message here when set.
    pub demo_path: Option<PathBuf>,
    /// Bounded wait for the per-tick transport drain.
    pub poll_timeout: Duration,
    /// Give up on a connection attempt after this long.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: String::from("player"),
            skin: String::from("base"),
            prefs: PlayerPreferences::default(),
            demo_path: None,
            poll_timeout: Duration::from_millis(1),
            connect_timeout: Duration::from_secs(10),
        }
    }
}
