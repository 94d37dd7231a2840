use std::time::Duration;

use crate::media::AudioConstraints;
use crate::socket::consts::DEFAULT_RELAY_URL;

/// Default public STUN server used when no connectivity servers are
/// configured.
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Configuration for a [`crate::CallClient`].
#[derive(Clone, Debug)]
pub struct CallConfig {
    /// Websocket URL of the signaling relay.
    pub relay_url: String,
    /// Connectivity (STUN/TURN) server URIs handed to the media transport.
    pub ice_servers: Vec<String>,
    /// Timeout for one websocket connection attempt.
    pub connect_timeout: Duration,
    /// Local capture constraints.
    pub constraints: AudioConstraints,
}

impl CallConfig {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            ..Default::default()
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            connect_timeout: Duration::from_secs(10),
            constraints: AudioConstraints::default(),
        }
    }
}
