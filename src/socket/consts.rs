/// Relay endpoint used when no URL is configured.
pub const DEFAULT_RELAY_URL: &str = "wss://call-server-ueo9.onrender.com/ws";

/// Cap on the reconnect backoff, in seconds.
pub const RECONNECT_MAX_DELAY_SECS: u64 = 30;
