use thiserror::Error;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("socket is closed")]
    Closed,
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid envelope: {0}")]
    Envelope(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SocketError>;
