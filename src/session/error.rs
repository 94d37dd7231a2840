//! Call failure taxonomy.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// Device denied or missing. Recoverable: the next join retries
    /// acquisition.
    #[error("media unavailable: {0}")]
    MediaUnavailable(String),

    /// Signaling channel went down while the session still needed it.
    /// The link reconnects on its own.
    #[error("signaling link disconnected")]
    LinkDisconnected,

    /// The room already holds two occupants. Terminal for this join.
    #[error("room is full")]
    RoomFull,

    /// Description or candidate application failed. Ends the session, not
    /// retried automatically.
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    /// A join was requested while a session is still in progress. The
    /// existing session is left untouched.
    #[error("a call session is already in progress")]
    SessionBusy,

    /// The intent has no session to apply to.
    #[error("no active call session")]
    NoActiveSession,

    /// The engine has shut down.
    #[error("call client is closed")]
    Closed,
}
