//! The one serialized event stream feeding the session engine.
//!
//! Inbound envelopes, link lifecycle, media readiness, transport callbacks,
//! and user intents all arrive on the same queue; the engine processes one
//! event fully before the next, which is what makes the ordering and
//! idempotence guarantees structural.

use tokio::sync::oneshot;

use crate::media::RemoteAudio;
use crate::session::error::CallError;
use crate::session::state::SessionState;
use crate::socket::envelope::ServerEnvelope;
use crate::types::{CandidateInit, PeerId, RoomId};

/// Everything the engine reacts to.
#[derive(Debug)]
pub enum EngineEvent {
    Intent(Intent),
    Link(LinkEvent),
    Media(MediaEvent),
    /// Callback from the media transport, tagged with the generation it
    /// was created under; stale events are dropped.
    Transport {
        generation: u64,
        event: TransportEvent,
    },
}

type Reply = oneshot::Sender<Result<(), CallError>>;

/// User intents, forwarded by the facade. Each carries a reply so a
/// rejected intent surfaces as an error instead of being silently lost.
#[derive(Debug)]
pub enum Intent {
    Join { room: RoomId, reply: Reply },
    Accept { reply: Reply },
    Reject { reply: Reply },
    Hangup { reply: Reply },
    Shutdown,
}

/// Signaling link lifecycle and inbound traffic.
#[derive(Debug)]
pub enum LinkEvent {
    Up,
    Down,
    Inbound(ServerEnvelope),
}

/// Outcome of local capture acquisition.
#[derive(Debug)]
pub enum MediaEvent {
    Ready,
    Failed(String),
}

/// Events emitted by the media transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A local connectivity candidate to relay to the peer.
    LocalCandidate(CandidateInit),
    /// First remote media arrived.
    RemoteTrack(RemoteAudio),
    /// The transport gave up.
    Failed(String),
}

/// Notifications published to the presentation layer.
#[derive(Debug, Clone)]
pub enum CallEvent {
    StateChanged(SessionState),
    /// The other occupant arrived; ring.
    IncomingPeer(PeerId),
    /// Signaling link connected.
    LinkUp,
    /// Signaling link dropped; the link reconnects on its own. A transient
    /// indicator, not an error.
    LinkDown,
    /// A user-visible failure condition.
    Failed(CallError),
}
