//! Call session state machine.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{CandidateInit, PeerId, RoomId};

/// Current state of the call session.
#[derive(Debug, Clone, Serialize, Default)]
pub enum SessionState {
    /// No session.
    #[default]
    Idle,
    /// Join requested, waiting for the local capture stream.
    AwaitingMedia,
    /// Join envelope pending or sent, waiting for the relay's answer.
    Connecting,
    /// In the room, alone.
    Joined,
    /// The other occupant arrived; waiting for a local accept or reject.
    PeerPresent,
    /// Offer sent, waiting for the answer.
    Offering,
    /// Inbound offer applied, answer being produced.
    Answering,
    /// Descriptions exchanged, waiting for remote media.
    Negotiating,
    /// Media flowing both ways.
    Active { connected_at: DateTime<Utc> },
    /// The remote peer declined. Terminal until the next join.
    Rejected,
    /// The room was already full. Terminal until the next join.
    RoomFull,
    /// Session over.
    Ended {
        reason: EndReason,
        duration_secs: Option<i64>,
    },
}

impl SessionState {
    /// A new join may start from here.
    pub fn can_join(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Rejected | Self::RoomFull | Self::Ended { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.can_join()
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// States in which an inbound offer starts the callee flow. The second
    /// occupant of a room never sees a presence notification, so `Joined`
    /// qualifies as well as `PeerPresent`.
    pub fn can_receive_offer(&self) -> bool {
        matches!(self, Self::Joined | Self::PeerPresent)
    }

    pub fn can_accept(&self) -> bool {
        matches!(self, Self::PeerPresent)
    }

    pub fn can_reject(&self) -> bool {
        matches!(self, Self::PeerPresent)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EndReason {
    /// Local hangup.
    Hangup,
    /// The other occupant left or disconnected.
    PeerLeft,
    /// Local reject of the incoming presence.
    Declined,
    /// Signaling channel dropped before the session reached Active.
    LinkLost,
    /// Local capture could not be acquired.
    Media,
    /// Description or candidate application failed.
    Negotiation,
}

/// Which side of the offer/answer exchange this session takes. Assigned
/// exactly once per session generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallRole {
    /// Produces the offer (the occupant notified of the peer's arrival).
    Caller,
    /// Produces the answer (the occupant that receives the offer).
    Callee,
}

/// State transitions for the session.
#[derive(Debug, Clone)]
pub enum Transition {
    /// Join requested but the capture stream is not ready yet.
    MediaPending,
    JoinRequested,
    RoomJoined,
    RoomRefused,
    PeerArrived,
    OfferSent,
    OfferReceived,
    AnswerSent,
    AnswerApplied,
    /// First remote track arrived.
    RemoteMedia,
    RejectedByPeer,
    Terminated { reason: EndReason },
}

/// One call attempt: the state plus everything scoped to it.
#[derive(Debug, Default)]
pub struct Session {
    pub state: SessionState,
    pub room: Option<RoomId>,
    pub local_peer: Option<PeerId>,
    pub remote_peer: Option<PeerId>,
    pub role: Option<CallRole>,
    /// Candidates received before the remote description was applied.
    /// Flushed FIFO right after it is, then discarded.
    pub pending_candidates: VecDeque<CandidateInit>,
    /// Set once the remote description has been applied to the transport.
    pub remote_applied: bool,
}

impl Session {
    pub fn idle() -> Self {
        Self::default()
    }

    /// Fresh session for a new join attempt.
    pub fn begin(room: RoomId) -> Self {
        Self {
            room: Some(room),
            ..Self::default()
        }
    }

    /// Bind the remote peer. Returns false if a different peer is already
    /// bound — the caller must then drop the envelope.
    pub fn bind_remote(&mut self, peer: &PeerId) -> bool {
        match &self.remote_peer {
            Some(bound) => bound == peer,
            None => {
                self.remote_peer = Some(peer.clone());
                true
            }
        }
    }

    /// Assign the role. A session's role never changes once set.
    pub fn assign_role(&mut self, role: CallRole) {
        debug_assert!(self.role.is_none(), "session role reassigned");
        self.role = Some(role);
    }

    /// Apply a state transition. Returns an error if it is not legal from
    /// the current state.
    pub fn apply(&mut self, transition: Transition) -> Result<(), InvalidTransition> {
        let new_state = match (&self.state, transition) {
            (s, Transition::MediaPending) if s.can_join() => SessionState::AwaitingMedia,
            (s, Transition::JoinRequested) if s.can_join() => SessionState::Connecting,
            (SessionState::AwaitingMedia, Transition::JoinRequested) => SessionState::Connecting,
            (SessionState::Connecting, Transition::RoomJoined) => SessionState::Joined,
            (SessionState::Connecting, Transition::RoomRefused) => SessionState::RoomFull,
            (SessionState::Joined, Transition::PeerArrived) => SessionState::PeerPresent,
            (SessionState::PeerPresent, Transition::OfferSent) => SessionState::Offering,
            (s, Transition::OfferReceived) if s.can_receive_offer() => SessionState::Answering,
            (SessionState::Answering, Transition::AnswerSent) => SessionState::Negotiating,
            (SessionState::Offering, Transition::AnswerApplied) => SessionState::Negotiating,
            (
                SessionState::Answering | SessionState::Negotiating,
                Transition::RemoteMedia,
            ) => SessionState::Active {
                connected_at: Utc::now(),
            },
            (s, Transition::RejectedByPeer) if !s.is_terminal() => SessionState::Rejected,
            (s, Transition::Terminated { reason }) if !s.is_terminal() => {
                let duration_secs = match s {
                    SessionState::Active { connected_at } => {
                        Some(Utc::now().signed_duration_since(*connected_at).num_seconds())
                    }
                    _ => None,
                };
                SessionState::Ended {
                    reason,
                    duration_secs,
                }
            }
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: format!("{current:?}"),
                    attempted: format!("{transition:?}"),
                });
            }
        };
        self.state = new_state;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined_session() -> Session {
        let mut session = Session::begin(RoomId::new("R7"));
        session.apply(Transition::JoinRequested).unwrap();
        session.apply(Transition::RoomJoined).unwrap();
        session
    }

    /// Caller flow: Idle → Connecting → Joined → PeerPresent → Offering →
    /// Negotiating → Active → Ended.
    #[test]
    fn test_caller_flow() {
        let mut session = joined_session();
        assert!(matches!(session.state, SessionState::Joined));

        session.apply(Transition::PeerArrived).unwrap();
        assert!(session.state.can_accept());

        session.assign_role(CallRole::Caller);
        session.apply(Transition::OfferSent).unwrap();
        assert!(matches!(session.state, SessionState::Offering));

        session.apply(Transition::AnswerApplied).unwrap();
        assert!(matches!(session.state, SessionState::Negotiating));

        session.apply(Transition::RemoteMedia).unwrap();
        assert!(session.state.is_active());

        session
            .apply(Transition::Terminated {
                reason: EndReason::Hangup,
            })
            .unwrap();
        assert!(session.state.is_terminal());
        if let SessionState::Ended { duration_secs, .. } = session.state {
            assert!(duration_secs.is_some());
        } else {
            panic!("expected Ended");
        }
    }

    /// Callee flow: the offer arrives without a preceding presence
    /// notification.
    #[test]
    fn test_callee_flow_from_joined() {
        let mut session = joined_session();

        session.assign_role(CallRole::Callee);
        session.apply(Transition::OfferReceived).unwrap();
        assert!(matches!(session.state, SessionState::Answering));

        session.apply(Transition::AnswerSent).unwrap();
        assert!(matches!(session.state, SessionState::Negotiating));

        session.apply(Transition::RemoteMedia).unwrap();
        assert!(session.state.is_active());
    }

    /// Remote media may arrive while the answer is still being sent.
    #[test]
    fn test_remote_media_during_answering() {
        let mut session = joined_session();
        session.apply(Transition::OfferReceived).unwrap();
        session.apply(Transition::RemoteMedia).unwrap();
        assert!(session.state.is_active());
    }

    #[test]
    fn test_room_full_is_terminal() {
        let mut session = Session::begin(RoomId::new("R7"));
        session.apply(Transition::JoinRequested).unwrap();
        session.apply(Transition::RoomRefused).unwrap();
        assert!(session.state.is_terminal());
        assert!(session.state.can_join());

        // Nothing but a new join applies from here.
        assert!(session.apply(Transition::PeerArrived).is_err());
        assert!(
            session
                .apply(Transition::Terminated {
                    reason: EndReason::Hangup,
                })
                .is_err()
        );
    }

    #[test]
    fn test_remote_reject_reaches_rejected() {
        let mut session = joined_session();
        session.apply(Transition::PeerArrived).unwrap();
        session.apply(Transition::RejectedByPeer).unwrap();
        assert!(matches!(session.state, SessionState::Rejected));
        assert!(session.state.can_join());
    }

    #[test]
    fn test_awaiting_media_precedes_connecting() {
        let mut session = Session::begin(RoomId::new("R7"));
        session.apply(Transition::MediaPending).unwrap();
        assert!(matches!(session.state, SessionState::AwaitingMedia));
        session.apply(Transition::JoinRequested).unwrap();
        assert!(matches!(session.state, SessionState::Connecting));
    }

    #[test]
    fn test_invalid_transitions() {
        let mut session = Session::begin(RoomId::new("R7"));

        // Can't be in a room before the relay acks the join.
        assert!(session.apply(Transition::RoomJoined).is_err());

        session.apply(Transition::JoinRequested).unwrap();
        // No offer before a peer exists.
        assert!(session.apply(Transition::OfferSent).is_err());
        // No remote media before descriptions are exchanged.
        assert!(session.apply(Transition::RemoteMedia).is_err());
    }

    #[test]
    fn test_ended_rejects_further_transitions() {
        let mut session = joined_session();
        session
            .apply(Transition::Terminated {
                reason: EndReason::PeerLeft,
            })
            .unwrap();

        assert!(session.apply(Transition::PeerArrived).is_err());
        assert!(session.apply(Transition::RemoteMedia).is_err());
        assert!(session.apply(Transition::RejectedByPeer).is_err());
    }

    #[test]
    fn test_remote_peer_binds_once() {
        let mut session = joined_session();
        let peer_b = PeerId::new("B");
        let peer_c = PeerId::new("C");

        assert!(session.bind_remote(&peer_b));
        // Same peer again is fine.
        assert!(session.bind_remote(&peer_b));
        // A different peer is refused.
        assert!(!session.bind_remote(&peer_c));
        assert_eq!(session.remote_peer, Some(peer_b));
    }
}
