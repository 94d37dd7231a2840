//! Typed signaling envelopes.
//!
//! One JSON object per websocket text frame, tagged by `event`. The relay
//! forwards `signal` payloads opaquely; every other envelope is a room
//! membership notification. Semantic handling lives in the session engine —
//! this module only defines the wire shape.

use serde::{Deserialize, Serialize};

use crate::types::{CandidateInit, PeerId, RoomId, SessionDescription};

/// Envelopes sent from this client to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEnvelope {
    /// Ask the relay for a slot in a two-party room.
    JoinRoom { room: RoomId },
    /// Relay an opaque payload to the other occupant.
    Signal { to: PeerId, data: SignalPayload },
    /// Decline the incoming presence; the relay fans out `call-rejected`.
    RejectCall { room: RoomId },
    /// Leave the room; the relay fans out `peer-left`.
    LeaveRoom { room: RoomId },
}

/// Envelopes delivered from the relay to this client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEnvelope {
    /// Join acknowledged; carries the peer id the relay assigned to us.
    JoinedRoom { peer_id: PeerId },
    /// Join refused, the room already holds two occupants.
    RoomFull,
    /// Delivered to the first occupant when a second one joins.
    PeerJoined { peer_id: PeerId },
    /// Opaque payload relayed from the other occupant.
    Signal { from: PeerId, data: SignalPayload },
    /// The other occupant declined.
    CallRejected,
    /// The other occupant left or disconnected.
    PeerLeft,
}

/// The opaque half of a `signal` envelope: a session description, a
/// connectivity candidate, or (from a conforming peer) exactly one of the
/// two.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<CandidateInit>,
}

impl SignalPayload {
    pub fn sdp(desc: SessionDescription) -> Self {
        Self {
            sdp: Some(desc),
            candidate: None,
        }
    }

    pub fn candidate(candidate: CandidateInit) -> Self {
        Self {
            sdp: None,
            candidate: Some(candidate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SdpKind;

    #[test]
    fn join_room_wire_shape() {
        let env = ClientEnvelope::JoinRoom {
            room: RoomId::new("R7"),
        };
        let json = serde_json::to_string(&env).unwrap();
        assert_eq!(json, r#"{"event":"join-room","data":{"room":"R7"}}"#);
    }

    #[test]
    fn parses_joined_room() {
        let env: ServerEnvelope =
            serde_json::from_str(r#"{"event":"joined-room","data":{"peer_id":"A"}}"#).unwrap();
        assert_eq!(
            env,
            ServerEnvelope::JoinedRoom {
                peer_id: PeerId::new("A")
            }
        );
    }

    #[test]
    fn parses_room_full_without_data() {
        let env: ServerEnvelope = serde_json::from_str(r#"{"event":"room-full"}"#).unwrap();
        assert_eq!(env, ServerEnvelope::RoomFull);
    }

    #[test]
    fn parses_signal_with_offer() {
        let json = r#"{"event":"signal","data":{"from":"B","data":{"sdp":{"type":"offer","sdp":"v=0"}}}}"#;
        let env: ServerEnvelope = serde_json::from_str(json).unwrap();
        let ServerEnvelope::Signal { from, data } = env else {
            panic!("expected signal envelope");
        };
        assert_eq!(from, PeerId::new("B"));
        let sdp = data.sdp.expect("sdp payload");
        assert_eq!(sdp.kind, SdpKind::Offer);
        assert!(data.candidate.is_none());
    }

    #[test]
    fn candidate_payload_uses_browser_field_names() {
        let payload = SignalPayload::candidate(CandidateInit {
            candidate: "candidate:0 1 UDP 2122252543 192.0.2.1 54400 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        });
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains(r#""sdpMid":"0""#));
        assert!(json.contains(r#""sdpMLineIndex":0"#));

        let back: SignalPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }
}
