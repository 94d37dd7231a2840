//! The media-transport boundary and its WebRTC implementation.
//!
//! The engine drives the transport exclusively through [`MediaTransport`];
//! the production implementation wraps an `RTCPeerConnection` from the
//! `webrtc` crate. Transport callbacks are posted back into the engine
//! queue tagged with the session generation, so completions that arrive
//! after teardown are identified and discarded rather than acted on.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::{debug, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::track::track_local::TrackLocal;

use crate::media::{LocalAudio, RemoteAudio};
use crate::session::event::{EngineEvent, TransportEvent};
use crate::types::{CandidateInit, SdpKind, SessionDescription};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport setup failed: {0}")]
    Setup(String),
    #[error("description error: {0}")]
    Description(String),
    #[error("candidate error: {0}")]
    Candidate(String),
}

impl From<webrtc::Error> for TransportError {
    fn from(e: webrtc::Error) -> Self {
        Self::Description(e.to_string())
    }
}

/// The live peer-to-peer media session object.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;
    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;
    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError>;
    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError>;
    /// Feed one remote candidate. A no-op on a closed transport.
    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<(), TransportError>;
    /// Close and release local/remote track references. Idempotent.
    async fn close(&self);
}

/// Creates transports bound to one session generation.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        ice_servers: &[String],
        generation: u64,
        events: mpsc::Sender<EngineEvent>,
        local: Option<Arc<LocalAudio>>,
    ) -> Result<Arc<dyn MediaTransport>, TransportError>;
}

/// [`TransportFactory`] backed by the `webrtc` crate.
#[derive(Debug, Default)]
pub struct RtcFactory;

#[async_trait]
impl TransportFactory for RtcFactory {
    async fn create(
        &self,
        ice_servers: &[String],
        generation: u64,
        events: mpsc::Sender<EngineEvent>,
        local: Option<Arc<LocalAudio>>,
    ) -> Result<Arc<dyn MediaTransport>, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: ice_servers.to_vec(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| TransportError::Setup(e.to_string()))?,
        );

        if let Some(local) = local {
            pc.add_track(local.track() as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| TransportError::Setup(e.to_string()))?;
        }

        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let events = candidate_events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(json) => {
                        let init = CandidateInit {
                            candidate: json.candidate,
                            sdp_mid: json.sdp_mid,
                            sdp_mline_index: json.sdp_mline_index,
                        };
                        let _ = events
                            .send(EngineEvent::Transport {
                                generation,
                                event: TransportEvent::LocalCandidate(init),
                            })
                            .await;
                    }
                    Err(e) => warn!("failed to encode local candidate: {e}"),
                }
            })
        }));

        let track_events = events.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = track_events.clone();
            Box::pin(async move {
                debug!("remote track arrived: ssrc={}", track.ssrc());
                let audio = RemoteAudio::new(format!("ssrc:{}", track.ssrc()), Some(track));
                let _ = events
                    .send(EngineEvent::Transport {
                        generation,
                        event: TransportEvent::RemoteTrack(audio),
                    })
                    .await;
            })
        }));

        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events = events.clone();
            Box::pin(async move {
                debug!("peer connection state: {state:?}");
                if state == RTCPeerConnectionState::Failed {
                    let _ = events
                        .send(EngineEvent::Transport {
                            generation,
                            event: TransportEvent::Failed("peer connection failed".to_string()),
                        })
                        .await;
                }
            })
        }));

        Ok(Arc::new(RtcTransport {
            pc,
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct RtcTransport {
    pc: Arc<RTCPeerConnection>,
    closed: AtomicBool,
}

impl RtcTransport {
    fn to_rtc(desc: &SessionDescription) -> Result<RTCSessionDescription, TransportError> {
        let result = match desc.kind {
            SdpKind::Offer => RTCSessionDescription::offer(desc.sdp.clone()),
            SdpKind::Answer => RTCSessionDescription::answer(desc.sdp.clone()),
        };
        result.map_err(|e| TransportError::Description(e.to_string()))
    }
}

#[async_trait]
impl MediaTransport for RtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self.pc.create_offer(None).await?;
        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: offer.sdp,
        })
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self.pc.create_answer(None).await?;
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: answer.sdp,
        })
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        let desc = Self::to_rtc(&desc)?;
        self.pc.set_local_description(desc).await?;
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        let desc = Self::to_rtc(&desc)?;
        self.pc.set_remote_description(desc).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Relaxed) {
            debug!("ignoring candidate for closed transport");
            return Ok(());
        }
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            ..Default::default()
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| TransportError::Candidate(e.to_string()))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::Relaxed) {
            return;
        }
        if let Err(e) = self.pc.close().await {
            warn!("error closing peer connection: {e}");
        }
    }
}
