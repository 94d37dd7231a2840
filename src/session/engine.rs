//! The session engine: one serialized event queue driving the call state
//! machine.
//!
//! The engine owns the current [`Session`], the single media transport, and
//! the link's send side. Every input — inbound envelope, link lifecycle,
//! media readiness, transport callback, user intent — is one
//! [`EngineEvent`] processed to completion (including outbound sends and
//! awaited transport calls) before the next, so no two transports can ever
//! be created concurrently and candidate ordering is preserved by
//! construction.
//!
//! A generation counter identifies one join-to-teardown lifetime. It is
//! bumped on every join and on every entry into a terminal state;
//! transport callbacks carry the generation they were created under and
//! are discarded when stale.

use std::mem;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{broadcast, mpsc, watch};

use crate::media::{MediaSource, RemoteAudio};
use crate::session::error::CallError;
use crate::session::event::{
    CallEvent, EngineEvent, Intent, LinkEvent, MediaEvent, TransportEvent,
};
use crate::session::state::{CallRole, EndReason, Session, SessionState, Transition};
use crate::session::transport::{MediaTransport, TransportError, TransportFactory};
use crate::socket::envelope::{ClientEnvelope, ServerEnvelope, SignalPayload};
use crate::socket::link::LinkCommand;
use crate::types::{CandidateInit, PeerId, RoomId, SdpKind, SessionDescription};

/// Read-only view of the session published after every processed event.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub room: Option<RoomId>,
    pub local_peer: Option<PeerId>,
    pub remote_peer: Option<PeerId>,
    pub role: Option<CallRole>,
    pub remote_audio: Option<RemoteAudio>,
}

impl SessionSnapshot {
    /// True while the other occupant is known and the session is live.
    pub fn peer_present(&self) -> bool {
        self.remote_peer.is_some() && !self.state.is_terminal()
    }
}

pub struct SessionEngine {
    ice_servers: Vec<String>,
    media: Arc<MediaSource>,
    factory: Arc<dyn TransportFactory>,
    link: mpsc::Sender<LinkCommand>,
    /// Handed to transports so their callbacks land on the engine queue.
    loopback: mpsc::Sender<EngineEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
    bus: broadcast::Sender<CallEvent>,

    session: Session,
    transport: Option<Arc<dyn MediaTransport>>,
    remote_audio: Option<RemoteAudio>,
    generation: u64,
    link_up: bool,
    media_ready: bool,
    last_state: Option<mem::Discriminant<SessionState>>,
}

impl SessionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ice_servers: Vec<String>,
        media: Arc<MediaSource>,
        factory: Arc<dyn TransportFactory>,
        link: mpsc::Sender<LinkCommand>,
        loopback: mpsc::Sender<EngineEvent>,
        snapshot: watch::Sender<SessionSnapshot>,
        bus: broadcast::Sender<CallEvent>,
    ) -> Self {
        Self {
            ice_servers,
            media,
            factory,
            link,
            loopback,
            snapshot,
            bus,
            session: Session::idle(),
            transport: None,
            remote_audio: None,
            generation: 0,
            link_up: false,
            media_ready: false,
            last_state: None,
        }
    }

    pub async fn run(mut self, mut events: mpsc::Receiver<EngineEvent>) {
        info!("session engine started");
        while let Some(event) = events.recv().await {
            let stop = self.handle(event).await;
            self.publish();
            if stop {
                break;
            }
        }
        info!("session engine stopped");
    }

    /// Process one event fully. Returns true on shutdown.
    async fn handle(&mut self, event: EngineEvent) -> bool {
        match event {
            EngineEvent::Intent(intent) => return self.on_intent(intent).await,
            EngineEvent::Link(event) => self.on_link(event).await,
            EngineEvent::Media(event) => self.on_media(event).await,
            EngineEvent::Transport { generation, event } => {
                if generation != self.generation {
                    debug!("dropping stale transport event (generation {generation})");
                } else {
                    self.on_transport(event).await;
                }
            }
        }
        false
    }

    // ==================== user intents ====================

    async fn on_intent(&mut self, intent: Intent) -> bool {
        match intent {
            Intent::Join { room, reply } => {
                let _ = reply.send(self.join(room).await);
            }
            Intent::Accept { reply } => {
                let _ = reply.send(self.accept().await);
            }
            Intent::Reject { reply } => {
                let _ = reply.send(self.reject().await);
            }
            Intent::Hangup { reply } => {
                let _ = reply.send(self.hangup().await);
            }
            Intent::Shutdown => {
                if !self.session.state.is_terminal() {
                    let _ = self.hangup().await;
                }
                let _ = self.link.send(LinkCommand::Shutdown).await;
                return true;
            }
        }
        false
    }

    async fn join(&mut self, room: RoomId) -> Result<(), CallError> {
        if !self.session.state.can_join() {
            warn!("join requested while a session is in progress");
            return Err(CallError::SessionBusy);
        }

        self.generation += 1;
        self.session = Session::begin(room);
        self.remote_audio = None;
        info!(
            "join requested for room {} (generation {})",
            self.session.room.as_ref().expect("room just set"),
            self.generation
        );

        if self.media_ready {
            self.proceed_to_connecting().map_err(state_defect)?;
        } else {
            self.session
                .apply(Transition::MediaPending)
                .map_err(state_defect)?;
            self.media.ensure_acquiring(self.loopback.clone()).await;
        }
        Ok(())
    }

    /// Move into Connecting; the join envelope goes out now if the link is
    /// up, otherwise when it comes up.
    fn proceed_to_connecting(&mut self) -> Result<(), crate::session::state::InvalidTransition> {
        self.session.apply(Transition::JoinRequested)?;
        if self.link_up {
            self.send_join();
        }
        Ok(())
    }

    fn send_join(&self) {
        if let Some(room) = &self.session.room {
            self.send_envelope(ClientEnvelope::JoinRoom { room: room.clone() });
        }
    }

    async fn accept(&mut self) -> Result<(), CallError> {
        if !self.session.state.can_accept() {
            return Err(CallError::NoActiveSession);
        }

        self.session.assign_role(CallRole::Caller);
        match self.start_offer().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fail_negotiation(e).await;
                Err(CallError::NegotiationFailed(
                    "could not produce offer".to_string(),
                ))
            }
        }
    }

    /// Caller flow: build the transport, attach local audio, send the offer.
    async fn start_offer(&mut self) -> Result<(), TransportError> {
        let transport = self.create_transport().await?;
        let offer = transport.create_offer().await?;
        transport.set_local_description(offer.clone()).await?;

        let to = self
            .session
            .remote_peer
            .clone()
            .expect("peer bound in PeerPresent");
        self.send_envelope(ClientEnvelope::Signal {
            to,
            data: SignalPayload::sdp(offer),
        });
        self.session
            .apply(Transition::OfferSent)
            .map_err(|e| TransportError::Setup(e.to_string()))?;
        info!("offer sent (generation {})", self.generation);
        Ok(())
    }

    async fn reject(&mut self) -> Result<(), CallError> {
        if !self.session.state.can_reject() {
            return Err(CallError::NoActiveSession);
        }

        if let Some(room) = &self.session.room {
            self.send_envelope(ClientEnvelope::RejectCall { room: room.clone() });
        }
        // No transport exists yet in PeerPresent; plain teardown.
        self.end_session(EndReason::Declined).await;
        Ok(())
    }

    async fn hangup(&mut self) -> Result<(), CallError> {
        if self.session.state.is_terminal() {
            // Idempotent: nothing to hang up is not an error.
            return Ok(());
        }

        if self.link_up
            && let Some(room) = &self.session.room
        {
            self.send_envelope(ClientEnvelope::LeaveRoom { room: room.clone() });
        }
        self.end_session(EndReason::Hangup).await;
        Ok(())
    }

    // ==================== link events ====================

    async fn on_link(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Up => {
                self.link_up = true;
                let _ = self.bus.send(CallEvent::LinkUp);
                // A join held back while the link was down goes out now.
                if matches!(self.session.state, SessionState::Connecting)
                    && self.session.local_peer.is_none()
                {
                    self.send_join();
                }
            }
            LinkEvent::Down => {
                self.link_up = false;
                let _ = self.bus.send(CallEvent::LinkDown);
                // An Active session keeps its media; everything earlier
                // still needs the channel and ends here.
                if !self.session.state.is_terminal() && !self.session.state.is_active() {
                    info!("link lost, ending pre-active session");
                    self.end_session(EndReason::LinkLost).await;
                }
            }
            LinkEvent::Inbound(envelope) => self.on_envelope(envelope).await,
        }
    }

    async fn on_envelope(&mut self, envelope: ServerEnvelope) {
        match envelope {
            ServerEnvelope::JoinedRoom { peer_id } => {
                if matches!(self.session.state, SessionState::Connecting) {
                    info!("joined room as {peer_id}");
                    self.session.local_peer = Some(peer_id);
                    let _ = self.session.apply(Transition::RoomJoined);
                } else {
                    debug!("ignoring joined-room outside Connecting");
                }
            }
            ServerEnvelope::RoomFull => {
                if matches!(self.session.state, SessionState::Connecting) {
                    warn!("room is full");
                    let _ = self.session.apply(Transition::RoomRefused);
                    self.generation += 1;
                    let _ = self.bus.send(CallEvent::Failed(CallError::RoomFull));
                }
            }
            ServerEnvelope::PeerJoined { peer_id } => {
                if matches!(self.session.state, SessionState::Joined)
                    && self.session.bind_remote(&peer_id)
                {
                    info!("peer {peer_id} joined the room");
                    let _ = self.session.apply(Transition::PeerArrived);
                    let _ = self.bus.send(CallEvent::IncomingPeer(peer_id));
                } else {
                    debug!("ignoring peer-joined from {peer_id}");
                }
            }
            ServerEnvelope::Signal { from, data } => self.on_signal(from, data).await,
            ServerEnvelope::CallRejected => {
                if !self.session.state.is_terminal() {
                    info!("call rejected by peer");
                    self.release_transport().await;
                    let _ = self.session.apply(Transition::RejectedByPeer);
                    self.generation += 1;
                }
            }
            ServerEnvelope::PeerLeft => {
                if !self.session.state.is_terminal() {
                    info!("peer left the room");
                    self.end_session(EndReason::PeerLeft).await;
                }
            }
        }
    }

    async fn on_signal(&mut self, from: PeerId, data: SignalPayload) {
        if self.session.state.is_terminal() {
            debug!("ignoring signal from {from} with no session");
            return;
        }
        // A bound session only ever talks to its one peer.
        if let Some(bound) = &self.session.remote_peer
            && *bound != from
        {
            debug!("ignoring signal from stale peer {from}");
            return;
        }

        if let Some(sdp) = data.sdp {
            match sdp.kind {
                SdpKind::Offer => self.on_remote_offer(from, sdp).await,
                SdpKind::Answer => self.on_remote_answer(sdp).await,
            }
        } else if let Some(candidate) = data.candidate {
            self.on_remote_candidate(candidate).await;
        }
    }

    /// Callee flow: the offer creates the transport, the answer goes
    /// straight back.
    async fn on_remote_offer(&mut self, from: PeerId, offer: SessionDescription) {
        if !self.session.state.can_receive_offer() || self.session.role.is_some() {
            debug!("ignoring unexpected offer from {from}");
            return;
        }
        if !self.session.bind_remote(&from) {
            debug!("ignoring offer from stale peer {from}");
            return;
        }

        self.session.assign_role(CallRole::Callee);
        if let Err(e) = self.session.apply(Transition::OfferReceived) {
            warn!("offer in unexpected state: {e}");
            return;
        }
        info!("answering offer from {from} (generation {})", self.generation);

        if let Err(e) = self.answer_offer(offer).await {
            self.fail_negotiation(e).await;
        }
    }

    async fn answer_offer(&mut self, offer: SessionDescription) -> Result<(), TransportError> {
        let transport = self.create_transport().await?;
        transport.set_remote_description(offer).await?;
        self.session.remote_applied = true;
        self.flush_candidates().await?;

        let answer = transport.create_answer().await?;
        transport.set_local_description(answer.clone()).await?;

        let to = self
            .session
            .remote_peer
            .clone()
            .expect("peer bound by offer");
        self.send_envelope(ClientEnvelope::Signal {
            to,
            data: SignalPayload::sdp(answer),
        });
        self.session
            .apply(Transition::AnswerSent)
            .map_err(|e| TransportError::Setup(e.to_string()))?;
        Ok(())
    }

    async fn on_remote_answer(&mut self, answer: SessionDescription) {
        if !matches!(self.session.state, SessionState::Offering) {
            debug!("ignoring answer outside Offering");
            return;
        }
        if self.transport.is_none() {
            warn!("answer received with no transport");
            return;
        }

        match self.apply_remote_answer(answer).await {
            Ok(()) => {
                let _ = self.session.apply(Transition::AnswerApplied);
                info!("answer applied (generation {})", self.generation);
            }
            Err(e) => self.fail_negotiation(e).await,
        }
    }

    async fn apply_remote_answer(
        &mut self,
        answer: SessionDescription,
    ) -> Result<(), TransportError> {
        let transport = self.transport.clone().expect("checked by caller");
        transport.set_remote_description(answer).await?;
        self.session.remote_applied = true;
        self.flush_candidates().await
    }

    async fn on_remote_candidate(&mut self, candidate: CandidateInit) {
        if self.session.remote_applied {
            let Some(transport) = self.transport.clone() else {
                debug!("candidate after transport release, dropping");
                return;
            };
            if let Err(e) = transport.add_ice_candidate(candidate).await {
                self.fail_negotiation(e).await;
            }
        } else {
            // Remote description not applied yet: queue, never drop.
            self.session.pending_candidates.push_back(candidate);
            debug!(
                "buffered candidate ({} pending)",
                self.session.pending_candidates.len()
            );
        }
    }

    /// Drain the candidate queue to the transport in arrival order. Runs
    /// exactly once per session, right after the remote description is
    /// applied.
    async fn flush_candidates(&mut self) -> Result<(), TransportError> {
        let Some(transport) = self.transport.clone() else {
            return Ok(());
        };
        let pending = mem::take(&mut self.session.pending_candidates);
        if !pending.is_empty() {
            debug!("flushing {} buffered candidates", pending.len());
        }
        for candidate in pending {
            transport.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    // ==================== media & transport events ====================

    async fn on_media(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::Ready => {
                self.media_ready = true;
                if matches!(self.session.state, SessionState::AwaitingMedia)
                    && let Err(e) = self.proceed_to_connecting()
                {
                    warn!("failed to leave AwaitingMedia: {e}");
                }
            }
            MediaEvent::Failed(message) => {
                self.media_ready = false;
                warn!("media acquisition failed: {message}");
                if matches!(self.session.state, SessionState::AwaitingMedia) {
                    self.end_session(EndReason::Media).await;
                    let _ = self
                        .bus
                        .send(CallEvent::Failed(CallError::MediaUnavailable(message)));
                }
            }
        }
    }

    async fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                if let Some(to) = self.session.remote_peer.clone() {
                    if self.link_up {
                        self.send_envelope(ClientEnvelope::Signal {
                            to,
                            data: SignalPayload::candidate(candidate),
                        });
                    } else {
                        debug!("link down, dropping local candidate");
                    }
                }
            }
            TransportEvent::RemoteTrack(audio) => {
                match self.session.apply(Transition::RemoteMedia) {
                    Ok(()) => {
                        info!("remote media arrived, session active");
                        self.remote_audio = Some(audio);
                    }
                    // A second track on an already-active session changes
                    // nothing.
                    Err(e) => debug!("ignoring remote track: {e}"),
                }
            }
            TransportEvent::Failed(message) => {
                if !self.session.state.is_terminal() {
                    self.fail_negotiation(TransportError::Setup(message)).await;
                }
            }
        }
    }

    // ==================== teardown ====================

    /// Create the transport for the current session. The state machine
    /// guarantees no transport exists at the call sites; a leftover one
    /// would be a defect, so it is refused rather than replaced.
    async fn create_transport(&mut self) -> Result<Arc<dyn MediaTransport>, TransportError> {
        if self.transport.is_some() {
            return Err(TransportError::Setup(
                "transport already exists for this session".to_string(),
            ));
        }
        let local = self.media.local().await;
        let transport = self
            .factory
            .create(
                &self.ice_servers,
                self.generation,
                self.loopback.clone(),
                local,
            )
            .await?;
        self.transport = Some(transport.clone());
        Ok(transport)
    }

    async fn release_transport(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        self.remote_audio = None;
        self.session.pending_candidates.clear();
        self.session.remote_applied = false;
    }

    /// Tear the session down into Ended and bump the generation so late
    /// completions from this lifetime are recognized as stale.
    async fn end_session(&mut self, reason: EndReason) {
        self.release_transport().await;
        if let Err(e) = self.session.apply(Transition::Terminated { reason }) {
            debug!("terminate on settled session: {e}");
        }
        self.generation += 1;
    }

    /// A description or candidate failed to apply. Never leave a half-built
    /// transport attached.
    async fn fail_negotiation(&mut self, error: TransportError) {
        warn!("negotiation failed: {error}");
        self.end_session(EndReason::Negotiation).await;
        let _ = self.bus.send(CallEvent::Failed(CallError::NegotiationFailed(
            error.to_string(),
        )));
    }

    // ==================== plumbing ====================

    fn send_envelope(&self, envelope: ClientEnvelope) {
        // The link drops sends while down; callers check link state before
        // issuing envelopes that need it.
        if let Err(e) = self.link.try_send(LinkCommand::Send(envelope)) {
            warn!("failed to queue envelope: {e}");
        }
    }

    fn publish(&mut self) {
        let snapshot = SessionSnapshot {
            state: self.session.state.clone(),
            room: self.session.room.clone(),
            local_peer: self.session.local_peer.clone(),
            remote_peer: self.session.remote_peer.clone(),
            role: self.session.role,
            remote_audio: self.remote_audio.clone(),
        };
        let state = snapshot.state.clone();
        let _ = self.snapshot.send(snapshot);

        let tag = mem::discriminant(&state);
        if self.last_state != Some(tag) {
            self.last_state = Some(tag);
            let _ = self.bus.send(CallEvent::StateChanged(state));
        }
    }
}

fn state_defect(e: crate::session::state::InvalidTransition) -> CallError {
    warn!("session state defect: {e}");
    CallError::NoActiveSession
}
