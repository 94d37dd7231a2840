//! The call facade: the single object presentation code talks to.

use std::sync::Arc;

use log::info;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::config::CallConfig;
use crate::media::{AudioCapture, LocalAudio, MediaSource, RemoteAudio};
use crate::session::engine::{SessionEngine, SessionSnapshot};
use crate::session::error::CallError;
use crate::session::event::{CallEvent, EngineEvent, Intent};
use crate::session::transport::RtcFactory;
use crate::socket::link::SignalLink;
use crate::types::RoomId;

const ENGINE_QUEUE_CAPACITY: usize = 64;
const LINK_QUEUE_CAPACITY: usize = 32;
const EVENT_BUS_CAPACITY: usize = 64;

/// Client handle for two-party audio calls.
///
/// User intents are forwarded into the engine's single event queue, so
/// they take effect in issuance order relative to already-queued signaling
/// events; an intent with nothing to apply to comes back as an error
/// rather than being silently lost.
pub struct CallClient {
    intents: mpsc::Sender<EngineEvent>,
    snapshot: watch::Receiver<SessionSnapshot>,
    bus: broadcast::Sender<CallEvent>,
    media: Arc<MediaSource>,
}

impl CallClient {
    /// Wire up the link, the engine, and media acquisition, and return the
    /// facade. The link dials and re-dials on its own; media acquisition
    /// starts immediately and is shared across all calls made through this
    /// client.
    pub async fn connect(
        config: CallConfig,
        capture: Arc<dyn AudioCapture>,
    ) -> Result<Self, CallError> {
        let (engine_tx, engine_rx) = mpsc::channel(ENGINE_QUEUE_CAPACITY);
        let (link_tx, link_rx) = mpsc::channel(LINK_QUEUE_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let (bus, _) = broadcast::channel(EVENT_BUS_CAPACITY);

        let media = MediaSource::new(capture, config.constraints.clone());
        media.ensure_acquiring(engine_tx.clone()).await;

        SignalLink::spawn(
            config.relay_url.clone(),
            config.connect_timeout,
            link_rx,
            engine_tx.clone(),
        );

        let engine = SessionEngine::new(
            config.ice_servers.clone(),
            media.clone(),
            Arc::new(RtcFactory),
            link_tx,
            engine_tx.clone(),
            snapshot_tx,
            bus.clone(),
        );
        tokio::spawn(engine.run(engine_rx));

        info!("call client connected to {}", config.relay_url);
        Ok(Self {
            intents: engine_tx,
            snapshot: snapshot_rx,
            bus,
            media,
        })
    }

    /// Facade over an externally spawned engine. Used by harnesses that
    /// drive the queue themselves.
    pub fn with_engine(
        intents: mpsc::Sender<EngineEvent>,
        snapshot: watch::Receiver<SessionSnapshot>,
        bus: broadcast::Sender<CallEvent>,
        media: Arc<MediaSource>,
    ) -> Self {
        Self {
            intents,
            snapshot,
            bus,
            media,
        }
    }

    /// Join a room and start a call attempt. Rejected with
    /// [`CallError::SessionBusy`] while another session is in progress.
    pub async fn start_call(&self, room: impl Into<RoomId>) -> Result<(), CallError> {
        let room = room.into();
        self.intent(|reply| Intent::Join { room, reply }).await
    }

    /// Accept the incoming presence and produce the offer.
    pub async fn accept_incoming(&self) -> Result<(), CallError> {
        self.intent(|reply| Intent::Accept { reply }).await
    }

    /// Decline the incoming presence without creating a transport.
    pub async fn reject_incoming(&self) -> Result<(), CallError> {
        self.intent(|reply| Intent::Reject { reply }).await
    }

    /// End the current session. Safe from any state; calling it with
    /// nothing to hang up is a no-op.
    pub async fn hangup(&self) -> Result<(), CallError> {
        self.intent(|reply| Intent::Hangup { reply }).await
    }

    /// Flip the microphone mute and return the new value. Never changes
    /// session state and sends no signaling.
    pub fn toggle_mute(&self) -> bool {
        self.media.toggle_muted()
    }

    pub fn is_muted(&self) -> bool {
        self.media.is_muted()
    }

    /// Current session view.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch for session changes.
    pub fn watch_snapshot(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Subscribe to call notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.bus.subscribe()
    }

    pub async fn local_audio(&self) -> Option<Arc<LocalAudio>> {
        self.media.local().await
    }

    pub fn remote_audio(&self) -> Option<RemoteAudio> {
        self.snapshot.borrow().remote_audio.clone()
    }

    pub fn peer_present(&self) -> bool {
        self.snapshot.borrow().peer_present()
    }

    /// Hang up, stop the engine and the link, and release the capture
    /// stream.
    pub async fn shutdown(&self) {
        let _ = self.intents.send(EngineEvent::Intent(Intent::Shutdown)).await;
        self.media.release().await;
    }

    async fn intent(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<(), CallError>>) -> Intent,
    ) -> Result<(), CallError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.intents
            .send(EngineEvent::Intent(make(reply_tx)))
            .await
            .map_err(|_| CallError::Closed)?;
        reply_rx.await.map_err(|_| CallError::Closed)?
    }
}
