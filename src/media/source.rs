//! The shared local capture stream and the remote stream handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use tokio::sync::{RwLock, mpsc};
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::{AudioCapture, AudioConstraints, AudioFrame, MediaError};
use crate::session::event::{EngineEvent, MediaEvent};

/// The local outbound audio stream.
///
/// Owned by [`MediaSource`]; the session engine only borrows it to attach
/// the track to a transport. Mute gates the frame pump — while muted no
/// samples are written, so the remote side hears silence. The device feed
/// itself is never stopped by mute.
pub struct LocalAudio {
    track: Arc<TrackLocalStaticSample>,
    muted: Arc<AtomicBool>,
    pump: tokio::task::JoinHandle<()>,
}

impl LocalAudio {
    fn start(
        constraints: &AudioConstraints,
        muted: Arc<AtomicBool>,
        mut frames: mpsc::Receiver<AudioFrame>,
    ) -> Self {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: constraints.sample_rate,
                channels: constraints.channels,
                ..Default::default()
            },
            "audio".to_string(),
            "roomcall".to_string(),
        ));

        let pump_track = track.clone();
        let pump_muted = muted.clone();
        let pump = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                if pump_muted.load(Ordering::Relaxed) {
                    continue;
                }
                let sample = Sample {
                    data: frame.data,
                    duration: frame.duration,
                    ..Default::default()
                };
                if let Err(e) = pump_track.write_sample(&sample).await {
                    warn!("failed to write capture sample: {e}");
                }
            }
            debug!("capture feed ended, pump stopped");
        });

        Self { track, muted, pump }
    }

    pub fn track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    fn stop(&self) {
        self.pump.abort();
    }
}

/// Read-only handle to the remote peer's audio, owned by the transport.
/// Present from the first remote track event until teardown.
#[derive(Clone)]
pub struct RemoteAudio {
    label: String,
    track: Option<Arc<TrackRemote>>,
}

impl RemoteAudio {
    pub fn new(label: impl Into<String>, track: Option<Arc<TrackRemote>>) -> Self {
        Self {
            label: label.into(),
            track,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// The underlying remote track, for playback collaborators.
    pub fn track(&self) -> Option<Arc<TrackRemote>> {
        self.track.clone()
    }
}

impl std::fmt::Debug for RemoteAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAudio")
            .field("label", &self.label)
            .field("track", &self.track.is_some())
            .finish()
    }
}

enum AcquireState {
    Empty,
    Acquiring,
    Ready(Arc<LocalAudio>),
    Failed(String),
}

/// Acquires and owns the local capture stream.
///
/// Acquisition happens once per process, not once per call; sequential
/// sessions share the same stream. Release stops the device feed and is
/// idempotent.
pub struct MediaSource {
    capture: Arc<dyn AudioCapture>,
    constraints: AudioConstraints,
    muted: Arc<AtomicBool>,
    state: RwLock<AcquireState>,
}

impl MediaSource {
    pub fn new(capture: Arc<dyn AudioCapture>, constraints: AudioConstraints) -> Arc<Self> {
        Arc::new(Self {
            capture,
            constraints,
            muted: Arc::new(AtomicBool::new(false)),
            state: RwLock::new(AcquireState::Empty),
        })
    }

    /// Start acquisition if it is not already running or done. The outcome
    /// is reported to the engine queue as a media event.
    pub async fn ensure_acquiring(self: &Arc<Self>, events: mpsc::Sender<EngineEvent>) {
        {
            let mut state = self.state.write().await;
            match *state {
                AcquireState::Acquiring | AcquireState::Ready(_) => return,
                AcquireState::Empty | AcquireState::Failed(_) => {
                    *state = AcquireState::Acquiring;
                }
            }
        }

        let source = self.clone();
        tokio::spawn(async move {
            match source.capture.open(&source.constraints).await {
                Ok(frames) => {
                    let local = Arc::new(LocalAudio::start(
                        &source.constraints,
                        source.muted.clone(),
                        frames,
                    ));
                    *source.state.write().await = AcquireState::Ready(local);
                    info!("local capture stream acquired");
                    let _ = events.send(EngineEvent::Media(MediaEvent::Ready)).await;
                }
                Err(e) => {
                    warn!("capture acquisition failed: {e}");
                    *source.state.write().await = AcquireState::Failed(e.to_string());
                    let _ = events
                        .send(EngineEvent::Media(MediaEvent::Failed(e.to_string())))
                        .await;
                }
            }
        });
    }

    pub async fn local(&self) -> Option<Arc<LocalAudio>> {
        match &*self.state.read().await {
            AcquireState::Ready(local) => Some(local.clone()),
            _ => None,
        }
    }

    pub async fn is_ready(&self) -> bool {
        matches!(&*self.state.read().await, AcquireState::Ready(_))
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// Flip mute and return the new value. No session state is touched and
    /// nothing is signaled — the remote side simply hears silence.
    pub fn toggle_muted(&self) -> bool {
        !self.muted.fetch_xor(true, Ordering::Relaxed)
    }

    /// Stop the device feed and drop the stream. Idempotent.
    pub async fn release(&self) {
        let mut state = self.state.write().await;
        if let AcquireState::Ready(local) = &*state {
            local.stop();
        }
        *state = AcquireState::Empty;
    }
}
