//! Local capture: the device boundary and the shared outbound audio stream.

mod source;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

pub use source::{LocalAudio, MediaSource, RemoteAudio};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media device unavailable: {0}")]
    Unavailable(String),
}

/// Capture constraints, the audio subset of the usual getUserMedia shape.
#[derive(Debug, Clone)]
pub struct AudioConstraints {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 1,
        }
    }
}

/// One encoded audio frame from the capture device.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub data: Bytes,
    pub duration: Duration,
}

/// The microphone boundary. Implementations open the platform device and
/// feed encoded frames until the receiver is dropped.
///
/// Opening may suspend while the OS grants access; a denied or missing
/// device fails with [`MediaError::Unavailable`].
#[async_trait]
pub trait AudioCapture: Send + Sync {
    async fn open(
        &self,
        constraints: &AudioConstraints,
    ) -> Result<mpsc::Receiver<AudioFrame>, MediaError>;
}

/// Opus frame representing 20 ms of silence.
const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];

/// Capture feed producing silence. Useful for demos and tests where no
/// real microphone is present.
#[derive(Debug, Default)]
pub struct SilenceCapture;

#[async_trait]
impl AudioCapture for SilenceCapture {
    async fn open(
        &self,
        _constraints: &AudioConstraints,
    ) -> Result<mpsc::Receiver<AudioFrame>, MediaError> {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(20));
            loop {
                ticker.tick().await;
                let frame = AudioFrame {
                    data: Bytes::from_static(&OPUS_SILENCE),
                    duration: Duration::from_millis(20),
                };
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}
