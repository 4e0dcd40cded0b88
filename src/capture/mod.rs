//! Local media capture
//!
//! The capture device is an external collaborator behind [`MediaDevice`].
//! [`CaptureManager`] owns the acquired source and guarantees that it is
//! released exactly once.

pub mod frame;
pub mod pattern;

pub use frame::Frame;
pub use pattern::TestPatternDevice;

use async_trait::async_trait;
use log::{info, warn};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Capture failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The user or platform refused camera/microphone access
    PermissionDenied,
    /// No usable device
    DeviceUnavailable(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::PermissionDenied => write!(f, "Camera/microphone permission denied"),
            CaptureError::DeviceUnavailable(msg) => write!(f, "Capture device unavailable: {}", msg),
        }
    }
}

impl Error for CaptureError {}

/// Requested capture parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConstraints {
    /// Ideal width in pixels
    pub width: u32,
    /// Ideal height in pixels
    pub height: u32,
    pub audio: bool,
    pub facing_mode: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

/// A live capture source
pub trait MediaSource: Send + Sync {
    /// Stream identifier shared by all tracks
    fn stream_id(&self) -> &str;

    fn tracks(&self) -> Vec<MediaTrack>;

    /// Current video frame, `None` when no frame is available (yet)
    fn snapshot(&self) -> Option<Frame>;

    /// Stop all tracks
    fn stop(&self);
}

/// Capture device that opens sources
#[async_trait]
pub trait MediaDevice: Send + Sync {
    async fn open(&self, constraints: &MediaConstraints) -> Result<Arc<dyn MediaSource>, CaptureError>;
}

/// Captured local media, shared read-only with the peer session
#[derive(Clone)]
pub struct LocalMedia {
    source: Arc<dyn MediaSource>,
}

impl LocalMedia {
    pub fn new(source: Arc<dyn MediaSource>) -> Self {
        Self { source }
    }

    pub fn stream_id(&self) -> &str {
        self.source.stream_id()
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.source.tracks()
    }

    pub fn snapshot(&self) -> Option<Frame> {
        self.source.snapshot()
    }
}

impl fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMedia")
            .field("stream_id", &self.stream_id())
            .field("tracks", &self.tracks().len())
            .finish()
    }
}

/// Owns the local media source
pub struct CaptureManager {
    device: Arc<dyn MediaDevice>,
    constraints: MediaConstraints,
    media: Option<LocalMedia>,
}

impl CaptureManager {
    pub fn new(device: Arc<dyn MediaDevice>, constraints: MediaConstraints) -> Self {
        Self {
            device,
            constraints,
            media: None,
        }
    }

    pub fn media(&self) -> Option<&LocalMedia> {
        self.media.as_ref()
    }

    /// Acquire the local source, reusing the current one if present
    pub async fn acquire(&mut self) -> Result<LocalMedia, CaptureError> {
        if let Some(ref media) = self.media {
            return Ok(media.clone());
        }

        match self.device.open(&self.constraints).await {
            Ok(source) => {
                let media = LocalMedia::new(source);
                info!(
                    "Local media acquired: stream {} ({} tracks)",
                    media.stream_id(),
                    media.tracks().len()
                );
                self.media = Some(media.clone());
                Ok(media)
            }
            Err(e) => {
                warn!("Error accessing media devices: {}", e);
                Err(e)
            }
        }
    }

    /// Stop all tracks. Returns false when nothing was held.
    pub fn release(&mut self) -> bool {
        match self.media.take() {
            Some(media) => {
                media.source.stop();
                info!("Local media released: stream {}", media.stream_id());
                true
            }
            None => false,
        }
    }
}

impl Drop for CaptureManager {
    fn drop(&mut self) {
        self.release();
    }
}
