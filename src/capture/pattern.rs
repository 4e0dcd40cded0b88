//! Synthetic capture device
//!
//! Produces a moving gradient so the headless client has something to send.

use super::{CaptureError, Frame, MediaConstraints, MediaDevice, MediaSource, MediaTrack, TrackKind};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Default)]
pub struct TestPatternDevice;

impl TestPatternDevice {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaDevice for TestPatternDevice {
    async fn open(&self, constraints: &MediaConstraints) -> Result<Arc<dyn MediaSource>, CaptureError> {
        if constraints.width == 0 || constraints.height == 0 {
            return Err(CaptureError::DeviceUnavailable(format!(
                "unsupported resolution {}x{}",
                constraints.width, constraints.height
            )));
        }
        Ok(Arc::new(TestPatternSource::new(constraints)))
    }
}

struct TestPatternSource {
    stream_id: String,
    tracks: Vec<MediaTrack>,
    width: u32,
    height: u32,
    sequence: AtomicU64,
    stopped: AtomicBool,
}

impl TestPatternSource {
    fn new(constraints: &MediaConstraints) -> Self {
        let stream_id = format!("local-{}", uuid::Uuid::new_v4());
        let mut tracks = vec![MediaTrack {
            id: format!("video-{}", uuid::Uuid::new_v4()),
            kind: TrackKind::Video,
        }];
        if constraints.audio {
            tracks.push(MediaTrack {
                id: format!("audio-{}", uuid::Uuid::new_v4()),
                kind: TrackKind::Audio,
            });
        }

        Self {
            stream_id,
            tracks,
            width: constraints.width,
            height: constraints.height,
            sequence: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }
}

impl MediaSource for TestPatternSource {
    fn stream_id(&self) -> &str {
        &self.stream_id
    }

    fn tracks(&self) -> Vec<MediaTrack> {
        self.tracks.clone()
    }

    fn snapshot(&self) -> Option<Frame> {
        if self.stopped.load(Ordering::Relaxed) {
            return None;
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let width = self.width.max(1);
        let shift = ((sequence * 8) % u64::from(width)) as u32;
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for y in 0..self.height {
            for x in 0..self.width {
                data.push((((x + shift) % width) * 255 / width) as u8);
                data.push((y * 255 / self.height.max(1)) as u8);
                data.push(((x + y) % 256) as u8);
            }
        }

        Some(Frame {
            width: self.width,
            height: self.height,
            data,
            timestamp: Instant::now(),
            sequence,
        })
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pattern_frames_are_rgb_and_sequenced() {
        let constraints = MediaConstraints {
            width: 32,
            height: 16,
            audio: false,
            facing_mode: "user".to_string(),
        };
        let source = TestPatternDevice::new().open(&constraints).await.unwrap();
        assert_eq!(source.tracks().len(), 1);
        assert_eq!(source.tracks()[0].kind, TrackKind::Video);

        let first = source.snapshot().unwrap();
        let second = source.snapshot().unwrap();
        assert!(first.is_well_formed());
        assert_eq!(second.sequence, first.sequence + 1);
    }
}
