//! Peer connection layer
//!
//! This module provides:
//! - A backend abstraction ([`PeerConnector`] / [`PeerLink`])
//! - The `webrtc` crate backend
//! - The negotiation state machine owning the single active session

pub mod connector;
pub mod manager;

pub use connector::RtcPeerConnector;
pub use manager::{CandidateDisposition, Negotiation, PeerConnectionManager, PeerState, PeerUpdate};

use crate::capture::{LocalMedia, TrackKind};
use crate::signaling::IceCandidate;
use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// WebRTC-related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebRTCError {
    /// Peer connection creation failed
    ConnectionFailed(String),
    /// SDP processing failed
    SdpError(String),
    /// ICE candidate processing failed
    IceError(String),
    /// Media track error
    MediaError(String),
    /// Invalid state transition
    InvalidState(String),
    /// No active peer session
    NoSession,
}

impl fmt::Display for WebRTCError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebRTCError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            WebRTCError::SdpError(msg) => write!(f, "SDP error: {}", msg),
            WebRTCError::IceError(msg) => write!(f, "ICE error: {}", msg),
            WebRTCError::MediaError(msg) => write!(f, "Media error: {}", msg),
            WebRTCError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            WebRTCError::NoSession => write!(f, "No active peer session"),
        }
    }
}

impl Error for WebRTCError {}

/// Transport-level connection state reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Which side of the exchange a description came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Asynchronous notifications from a live peer link
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A local candidate was gathered and must be sent to the remote side
    LocalCandidate(IceCandidate),
    /// A remote track arrived
    RemoteTrack {
        stream_id: String,
        track_id: String,
        kind: TrackKind,
    },
    StateChanged(ConnectionState),
}

/// Epoch-tagged event forwarder handed to the backend.
///
/// The epoch identifies the session that produced the event so that events
/// from a replaced session can be discarded.
#[derive(Clone)]
pub struct PeerEventSink {
    epoch: u64,
    forward: Arc<dyn Fn(u64, PeerEvent) + Send + Sync>,
}

impl PeerEventSink {
    pub fn new(epoch: u64, forward: Arc<dyn Fn(u64, PeerEvent) + Send + Sync>) -> Self {
        Self { epoch, forward }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn emit(&self, event: PeerEvent) {
        (self.forward)(self.epoch, event);
    }
}

impl fmt::Debug for PeerEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerEventSink").field("epoch", &self.epoch).finish()
    }
}

/// Builds peer links carrying the local media
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, media: &LocalMedia, events: PeerEventSink) -> Result<Box<dyn PeerLink>, WebRTCError>;
}

/// One live peer connection
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Create an offer and set it as the local description
    async fn create_offer(&self) -> Result<String, WebRTCError>;

    /// Create an answer and set it as the local description
    async fn create_answer(&self) -> Result<String, WebRTCError>;

    async fn set_remote_description(&self, kind: SdpKind, sdp: &str) -> Result<(), WebRTCError>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), WebRTCError>;

    async fn close(&self) -> Result<(), WebRTCError>;
}
