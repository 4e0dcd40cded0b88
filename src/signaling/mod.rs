//! Signaling channel to the rendezvous server
//!
//! This module provides:
//! - The wire message set (room management, SDP/ICE relay, detection)
//! - A transport abstraction with a WebSocket implementation
//! - A reconnecting client with per-kind message handlers

pub mod message;
pub mod transport;
pub mod client;

pub use client::{ChannelStatus, RetryPolicy, SignalingClient};
pub use message::{IceCandidate, MessageKind, SignalingMessage};
pub use transport::{Channel, SignalingTransport, WebSocketTransport};

use std::error::Error;
use std::fmt;

/// Signaling-related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    /// Channel could not be opened
    Connect(String),
    /// Channel is not open
    Disconnected,
    /// Outbound message could not be serialized
    Encode(String),
    /// Inbound frame is not a known message
    Decode(String),
}

impl fmt::Display for SignalingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalingError::Connect(msg) => write!(f, "Connect failed: {}", msg),
            SignalingError::Disconnected => write!(f, "Signaling channel disconnected"),
            SignalingError::Encode(msg) => write!(f, "Encode error: {}", msg),
            SignalingError::Decode(msg) => write!(f, "Decode error: {}", msg),
        }
    }
}

impl Error for SignalingError {}

/// Outbound side of the signaling channel as seen by the call session
pub trait SignalSink: Send + Sync {
    /// Transmit a message. Dropped silently when the channel is not open.
    fn send(&self, message: SignalingMessage);

    /// Stop the channel; no reconnection afterwards.
    fn close(&self) {}
}
