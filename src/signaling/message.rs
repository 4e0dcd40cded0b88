//! Signaling wire protocol
//!
//! Every message travels as one JSON text frame shaped as
//! `{"event": "<name>", "data": {...}}`.

use super::SignalingError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// ICE candidate as exchanged between browsers (`RTCIceCandidateInit`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    /// Transport and candidate type (`udp`, `host`) parsed from the candidate line
    pub fn transport_and_type(&self) -> (Option<String>, Option<String>) {
        let parts: Vec<&str> = self.candidate.split_whitespace().collect();
        if parts.len() < 8 {
            return (None, None);
        }

        let transport = parts.get(2).map(|v| v.to_ascii_lowercase());
        let candidate_type = parts
            .iter()
            .position(|p| *p == "typ")
            .and_then(|idx| parts.get(idx + 1))
            .map(|typ| typ.to_ascii_lowercase());

        (transport, candidate_type)
    }
}

/// Signaling messages exchanged with the rendezvous server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SignalingMessage {
    /// Ask the server for a fresh room
    #[serde(alias = "create_room")]
    Create {},

    /// Join an existing room
    #[serde(alias = "join_room")]
    Join {
        #[serde(rename = "roomId")]
        room_id: String,
    },

    /// Room created; the sender is its creator
    RoomCreated {
        #[serde(rename = "roomId")]
        room_id: String,
    },

    /// Join acknowledged
    RoomJoined {
        #[serde(rename = "roomId")]
        room_id: String,
    },

    /// SDP offer
    Offer {
        sdp: String,
        #[serde(rename = "roomId", default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
    },

    /// SDP answer
    Answer {
        sdp: String,
        #[serde(rename = "roomId", default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
    },

    /// Trickled ICE candidate
    IceCandidate {
        candidate: IceCandidate,
        #[serde(rename = "roomId", default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
    },

    /// The other room member left
    PeerDisconnected {},

    /// Still frame for classification (data URL)
    DetectSign {
        image: String,
        #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        #[serde(rename = "roomId", default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
    },

    /// Classification result
    DetectionResult {
        label: String,
        confidence: f32,
        #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },

    /// Classification failure
    DetectionError {
        error: String,
        #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },

    /// Server-side rejection (e.g. unknown room)
    Error {
        message: String,
    },
}

/// Message discriminant, used to register handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Create,
    Join,
    RoomCreated,
    RoomJoined,
    Offer,
    Answer,
    IceCandidate,
    PeerDisconnected,
    DetectSign,
    DetectionResult,
    DetectionError,
    Error,
}

impl MessageKind {
    pub const ALL: [MessageKind; 12] = [
        MessageKind::Create,
        MessageKind::Join,
        MessageKind::RoomCreated,
        MessageKind::RoomJoined,
        MessageKind::Offer,
        MessageKind::Answer,
        MessageKind::IceCandidate,
        MessageKind::PeerDisconnected,
        MessageKind::DetectSign,
        MessageKind::DetectionResult,
        MessageKind::DetectionError,
        MessageKind::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Create => "create",
            MessageKind::Join => "join",
            MessageKind::RoomCreated => "room_created",
            MessageKind::RoomJoined => "room_joined",
            MessageKind::Offer => "offer",
            MessageKind::Answer => "answer",
            MessageKind::IceCandidate => "ice_candidate",
            MessageKind::PeerDisconnected => "peer_disconnected",
            MessageKind::DetectSign => "detect_sign",
            MessageKind::DetectionResult => "detection_result",
            MessageKind::DetectionError => "detection_error",
            MessageKind::Error => "error",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SignalingMessage {
    /// Parse a signaling message from JSON
    pub fn from_json(json: &str) -> Result<Self, SignalingError> {
        serde_json::from_str(json.trim())
            .map_err(|e| SignalingError::Decode(format!("Invalid signaling message: {}", e)))
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, SignalingError> {
        serde_json::to_string(self)
            .map_err(|e| SignalingError::Encode(format!("Failed to serialize message: {}", e)))
    }

    pub fn offer(sdp: String, room_id: &str) -> Self {
        SignalingMessage::Offer {
            sdp,
            room_id: Some(room_id.to_string()),
        }
    }

    pub fn answer(sdp: String, room_id: &str) -> Self {
        SignalingMessage::Answer {
            sdp,
            room_id: Some(room_id.to_string()),
        }
    }

    pub fn ice_candidate(candidate: IceCandidate, room_id: &str) -> Self {
        SignalingMessage::IceCandidate {
            candidate,
            room_id: Some(room_id.to_string()),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            SignalingMessage::Create {} => MessageKind::Create,
            SignalingMessage::Join { .. } => MessageKind::Join,
            SignalingMessage::RoomCreated { .. } => MessageKind::RoomCreated,
            SignalingMessage::RoomJoined { .. } => MessageKind::RoomJoined,
            SignalingMessage::Offer { .. } => MessageKind::Offer,
            SignalingMessage::Answer { .. } => MessageKind::Answer,
            SignalingMessage::IceCandidate { .. } => MessageKind::IceCandidate,
            SignalingMessage::PeerDisconnected {} => MessageKind::PeerDisconnected,
            SignalingMessage::DetectSign { .. } => MessageKind::DetectSign,
            SignalingMessage::DetectionResult { .. } => MessageKind::DetectionResult,
            SignalingMessage::DetectionError { .. } => MessageKind::DetectionError,
            SignalingMessage::Error { .. } => MessageKind::Error,
        }
    }

    /// Room context carried by the message, if any
    pub fn room_id(&self) -> Option<&str> {
        match self {
            SignalingMessage::Join { room_id }
            | SignalingMessage::RoomCreated { room_id }
            | SignalingMessage::RoomJoined { room_id } => Some(room_id.as_str()),
            SignalingMessage::Offer { room_id, .. }
            | SignalingMessage::Answer { room_id, .. }
            | SignalingMessage::IceCandidate { room_id, .. }
            | SignalingMessage::DetectSign { room_id, .. } => room_id.as_deref(),
            SignalingMessage::Create {}
            | SignalingMessage::PeerDisconnected {}
            | SignalingMessage::DetectionResult { .. }
            | SignalingMessage::DetectionError { .. }
            | SignalingMessage::Error { .. } => None,
        }
    }
}
