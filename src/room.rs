//! Room coordination
//!
//! Tracks the single room this client belongs to and its role in it.
//! The joiner always sends the SDP offer; the creator always answers.

use crate::signaling::SignalingMessage;
use log::{info, warn};
use std::error::Error;
use std::fmt;

/// Local role in the room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomRole {
    /// Created the room; answers offers
    Initiator,
    /// Joined an existing room; sends the offer
    Joiner,
}

impl RoomRole {
    pub fn sends_offer(&self) -> bool {
        matches!(self, RoomRole::Joiner)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: String,
    pub role: RoomRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    /// A room is active or a create/join is already pending
    AlreadyActive,
    /// Room id is empty
    InvalidRoomId,
    /// Negotiation message arrived with no active room
    NoActiveRoom,
    /// Negotiation message carried no room id
    MissingContext,
    /// Negotiation message belongs to another room
    Mismatch { expected: String, received: String },
}

impl fmt::Display for RoomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomError::AlreadyActive => write!(f, "A room is already active"),
            RoomError::InvalidRoomId => write!(f, "Room id must not be empty"),
            RoomError::NoActiveRoom => write!(f, "No active room"),
            RoomError::MissingContext => write!(f, "Message carries no room id"),
            RoomError::Mismatch { expected, received } => {
                write!(f, "Message for room {} while in room {}", received, expected)
            }
        }
    }
}

impl Error for RoomError {}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RoomState {
    Idle,
    Creating,
    Joining(String),
    Active(Room),
}

#[derive(Debug)]
pub struct RoomCoordinator {
    state: RoomState,
}

impl Default for RoomCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomCoordinator {
    pub fn new() -> Self {
        Self {
            state: RoomState::Idle,
        }
    }

    pub fn room(&self) -> Option<&Room> {
        match self.state {
            RoomState::Active(ref room) => Some(room),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, RoomState::Creating | RoomState::Joining(_))
    }

    /// Start a create request; yields the message to send
    pub fn request_create(&mut self) -> Result<SignalingMessage, RoomError> {
        if self.state != RoomState::Idle {
            return Err(RoomError::AlreadyActive);
        }
        self.state = RoomState::Creating;
        Ok(SignalingMessage::Create {})
    }

    /// Start a join request; yields the message to send
    pub fn request_join(&mut self, room_id: &str) -> Result<SignalingMessage, RoomError> {
        let room_id = room_id.trim();
        if room_id.is_empty() {
            return Err(RoomError::InvalidRoomId);
        }
        if self.state != RoomState::Idle {
            return Err(RoomError::AlreadyActive);
        }
        self.state = RoomState::Joining(room_id.to_string());
        Ok(SignalingMessage::Join {
            room_id: room_id.to_string(),
        })
    }

    /// Server acknowledged our create
    pub fn on_room_created(&mut self, room_id: String) -> Option<Room> {
        if self.state != RoomState::Creating {
            warn!("Ignoring unsolicited room_created for {}", room_id);
            return None;
        }
        info!("Room created: {}", room_id);
        let room = Room {
            id: room_id,
            role: RoomRole::Initiator,
        };
        self.state = RoomState::Active(room.clone());
        Some(room)
    }

    /// Server acknowledged our join
    pub fn on_room_joined(&mut self, room_id: String) -> Option<Room> {
        let requested = match self.state {
            RoomState::Joining(ref requested) => requested.clone(),
            _ => {
                warn!("Ignoring unsolicited room_joined for {}", room_id);
                return None;
            }
        };
        if requested != room_id {
            warn!("Joined room {} although {} was requested", room_id, requested);
        }
        info!("Room joined: {}", room_id);
        let room = Room {
            id: room_id,
            role: RoomRole::Joiner,
        };
        self.state = RoomState::Active(room.clone());
        Some(room)
    }

    /// Server rejected the pending request. Returns true if one was pending.
    pub fn on_rejected(&mut self, reason: &str) -> bool {
        if self.is_pending() {
            warn!("Room request rejected: {}", reason);
            self.state = RoomState::Idle;
            true
        } else {
            false
        }
    }

    /// Drop the room (and any pending request)
    pub fn leave(&mut self) -> Option<Room> {
        match std::mem::replace(&mut self.state, RoomState::Idle) {
            RoomState::Active(room) => {
                info!("Left room {}", room.id);
                Some(room)
            }
            _ => None,
        }
    }

    /// Validate the room context of an inbound negotiation message
    pub fn check_context(&self, room_id: Option<&str>) -> Result<&Room, RoomError> {
        let room = self.room().ok_or(RoomError::NoActiveRoom)?;
        match room_id {
            None => Err(RoomError::MissingContext),
            Some(id) if id == room.id => Ok(room),
            Some(id) => Err(RoomError::Mismatch {
                expected: room.id.clone(),
                received: id.to_string(),
            }),
        }
    }
}
