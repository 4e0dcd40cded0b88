//! Message routing for the rendezvous server
//!
//! Pure state: every inbound message yields the deliveries it causes, so
//! the same hub backs the WebSocket server and in-process relays.

use super::detect::Detector;
use super::rooms::{ConnId, RoomRegistry};
use crate::signaling::SignalingMessage;
use log::{debug, info, warn};

/// One outbound message for one connection
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub to: ConnId,
    pub message: SignalingMessage,
}

impl Delivery {
    pub fn new(to: ConnId, message: SignalingMessage) -> Self {
        Self { to, message }
    }
}

pub struct Hub {
    rooms: RoomRegistry,
    detector: Detector,
}

impl Hub {
    pub fn new(detector: Detector) -> Self {
        Self {
            rooms: RoomRegistry::new(),
            detector,
        }
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn handle(&mut self, conn: ConnId, message: SignalingMessage) -> Vec<Delivery> {
        match message {
            SignalingMessage::Create {} => {
                let room_id = self.rooms.create(conn);
                vec![Delivery::new(conn, SignalingMessage::RoomCreated { room_id })]
            }
            SignalingMessage::Join { room_id } => {
                if self.rooms.join(conn, &room_id) {
                    vec![Delivery::new(conn, SignalingMessage::RoomJoined { room_id })]
                } else {
                    warn!("Conn {} asked for unknown room {}", conn, room_id);
                    vec![Delivery::new(
                        conn,
                        SignalingMessage::Error {
                            message: "Room not found".to_string(),
                        },
                    )]
                }
            }
            message @ (SignalingMessage::Offer { .. }
            | SignalingMessage::Answer { .. }
            | SignalingMessage::IceCandidate { .. }) => self.relay(conn, message),
            SignalingMessage::DetectSign {
                image,
                request_id,
                room_id,
            } => {
                let reply = self.detector.respond(&image, request_id);
                self.route_detection(conn, room_id.as_deref(), reply)
            }
            other => {
                debug!("Ignoring {} message from conn {}", other.kind(), conn);
                Vec::new()
            }
        }
    }

    /// Recipients of a detection reply. The requester always gets the
    /// correlated reply. When the request names a known room, the other
    /// members get a copy of a result without its request id; errors stay
    /// with the requester.
    pub fn route_detection(&self, conn: ConnId, room_id: Option<&str>, reply: SignalingMessage) -> Vec<Delivery> {
        let mut deliveries = vec![Delivery::new(conn, reply.clone())];
        if let SignalingMessage::DetectionResult { label, confidence, .. } = reply {
            if let Some(room_id) = room_id.filter(|id| self.rooms.contains(id)) {
                deliveries.extend(self.rooms.others(conn, room_id).into_iter().map(|member| {
                    Delivery::new(
                        member,
                        SignalingMessage::DetectionResult {
                            label: label.clone(),
                            confidence,
                            request_id: None,
                        },
                    )
                }));
            }
        }
        deliveries
    }

    /// Connection closed: leave every room and notify the rest
    pub fn disconnect(&mut self, conn: ConnId) -> Vec<Delivery> {
        self.rooms
            .leave(conn)
            .into_iter()
            .map(|member| Delivery::new(member, SignalingMessage::PeerDisconnected {}))
            .collect()
    }

    fn relay(&self, conn: ConnId, message: SignalingMessage) -> Vec<Delivery> {
        let Some(room_id) = message.room_id().filter(|id| self.rooms.contains(id)) else {
            debug!("Dropping {} from conn {}: unknown room", message.kind(), conn);
            return Vec::new();
        };

        let targets = self.rooms.others(conn, room_id);
        info!("{} forwarded in room {} to {} peer(s)", message.kind(), room_id, targets.len());
        targets
            .into_iter()
            .map(|member| Delivery::new(member, message.clone()))
            .collect()
    }
}
