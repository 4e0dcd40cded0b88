//! Room registry of the rendezvous server

use log::info;
use std::collections::HashMap;

/// Server-side connection identifier
pub type ConnId = u64;

/// Length of issued room ids
pub const ROOM_ID_LEN: usize = 8;

#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Vec<ConnId>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn members(&self, room_id: &str) -> &[ConnId] {
        self.rooms.get(room_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Open a room with `conn` as its only member
    pub fn create(&mut self, conn: ConnId) -> String {
        let room_id = loop {
            let candidate: String = uuid::Uuid::new_v4()
                .simple()
                .to_string()
                .chars()
                .take(ROOM_ID_LEN)
                .collect();
            if !self.rooms.contains_key(&candidate) {
                break candidate;
            }
        };

        self.rooms.insert(room_id.clone(), vec![conn]);
        info!("Room created: {} (conn {})", room_id, conn);
        room_id
    }

    /// Add `conn` to an existing room. Returns false for unknown rooms.
    pub fn join(&mut self, conn: ConnId, room_id: &str) -> bool {
        match self.rooms.get_mut(room_id) {
            Some(members) => {
                if !members.contains(&conn) {
                    members.push(conn);
                }
                info!("Conn {} joined room {}", conn, room_id);
                true
            }
            None => false,
        }
    }

    /// Members of `room_id` other than `conn`
    pub fn others(&self, conn: ConnId, room_id: &str) -> Vec<ConnId> {
        self.members(room_id).iter().copied().filter(|&c| c != conn).collect()
    }

    /// Remove `conn` from every room. Empty rooms are deleted; returns the
    /// remaining members to notify.
    pub fn leave(&mut self, conn: ConnId) -> Vec<ConnId> {
        let mut notify = Vec::new();
        self.rooms.retain(|room_id, members| {
            let before = members.len();
            members.retain(|&c| c != conn);
            if members.len() == before {
                return true;
            }
            info!("Conn {} left room {}", conn, room_id);
            notify.extend(members.iter().copied());
            !members.is_empty()
        });
        notify
    }
}
