use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::hub::ConnectionId;

/// Per-member bookkeeping inside a live Room (§3).
#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    pub connection_id: ConnectionId,
    pub wallet_address: String,
    pub nickname: String,
    pub joined_at: DateTime<Utc>,
    pub is_admin: bool,
}

/// {Empty → Live → Empty} (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    Live,
}

/// One per active contest with at least one member. Destroyed by
/// RoomManager when the member set becomes empty.
#[derive(Debug, Clone)]
pub struct Room {
    pub contest_id: i64,
    pub state: RoomState,
    pub members: HashMap<ConnectionId, Participant>,
    pub last_activity: DateTime<Utc>,
}

impl Room {
    pub fn new(contest_id: i64) -> Self {
        Room {
            contest_id,
            state: RoomState::Live,
            members: HashMap::new(),
            last_activity: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
