//! TopicRouter (C5, §4.5): the subscription graph, its authorization
//! predicates, snapshot-on-subscribe, and periodic refreshers.
//!
//! Grounded on the teacher's `WsConnectionManager::broadcast_to_room`
//! (`routes/websocket.rs`) — read-lock-copy-then-send, never holding the
//! lock across the send — generalized from the single `room_slug`
//! namespace into the full topic predicate table below. `DashMap`/`DashSet`
//! give each topic its own lock instead of one `RwLock` over the whole
//! table (§5).

use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::cache::CacheService;
use crate::errors::{HubError, TopicError};
use crate::hub::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use crate::models::Role;
use crate::notifications::NotificationDeliverer;
use crate::protocol::{Outbound, ServerFrame, TopicKey};
use crate::rooms::RoomManager;
use crate::settings::SettingsService;
use sqlx::PgPool;

pub struct TopicRouter {
    subscribers: DashMap<TopicKey, DashSet<ConnectionId>>,
    registry: ConnectionRegistry,
    pool: PgPool,
    cache: Arc<CacheService>,
    rooms: Arc<RoomManager>,
    notifications: Arc<NotificationDeliverer>,
    settings: Arc<SettingsService>,
}

impl TopicRouter {
    pub fn new(
        registry: ConnectionRegistry,
        pool: PgPool,
        cache: Arc<CacheService>,
        rooms: Arc<RoomManager>,
        notifications: Arc<NotificationDeliverer>,
        settings: Arc<SettingsService>,
    ) -> Self {
        TopicRouter {
            subscribers: DashMap::new(),
            registry,
            pool,
            cache,
            rooms,
            notifications,
            settings,
        }
    }

    /// Authorization predicate table (§4.5). `contest.<id>`/`room.<id>`
    /// require a DB-backed participation check — admin bypasses it, but a
    /// merely-authenticated non-participant does not pass.
    async fn authorized(&self, conn: &ConnectionHandle, key: &TopicKey) -> bool {
        match key.namespace() {
            "market" | "token" => true,
            "contest" | "room" => {
                if conn.principal.role.is_admin() {
                    return true;
                }
                if conn.principal.is_anonymous() {
                    return false;
                }
                let Ok(contest_id) = key.scope().parse::<i64>() else {
                    return false;
                };
                self.rooms
                    .is_participant(contest_id, &conn.principal.wallet_address)
                    .await
                    .unwrap_or(false)
            }
            "wallet" => key.scope() == conn.principal.wallet_address,
            "notifications" => key.scope() == conn.principal.wallet_address,
            "settings" => conn.principal.role.is_admin(),
            _ => false,
        }
    }

    /// Subscribes `conn` to `key` and returns the snapshot frame to send.
    /// The caller (Hub) is responsible for sending its own ACKNOWLEDGMENT
    /// first — §8 scenario 1 requires ACKNOWLEDGMENT before the snapshot,
    /// so this never sends the snapshot itself; it only hands it back.
    pub async fn subscribe(&self, conn: &Arc<ConnectionHandle>, key: TopicKey) -> Result<ServerFrame, HubError> {
        if !self.authorized(conn, &key).await {
            return Err(HubError::Topic(TopicError::Denied(key.as_str().to_string())));
        }

        self.subscribers
            .entry(key.clone())
            .or_insert_with(DashSet::new)
            .insert(conn.id);
        conn.subscriptions.insert(key.clone());

        let snapshot = self.build_snapshot(conn, &key).await?;
        Ok(ServerFrame::named(event_for(&key), key.as_str().to_string(), snapshot))
    }

    pub async fn unsubscribe(&self, conn: &Arc<ConnectionHandle>, key: &TopicKey) {
        if let Some(set) = self.subscribers.get(key) {
            set.remove(&conn.id);
        }
        conn.subscriptions.remove(key);
    }

    /// REQUEST (§4.4): returns the same data a SUBSCRIBE snapshot would,
    /// without creating a subscription. Requires the same predicate.
    pub async fn snapshot(&self, conn: &Arc<ConnectionHandle>, key: &TopicKey) -> Result<serde_json::Value, HubError> {
        if !self.authorized(conn, key).await {
            return Err(HubError::Topic(TopicError::Denied(key.as_str().to_string())));
        }
        self.build_snapshot(conn, key).await
    }

    async fn build_snapshot(&self, conn: &ConnectionHandle, key: &TopicKey) -> Result<serde_json::Value, HubError> {
        match key.namespace() {
            "market" => self.market_snapshot().await,
            "token" => self.token_snapshot(key.scope()).await,
            "contest" => self.contest_snapshot(key.scope()).await,
            "room" => {
                let contest_id: i64 = key.scope().parse().unwrap_or(0);
                Ok(self.rooms.snapshot(contest_id))
            }
            "wallet" => self.wallet_snapshot(key.scope()).await,
            "notifications" => self
                .notifications
                .unread_for_wallet(key.scope())
                .await
                .map_err(HubError::from),
            "settings" => Ok(self.settings.cached_snapshot(key.scope())),
            _ => Ok(serde_json::json!({})),
        }
    }

    async fn market_snapshot(&self) -> Result<serde_json::Value, HubError> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT symbol, data::text FROM token_snapshots")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| HubError::BadRequest(e.to_string()))?;
        let tokens: Vec<serde_json::Value> = rows
            .into_iter()
            .filter_map(|(_, json)| serde_json::from_str(&json).ok())
            .collect();
        Ok(serde_json::json!(tokens))
    }

    async fn token_snapshot(&self, symbol: &str) -> Result<serde_json::Value, HubError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT data::text FROM token_snapshots WHERE symbol = $1")
                .bind(symbol)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| HubError::BadRequest(e.to_string()))?;
        Ok(row
            .and_then(|(j,)| serde_json::from_str(&j).ok())
            .unwrap_or_else(|| serde_json::json!({ "symbol": symbol })))
    }

    async fn contest_snapshot(&self, scope: &str) -> Result<serde_json::Value, HubError> {
        let contest_id: i64 = scope.parse().unwrap_or(0);
        let contest: Option<(i64, String)> =
            sqlx::query_as("SELECT id, status FROM contests WHERE id = $1")
                .bind(contest_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| HubError::BadRequest(e.to_string()))?;

        let leaderboard: Vec<(String, i64, String)> = sqlx::query_as(
            "SELECT wallet_address, rank, score::text FROM leaderboard_entries WHERE contest_id = $1 ORDER BY rank ASC LIMIT 100",
        )
        .bind(contest_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HubError::BadRequest(e.to_string()))?;

        Ok(serde_json::json!({
            "contestId": contest_id,
            "status": contest.map(|(_, s)| s),
            "leaderboard": leaderboard.into_iter().map(|(wallet, rank, score)| serde_json::json!({
                "wallet": wallet, "rank": rank, "score": score,
            })).collect::<Vec<_>>(),
        }))
    }

    async fn wallet_snapshot(&self, wallet: &str) -> Result<serde_json::Value, HubError> {
        let balance = self.cache.get_balance(wallet).await.map_err(|_| HubError::Cache(crate::errors::CacheError::FetchFailed(wallet.to_string())))?;
        let transactions = self
            .cache
            .get_recent_transactions(wallet, None)
            .await
            .map_err(|_| HubError::Cache(crate::errors::CacheError::FetchFailed(wallet.to_string())))?;
        Ok(serde_json::json!({ "balance": balance, "transactions": transactions }))
    }

    /// Broadcasts a frame to every current subscriber of `topic` (§4.5,
    /// §9 ServiceBridge). Copies the subscriber id list under the topic's
    /// own lock, then releases it before touching any Connection's queue.
    pub fn broadcast(&self, topic: &TopicKey, frame: ServerFrame) {
        let ids: Vec<ConnectionId> = match self.subscribers.get(topic) {
            Some(set) => set.iter().map(|id| *id).collect(),
            None => return,
        };
        for id in ids {
            if let Some(conn) = self.registry.get(id) {
                conn.send(Outbound::best_effort(frame.clone()));
            }
        }
    }

    /// Same as `broadcast` but restricted to admin-role subscribers
    /// (§4.5: wallet metrics refresh "to admin-role subscribers only").
    pub fn broadcast_to_admins(&self, topic: &TopicKey, frame: ServerFrame) {
        let ids: Vec<ConnectionId> = match self.subscribers.get(topic) {
            Some(set) => set.iter().map(|id| *id).collect(),
            None => return,
        };
        for id in ids {
            if let Some(conn) = self.registry.get(id) {
                if conn.principal.role.is_admin() {
                    conn.send(Outbound::best_effort(frame.clone()));
                }
            }
        }
    }

    pub fn subscriber_count(&self, topic: &TopicKey) -> usize {
        self.subscribers.get(topic).map(|s| s.len()).unwrap_or(0)
    }

    pub fn topic_cardinalities(&self) -> Vec<(String, usize)> {
        self.subscribers
            .iter()
            .map(|e| (e.key().as_str().to_string(), e.value().len()))
            .collect()
    }

    fn contest_topics_with_subscribers(&self) -> Vec<i64> {
        self.subscribers
            .iter()
            .filter(|e| e.key().namespace() == "contest" && !e.value().is_empty())
            .filter_map(|e| e.key().scope().parse().ok())
            .collect()
    }

    fn wallet_topics_with_subscribers(&self) -> Vec<String> {
        self.subscribers
            .iter()
            .filter(|e| e.key().namespace() == "wallet" && !e.value().is_empty())
            .map(|e| e.key().scope().to_string())
            .collect()
    }

    /// Periodic refresher (§4.5): contest state + leaderboard every 5s
    /// while at least one subscriber is present.
    pub async fn run_contest_refresher(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for contest_id in self.contest_topics_with_subscribers() {
                let topic = TopicKey::parse(&format!("contest.{contest_id}"));
                match self.contest_snapshot(&contest_id.to_string()).await {
                    Ok(data) => {
                        self.broadcast(&topic, ServerFrame::named("CONTEST_UPDATED", topic.as_str(), data.clone()));
                        self.broadcast(&topic, ServerFrame::named("LEADERBOARD_UPDATED", topic.as_str(), data));
                    }
                    Err(e) => warn!(contest_id, error = %e, "contest refresh failed"),
                }
            }
        }
    }

    /// Periodic refresher (§4.5): wallet metrics every 5s, admins only.
    pub async fn run_wallet_metrics_refresher(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for wallet in self.wallet_topics_with_subscribers() {
                let topic = TopicKey::parse(&format!("wallet.{wallet}"));
                if let Ok(balance) = self.cache.get_balance(&wallet).await {
                    self.broadcast_to_admins(
                        &topic,
                        ServerFrame::named("SERVICE_METRICS", topic.as_str(), serde_json::json!({ "wallet": wallet, "balance": balance })),
                    );
                }
            }
        }
    }
}

fn event_for(key: &TopicKey) -> &'static str {
    match key.namespace() {
        "market" => "TOKEN_DATA",
        "token" => "TOKEN_UPDATE",
        "contest" => "CONTEST_UPDATED",
        "room" => "ROOM_STATE",
        "wallet" => "WALLET_STATE",
        "notifications" => "UNREAD_NOTIFICATIONS",
        "settings" => "SETTING_UPDATE",
        _ => "DATA",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_name_matches_namespace() {
        assert_eq!(event_for(&TopicKey::parse("market.tokens")), "TOKEN_DATA");
        assert_eq!(event_for(&TopicKey::parse("wallet.abc")), "WALLET_STATE");
    }
}
