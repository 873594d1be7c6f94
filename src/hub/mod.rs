//! Hub (C4, §4.4, §5): the connection registry and inbound-frame dispatcher.
//!
//! Grounded on the teacher's `WsConnectionManager` (`routes/websocket.rs`):
//! the same "shared map behind an `Arc`, read-lock-copy-then-send" shape,
//! generalized from one room-keyed broadcast map into the classify-and-route
//! table spanning TopicRouter, RoomManager, NotificationDeliverer, Cache and
//! Settings described in §4.4. `DashMap`/`DashSet` replace the teacher's
//! `Arc<RwLock<HashMap<..>>>` so a broadcast never takes a lock broader than
//! the one topic or connection it touches (§5).

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::bridge::ServiceBridge;
use crate::cache::CacheService;
use crate::diagnostics::Diagnostics;
use crate::errors::{ErrorCode, HubError};
use crate::models::Principal;
use crate::notifications::NotificationDeliverer;
use crate::protocol::{ClientFrame, Outbound, ServerFrame, TopicKey};
use crate::rate_limit::RateLimiter;
use crate::rooms::RoomManager;
use crate::settings::SettingsService;
use crate::topics::TopicRouter;

pub type ConnectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    MarketData,
    Contest,
    Wallet,
    Notifications,
    SystemSettings,
}

impl Endpoint {
    pub fn as_str(self) -> &'static str {
        match self {
            Endpoint::MarketData => "market-data",
            Endpoint::Contest => "contest",
            Endpoint::Wallet => "wallet",
            Endpoint::Notifications => "notifications",
            Endpoint::SystemSettings => "system-settings",
        }
    }
}

/// Why a Connection was closed (§4.1, §4.10 termination-reason history).
#[derive(Debug, Clone)]
pub enum CloseReason {
    Congested,
    ClientClosed,
    ReadError,
    ProtocolViolations,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Congested => "congested",
            CloseReason::ClientClosed => "client_closed",
            CloseReason::ReadError => "read_error",
            CloseReason::ProtocolViolations => "protocol_violations",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// One live WebSocket session (§3 Connection). Owned exclusively by the
/// Hub's registry; `transport` holds the socket halves and drives the loop
/// that reads from `outbound_rx`/`close_rx` on the other end of these
/// channels.
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub principal: Principal,
    pub endpoint: Endpoint,
    pub remote_addr: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_pong_at: AtomicI64,
    pub room: std::sync::RwLock<Option<i64>>,
    pub subscriptions: DashSet<TopicKey>,
    pub dropped: AtomicU64,
    protocol_violations: Mutex<VecDeque<Instant>>,
    outbound: mpsc::Sender<Outbound>,
    close: mpsc::Sender<CloseReason>,
    diagnostics: Arc<Diagnostics>,
}

impl ConnectionHandle {
    /// Best-effort frames are dropped on a full queue (incrementing
    /// `dropped`); durable frames never are — a full queue instead closes
    /// the connection with a "congested" reason, leaving the OutboxEntry
    /// undelivered for the next poll (§4.1).
    pub fn send(&self, out: Outbound) {
        if out.durable {
            if let Err(mpsc::error::TrySendError::Full(_)) = self.outbound.try_send(out) {
                warn!(connection_id = self.id, "durable send congested, closing connection");
                let _ = self.close.try_send(CloseReason::Congested);
            }
        } else if let Err(mpsc::error::TrySendError::Full(_)) = self.outbound.try_send(out) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            self.diagnostics.record_dropped_frame();
        }
    }

    pub fn close(&self, reason: CloseReason) {
        let _ = self.close.try_send(reason);
    }

    pub fn mark_pong(&self) {
        self.last_pong_at.store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    /// Records a protocol violation and returns the count within the
    /// trailing 60s window (§7: "close after >5 in 60s", not a lifetime
    /// total — violations outside the window are evicted before counting).
    pub fn record_protocol_violation(&self) -> u64 {
        let now = Instant::now();
        let cutoff = now - Duration::from_secs(60);
        let mut violations = self.protocol_violations.lock().unwrap();
        while matches!(violations.front(), Some(t) if *t < cutoff) {
            violations.pop_front();
        }
        violations.push_back(now);
        violations.len() as u64
    }
}

/// Shared connection table (§9: "Connections live in a slab keyed by
/// ConnectionId"). Cloned cheaply into every component that needs to reach
/// a connection by id — TopicRouter, RoomManager, NotificationDeliverer.
#[derive(Clone, Default)]
pub struct ConnectionRegistry(Arc<DashMap<ConnectionId, Arc<ConnectionHandle>>>);

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry(Arc::new(DashMap::new()))
    }

    pub fn insert(&self, handle: Arc<ConnectionHandle>) {
        self.0.insert(handle.id, handle);
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.0.remove(&id).map(|(_, v)| v)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.0.get(&id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn count_by_endpoint(&self, endpoint: Endpoint) -> usize {
        self.0.iter().filter(|r| r.endpoint == endpoint).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = Arc<ConnectionHandle>> + '_ {
        self.0.iter().map(|r| r.clone())
    }

    pub fn find_by_wallet(&self, endpoint: Endpoint, wallet: &str) -> Option<Arc<ConnectionHandle>> {
        self.0
            .iter()
            .find(|r| r.endpoint == endpoint && r.principal.wallet_address == wallet)
            .map(|r| r.clone())
    }
}

/// What `transport` needs to construct a `ConnectionHandle` and hand its
/// receiving halves back for the per-connection actor loop to drive.
pub struct NewConnection {
    pub handle: Arc<ConnectionHandle>,
    pub outbound_rx: mpsc::Receiver<Outbound>,
    pub close_rx: mpsc::Receiver<CloseReason>,
}

/// Registry of connections plus dispatch of inbound messages by topic
/// (§4.4). Owns no business logic of its own beyond classification —
/// everything else is delegated to the named component.
#[derive(Clone)]
pub struct Hub {
    registry: ConnectionRegistry,
    next_id: Arc<AtomicU64>,
    pub topics: Arc<TopicRouter>,
    pub rooms: Arc<RoomManager>,
    pub notifications: Arc<NotificationDeliverer>,
    pub cache: Arc<CacheService>,
    pub settings: Arc<SettingsService>,
    pub bridge: Arc<ServiceBridge>,
    pub diagnostics: Arc<Diagnostics>,
    message_limiters: std::collections::HashMap<Endpoint, Arc<RateLimiter>>,
    outbound_queue_capacity: usize,
}

impl Hub {
    /// `registry` must be the same `ConnectionRegistry` handed to
    /// `TopicRouter`, `RoomManager`, and `NotificationDeliverer` — they all
    /// resolve `ConnectionId`s against it to deliver broadcasts, so a
    /// registry constructed separately here would never see a connection
    /// the Hub registers.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: ConnectionRegistry,
        topics: Arc<TopicRouter>,
        rooms: Arc<RoomManager>,
        notifications: Arc<NotificationDeliverer>,
        cache: Arc<CacheService>,
        settings: Arc<SettingsService>,
        bridge: Arc<ServiceBridge>,
        diagnostics: Arc<Diagnostics>,
        message_limiters: std::collections::HashMap<Endpoint, Arc<RateLimiter>>,
        outbound_queue_capacity: usize,
    ) -> Self {
        Hub {
            registry,
            next_id: Arc::new(AtomicU64::new(1)),
            topics,
            rooms,
            notifications,
            cache,
            settings,
            bridge,
            diagnostics,
            message_limiters,
            outbound_queue_capacity,
        }
    }

    pub fn registry(&self) -> ConnectionRegistry {
        self.registry.clone()
    }

    /// Registers a new Connection and returns the receiving halves for the
    /// per-connection actor loop to own.
    pub fn register(
        &self,
        principal: Principal,
        endpoint: Endpoint,
        remote_addr: Option<String>,
    ) -> NewConnection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_queue_capacity);
        let (close_tx, close_rx) = mpsc::channel(1);

        let handle = Arc::new(ConnectionHandle {
            id,
            principal,
            endpoint,
            remote_addr,
            connected_at: Utc::now(),
            last_pong_at: AtomicI64::new(Utc::now().timestamp()),
            room: std::sync::RwLock::new(None),
            subscriptions: DashSet::new(),
            dropped: AtomicU64::new(0),
            protocol_violations: Mutex::new(VecDeque::new()),
            outbound: outbound_tx,
            close: close_tx,
            diagnostics: self.diagnostics.clone(),
        });

        self.registry.insert(handle.clone());
        self.diagnostics
            .record_upgrade(endpoint.as_str(), handle.remote_addr.clone(), !handle.principal.is_anonymous());
        info!(connection_id = id, endpoint = endpoint.as_str(), "connection registered");

        NewConnection {
            handle,
            outbound_rx,
            close_rx,
        }
    }

    /// Drops a Connection from every topic set and the registry (§3:
    /// "subscriptions are dropped when the Connection closes, atomically
    /// with connection removal" — from the registry's point of view this
    /// is synchronous: the topic sets are cleared before the id is freed
    /// for reuse by never being reused at all, since ids are monotonic).
    pub async fn unregister(&self, id: ConnectionId, reason: &str) {
        if let Some(handle) = self.registry.remove(id) {
            let topics: Vec<TopicKey> = handle.subscriptions.iter().map(|t| t.clone()).collect();
            for topic in &topics {
                self.topics.unsubscribe(&handle, topic).await;
            }
            let room = *handle.room.read().unwrap();
            if let Some(contest_id) = room {
                self.rooms.leave(&handle, contest_id).await;
            }
            self.diagnostics
                .record_termination(id, handle.endpoint.as_str(), reason);
            info!(connection_id = id, reason, "connection unregistered");
        }
    }

    /// GET_WEBSOCKET_DIAGNOSTICS (§4.10): admin/superadmin only.
    pub fn diagnostics_snapshot(
        &self,
        conn: &ConnectionHandle,
    ) -> Result<crate::diagnostics::DiagnosticsSnapshot, HubError> {
        if !conn.principal.role.is_admin() {
            return Err(HubError::Auth(crate::errors::AuthError::RequiresAdmin));
        }
        let per_endpoint = [
            Endpoint::MarketData,
            Endpoint::Contest,
            Endpoint::Wallet,
            Endpoint::Notifications,
            Endpoint::SystemSettings,
        ]
        .into_iter()
        .map(|e| (e.as_str().to_string(), self.registry.count_by_endpoint(e)))
        .collect();

        Ok(self.diagnostics.snapshot(
            self.registry.len(),
            per_endpoint,
            self.topics.topic_cardinalities(),
        ))
    }

    /// Classifies and dispatches one inbound frame (§4.4). Returns the
    /// typed error the caller should report as an ERROR frame, if any.
    pub async fn on_frame(
        &self,
        conn: &Arc<ConnectionHandle>,
        frame: ClientFrame,
    ) -> Result<Option<ServerFrame>, HubError> {
        if !matches!(frame, ClientFrame::Ping { .. }) {
            let limiter = self
                .message_limiters
                .get(&conn.endpoint)
                .expect("a RateLimiter is configured for every Endpoint");
            if !limiter.check(&limiter_key(conn)).await {
                return Err(HubError::RateLimited);
            }
        }

        match frame {
            ClientFrame::Ping { timestamp } => Ok(Some(ServerFrame::Pong { timestamp })),
            ClientFrame::Subscribe { topic, request_id } => {
                let key = TopicKey::parse(&topic);
                let snapshot = self.topics.subscribe(conn, key.clone()).await?;
                // §8 scenario 1: the client must see ACKNOWLEDGMENT before
                // the snapshot. `conn.send` enqueues synchronously, so
                // sending the ack here and returning the snapshot for the
                // caller to send next preserves that order on the wire.
                conn.send(Outbound::best_effort(ServerFrame::Acknowledgment {
                    topic: Some(key.as_str().to_string()),
                    request_id,
                    data: serde_json::json!({ "subscribed": true }),
                }));
                Ok(Some(snapshot))
            }
            ClientFrame::Unsubscribe { topic } => {
                let key = TopicKey::parse(&topic);
                self.topics.unsubscribe(conn, &key).await;
                Ok(Some(ServerFrame::Acknowledgment {
                    topic: Some(key.as_str().to_string()),
                    request_id: None,
                    data: serde_json::json!({ "unsubscribed": true }),
                }))
            }
            ClientFrame::Request { topic, request_id, .. } => {
                let key = TopicKey::parse(&topic);
                let snapshot = self.topics.snapshot(conn, &key).await?;
                Ok(Some(ServerFrame::Acknowledgment {
                    topic: Some(key.as_str().to_string()),
                    request_id,
                    data: snapshot,
                }))
            }
            ClientFrame::Command { topic, key, value } => {
                if topic == "diagnostics" {
                    let snapshot = self.diagnostics_snapshot(conn)?;
                    return Ok(Some(ServerFrame::named(
                        "WEBSOCKET_DIAGNOSTICS",
                        "admin.diagnostics",
                        serde_json::json!(snapshot),
                    )));
                }
                let applied_key = self
                    .settings
                    .handle_command(conn, &topic, key, value, &self.topics)
                    .await?;
                Ok(Some(ServerFrame::Acknowledgment {
                    topic: Some(topic),
                    request_id: None,
                    data: serde_json::json!({ "key": applied_key, "success": true }),
                }))
            }
            ClientFrame::JoinRoom { contest_id } => {
                self.rooms.join(conn, contest_id).await.map_err(HubError::Room)?;
                Ok(None)
            }
            ClientFrame::LeaveRoom { contest_id } => {
                self.rooms.leave(conn, contest_id).await;
                Ok(None)
            }
            ClientFrame::SendChatMessage { contest_id, text } => {
                self.rooms.send_chat(conn, contest_id, text).await?;
                Ok(None)
            }
            ClientFrame::ParticipantActivity { contest_id, data } => {
                self.rooms.relay_activity(conn, contest_id, data).await?;
                Ok(None)
            }
            ClientFrame::MarkRead { id } => {
                self.notifications.mark_read(conn, id).await?;
                Ok(None)
            }
            ClientFrame::GetUnread => {
                let unread = self.notifications.get_unread(conn).await?;
                Ok(Some(ServerFrame::named(
                    "UNREAD_NOTIFICATIONS",
                    format!("notifications.{}", conn.principal.wallet_address),
                    serde_json::json!({ "entries": unread }),
                )))
            }
        }
    }

    pub fn error_code_for(&self, err: &HubError) -> ErrorCode {
        err.code()
    }
}

fn limiter_key(conn: &ConnectionHandle) -> String {
    if conn.principal.is_anonymous() {
        format!("anon:{}", conn.id)
    } else {
        conn.principal.wallet_address.clone()
    }
}
