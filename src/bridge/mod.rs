//! ServiceBridge (C9, §4.9): translates internal service events into
//! TopicRouter broadcasts. Owns no business logic — a pure translation
//! layer, the way the teacher's `UnifiedEventBroadcaster`
//! (`services/event_broadcaster.rs`) fans one upstream event out to its
//! WebSocket and SSE sinks. Generalized here from "alert/trade/stats event
//! to room broadcast" to the market/token/wallet/settings event surface in
//! §4.9, and from a direct method-call API to bounded `mpsc` channels so a
//! slow or wedged bridge surfaces backpressure instead of piling up
//! unboundedly (§9: "a full buffer surfaces a back-pressure signal instead
//! of silently growing unbounded").

use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::protocol::{ServerFrame, TopicKey};
use crate::topics::TopicRouter;

/// One event crossing from a non-WebSocket service into the hub (§4.9).
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    /// Full token-list refresh → TOKEN_DATA to `market.tokens`, and
    /// optionally MARKET_DATA to `market.summary`.
    MarketRefresh {
        tokens: Value,
        summary: Option<Value>,
    },
    /// Single-token update → TOKEN_UPDATE to `token.<symbol-lower>`.
    TokenUpdate { symbol: String, data: Value },
    /// Wallet account change from the chain client → WALLET_UPDATE to
    /// `wallet.<addr>`.
    WalletAccountChange { wallet: String, data: Value },
    /// Settings row changed outside the admin COMMAND path (e.g. a
    /// migration or an out-of-band tool) → SETTING_UPDATE to both
    /// `settings.<key>` and `settings.<category>`.
    SettingUpdate {
        key: String,
        category: String,
        data: Value,
    },
}

/// Sending half handed to the background services that produce events.
/// Cloned freely; the bridge task owns the single receiving half.
#[derive(Clone)]
pub struct ServiceBridgeHandle {
    tx: mpsc::Sender<ServiceEvent>,
}

impl ServiceBridgeHandle {
    /// Never blocks the caller: a full channel is dropped and logged
    /// rather than awaited, since upstream services must not be able to
    /// stall on a wedged bridge (§4.9: "a failure in the bridge is logged
    /// and does not cascade to connected clients").
    pub fn publish(&self, event: ServiceEvent) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(event) {
            warn!("service bridge channel full, dropping event");
        }
    }
}

/// The translation layer itself. `run` drives the channel-to-broadcast
/// loop and is what `main.rs` supervises with the restart-with-backoff
/// policy from §7.
pub struct ServiceBridge {
    topics: Arc<TopicRouter>,
    restarts: AtomicU32,
}

impl ServiceBridge {
    /// Returns the bridge plus the sender half upstream services publish
    /// through. The channel is bounded at `capacity` (§9).
    pub fn new(topics: Arc<TopicRouter>, capacity: usize) -> (Arc<Self>, ServiceBridgeHandle, mpsc::Receiver<ServiceEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Arc::new(ServiceBridge {
                topics,
                restarts: AtomicU32::new(0),
            }),
            ServiceBridgeHandle { tx },
            rx,
        )
    }

    fn translate(&self, event: ServiceEvent) {
        match event {
            ServiceEvent::MarketRefresh { tokens, summary } => {
                self.topics.broadcast(
                    &TopicKey::parse("market.tokens"),
                    ServerFrame::named("TOKEN_DATA", "market.tokens", tokens),
                );
                if let Some(summary) = summary {
                    self.topics.broadcast(
                        &TopicKey::parse("market.summary"),
                        ServerFrame::named("MARKET_DATA", "market.summary", summary),
                    );
                }
            }
            ServiceEvent::TokenUpdate { symbol, data } => {
                let topic = TopicKey::parse(&format!("token.{}", symbol.to_lowercase()));
                self.topics
                    .broadcast(&topic, ServerFrame::named("TOKEN_UPDATE", topic.as_str(), data));
            }
            ServiceEvent::WalletAccountChange { wallet, data } => {
                let topic = TopicKey::parse(&format!("wallet.{wallet}"));
                self.topics
                    .broadcast(&topic, ServerFrame::named("WALLET_UPDATE", topic.as_str(), data));
            }
            ServiceEvent::SettingUpdate { key, category, data } => {
                let key_topic = TopicKey::parse(&format!("settings.{key}"));
                let category_topic = TopicKey::parse(&format!("settings.{category}"));
                self.topics.broadcast(
                    &key_topic,
                    ServerFrame::named("SETTING_UPDATE", key_topic.as_str(), data.clone()),
                );
                self.topics.broadcast(
                    &category_topic,
                    ServerFrame::named("SETTING_UPDATE", category_topic.as_str(), data),
                );
            }
        }
    }

    /// Drains `rx` until the channel closes, catching any panic out of a
    /// single `translate` call so one malformed event can't take the
    /// whole bridge down with it (§7: "contained to their goroutine/task
    /// and trigger a restart of that subsystem after a 1 s backoff,
    /// bounded to 10 restarts in 5 min before the process exits"). The
    /// restart budget is tracked per sliding `window`, reset once it
    /// elapses without exceeding `budget`.
    pub async fn run_supervised(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<ServiceEvent>,
        backoff: Duration,
        budget: u32,
        window: Duration,
    ) {
        let mut window_start = tokio::time::Instant::now();
        while let Some(event) = rx.recv().await {
            let bridge = self.clone();
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                bridge.translate(event);
            }));

            if outcome.is_err() {
                error!("service bridge translation panicked");
                if window_start.elapsed() > window {
                    window_start = tokio::time::Instant::now();
                    self.restarts.store(0, Ordering::Relaxed);
                }
                let count = self.restarts.fetch_add(1, Ordering::Relaxed) + 1;
                if count > budget {
                    error!(restarts = count, "service bridge exceeded restart budget, giving up");
                    return;
                }
                tokio::time::sleep(backoff).await;
            }
        }
        info!("service bridge channel closed, stopping");
    }
}
