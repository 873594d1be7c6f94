//! SettingsService (§4.5 settings.*, §3 SettingsEntry): the admin-writable
//! configuration table, its in-memory mirror, and the COMMAND handler that
//! keeps the two consistent before acknowledging.
//!
//! Grounded on the teacher's `services/settings_service.rs`
//! (load-on-start, single-writer update-then-broadcast pattern), narrowed to
//! the one admin write path §4.5 describes.

use dashmap::DashMap;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::errors::{AuthError, HubError};
use crate::hub::ConnectionHandle;
use crate::models::SettingsEntry;
use crate::protocol::{ServerFrame, TopicKey};
use crate::topics::TopicRouter;

pub struct SettingsService {
    pool: PgPool,
    entries: DashMap<String, SettingsEntry>,
}

impl SettingsService {
    pub fn new(pool: PgPool) -> Self {
        SettingsService {
            pool,
            entries: DashMap::new(),
        }
    }

    /// Loads the full table into the in-memory mirror. Called once at
    /// startup, before any `settings.*` subscription can be authorized.
    pub async fn load(&self) -> Result<(), sqlx::Error> {
        let rows: Vec<SettingsEntry> =
            sqlx::query_as("SELECT key, value, description, updated_at, updated_by FROM settings")
                .fetch_all(&self.pool)
                .await?;
        for row in rows {
            self.entries.insert(row.key.clone(), row);
        }
        info!(count = self.entries.len(), "settings loaded");
        Ok(())
    }

    /// `settings.<key>` and `settings.<category>` snapshot contents (§4.5).
    pub fn cached_snapshot(&self, scope: &str) -> serde_json::Value {
        if let Some(entry) = self.entries.get(scope) {
            return serde_json::json!(entry.value());
        }
        let category: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.category() == scope)
            .map(|e| e.value().clone())
            .collect();
        serde_json::json!(category)
    }

    /// COMMAND on a `settings.<key>` topic (§4.4, §4.5): admin/superadmin
    /// only. Writes the store, updates the in-memory mirror, and broadcasts
    /// SETTING_UPDATE to both the key and category topics before returning —
    /// the cache equals the store by the time the caller's acknowledgment
    /// is sent. Returns the key that was applied, for the caller's
    /// ACKNOWLEDGMENT (§8 scenario 5).
    pub async fn handle_command(
        &self,
        conn: &Arc<ConnectionHandle>,
        topic: &str,
        key: Option<String>,
        value: Option<serde_json::Value>,
        topics: &Arc<TopicRouter>,
    ) -> Result<String, HubError> {
        if !conn.principal.role.is_admin() {
            return Err(HubError::Auth(AuthError::RequiresAdmin));
        }

        let topic_key = TopicKey::parse(topic);
        if topic_key.namespace() != "settings" {
            return Err(HubError::BadRequest(format!("COMMAND not supported on topic {topic}")));
        }

        let setting_key = key.unwrap_or_else(|| topic_key.scope().to_string());
        let value = value.ok_or_else(|| HubError::BadRequest("COMMAND missing value".to_string()))?;

        let row: SettingsEntry = sqlx::query_as(
            r#"INSERT INTO settings (key, value, updated_at, updated_by)
               VALUES ($1, $2, NOW(), $3)
               ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW(), updated_by = EXCLUDED.updated_by
               RETURNING key, value, description, updated_at, updated_by"#,
        )
        .bind(&setting_key)
        .bind(&value)
        .bind(&conn.principal.wallet_address)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| HubError::BadRequest(e.to_string()))?;

        let category = row.category().to_string();
        self.entries.insert(setting_key.clone(), row.clone());

        topics.broadcast(
            &TopicKey::parse(&format!("settings.{setting_key}")),
            ServerFrame::named("SETTING_UPDATE", format!("settings.{setting_key}"), serde_json::json!(row)),
        );
        topics.broadcast(
            &TopicKey::parse(&format!("settings.{category}")),
            ServerFrame::named("SETTING_UPDATE", format!("settings.{category}"), serde_json::json!(row)),
        );

        info!(key = %setting_key, admin = %conn.principal.wallet_address, "setting updated");
        Ok(setting_key)
    }
}
