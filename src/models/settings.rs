use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// §3 SettingsEntry. Owned externally; the core caches and broadcasts
/// changes made through its own admin COMMAND handler.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SettingsEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

impl SettingsEntry {
    /// `ui.banner` → `ui` (settings.<category> topic, §4.5).
    pub fn category(&self) -> &str {
        self.key.split_once('.').map(|(c, _)| c).unwrap_or(&self.key)
    }
}
