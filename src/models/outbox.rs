use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// §3 OutboxEntry. Durable, owned by an external writer; this core only
/// reads it and flips `delivered`/`read`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OutboxEntry {
    pub id: i64,
    pub wallet_address: String,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
}

/// The four kinds the deliverer polls for (§4.7). Unknown DB values are
/// never produced by this core but are tolerated on read via `FromStr`'s
/// fallback, since the table is owned externally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxKind {
    LevelUp,
    AchievementUnlock,
    ContestInvite,
    SystemAnnouncement,
}

impl OutboxKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxKind::LevelUp => "LEVEL_UP",
            OutboxKind::AchievementUnlock => "ACHIEVEMENT_UNLOCK",
            OutboxKind::ContestInvite => "CONTEST_INVITE",
            OutboxKind::SystemAnnouncement => "SYSTEM_ANNOUNCEMENT",
        }
    }

    pub fn all() -> [&'static str; 4] {
        [
            Self::LevelUp.as_str(),
            Self::AchievementUnlock.as_str(),
            Self::ContestInvite.as_str(),
            Self::SystemAnnouncement.as_str(),
        ]
    }
}
