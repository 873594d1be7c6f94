use serde::{Deserialize, Serialize};

/// Role ordering matters for the `>=` checks TopicRouter and RoomManager
/// perform against admin-only predicates (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
    Superadmin,
}

impl Role {
    pub fn is_admin(self) -> bool {
        self >= Role::Admin
    }

    pub fn from_str(raw: &str) -> Self {
        match raw {
            "superadmin" => Role::Superadmin,
            "admin" => Role::Admin,
            _ => Role::User,
        }
    }
}

/// Identity bound to a Connection for its lifetime (§3). Never mutated by
/// the core; role elevation requires reconnecting (§4.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub wallet_address: String,
    pub user_id: i64,
    pub role: Role,
    pub nickname: String,
}

impl Principal {
    pub fn anonymous() -> Self {
        Principal {
            wallet_address: String::new(),
            user_id: 0,
            role: Role::User,
            nickname: "anonymous".to_string(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.wallet_address.is_empty()
    }
}
