//! Core entities (§3): semantic attributes only, storage representation
//! left to each component's owning module.

pub mod outbox;
pub mod principal;
pub mod room;
pub mod settings;

pub use outbox::{OutboxEntry, OutboxKind};
pub use principal::{Principal, Role};
pub use room::{Participant, Room, RoomState};
pub use settings::SettingsEntry;
