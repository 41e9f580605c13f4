//! Session configuration.
//!
//! Cache keys for the client's persisted fields, default content, sync
//! timing knobs, and the client id bootstrap. The client id identifies a
//! device in `updatedBy` stamps; it is generated once and reused from the
//! cache on later sessions.

use std::time::Duration;

use uuid::Uuid;

use crate::cache::LocalCache;

/// Cache keys for each persisted field.
pub mod cache_keys {
    pub const PLAYER_A: &str = "parlor_player_a_v1";
    pub const PLAYER_B: &str = "parlor_player_b_v1";
    pub const SELF_SIDE: &str = "parlor_self_side_v1";
    pub const DECK_TEXT: &str = "parlor_deck_text_v1";
    pub const CHAT: &str = "parlor_chat_v1";
    pub const ROOM_ID: &str = "parlor_room_id_v1";
    pub const CLIENT_ID: &str = "parlor_client_id_v1";
}

/// Default player names before anyone types one in.
pub const DEFAULT_PLAYER_A: &str = "Me";
pub const DEFAULT_PLAYER_B: &str = "You";

/// Starter prompt deck, one prompt per line.
pub const DEFAULT_DECK_TEXT: &str = "\
Share one small thing that made you happy recently
Name one thing you want to go do right now
Describe a little habit of yours
Tell the story of your most memorable trip
Name your favorite film or series
Share something you regretted recently (skip if you'd rather not)
Tell a funny story from your childhood
Give the other player a sincere compliment
Describe how your ideal day would go
Name one skill you most want to learn";

/// Timing and endpoint configuration for a [`crate::sync_client::RoomSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Full URL of the room endpoint, e.g. `https://host/room`.
    pub base_url: String,
    /// Quiet window before a local change is pushed; rapid edits coalesce.
    pub push_debounce: Duration,
    /// Interval between periodic pulls once a room is joined.
    pub poll_interval: Duration,
    /// Pause between the join push and the follow-up pull, giving the server
    /// merge a moment to land.
    pub join_settle: Duration,
}

impl SessionConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            push_debounce: Duration::from_millis(350),
            poll_interval: Duration::from_millis(1200),
            join_settle: Duration::from_millis(80),
        }
    }
}

fn is_valid_client_id(id: &str) -> bool {
    (6..=80).contains(&id.len())
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Reuse the cached client id when it is well-formed, otherwise generate and
/// cache a fresh one.
pub fn ensure_client_id(cache: &dyn LocalCache) -> String {
    if let Some(existing) = cache.get(cache_keys::CLIENT_ID) {
        if is_valid_client_id(&existing) {
            return existing;
        }
    }
    let id = format!("c_{}", Uuid::new_v4().simple());
    cache.set(cache_keys::CLIENT_ID, &id);
    id
}
