//! Data model for Parlor rooms.
//!
//! The synchronized unit is the [`RoomDocument`]: four independently stamped
//! sub-fields (players, deck, chat, draw) plus a document-level stamp that is
//! informational only — per-field stamps govern every merge decision.
//! All timestamps are wall-clock milliseconds; wire names are camelCase.

use serde::{Deserialize, Serialize};

/// Which seat a participant occupies. Ordering (A before B) is part of the
/// chat tie-break and must stay stable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum PlayerSide {
    A,
    B,
}

impl PlayerSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerSide::A => "A",
            PlayerSide::B => "B",
        }
    }

    /// Parse "A"/"B"; anything else is not a side.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "A" => Some(PlayerSide::A),
            "B" => Some(PlayerSide::B),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlayerSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chat message.
///
/// Identity for deduplication is the client-assigned `id` when present,
/// otherwise the `(ts, side, text)` composite — see [`crate::chat::chat_key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub id: String,
    pub side: PlayerSide,
    pub text: String,
    pub ts: i64,
}

/// The participant a draw landed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawPlayer {
    pub side: PlayerSide,
    pub name: String,
}

/// A successful prompt draw. `ok` is always true on the wire; documents carry
/// only successful draws.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawResult {
    pub ok: bool,
    pub player: Option<DrawPlayer>,
    pub text: String,
    pub ts: i64,
    pub id: String,
    pub by: String,
}

/// Both player names. They travel together as one field: a change to either
/// name re-stamps the whole sub-object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayersField {
    pub a: String,
    pub b: String,
    pub updated_at: i64,
    pub updated_by: String,
}

/// The full prompt deck as newline-delimited text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckField {
    pub text: String,
    pub updated_at: i64,
    pub updated_by: String,
}

/// The chat log. Unlike the other fields this one is merged, never
/// overwritten; its stamp is bookkeeping, not a merge gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatField {
    pub items: Vec<ChatMessage>,
    pub updated_at: i64,
    pub updated_by: String,
}

/// The most recent successful draw, or none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawField {
    pub last: Option<DrawResult>,
    pub updated_at: i64,
    pub updated_by: String,
}

impl DrawField {
    /// The stored draw, if it is a successful one.
    pub fn ok_last(&self) -> Option<&DrawResult> {
        self.last.as_ref().filter(|d| d.ok)
    }

    /// Timestamp of the stored successful draw, 0 when absent.
    pub fn ok_ts(&self) -> i64 {
        self.ok_last().map(|d| d.ts).unwrap_or(0)
    }
}

/// Current document schema version.
pub const ROOM_DOCUMENT_VERSION: u32 = 2;

/// The synchronized room document, schema v2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDocument {
    pub v: u32,
    pub updated_at: i64,
    pub updated_by: String,
    pub players: PlayersField,
    pub deck: DeckField,
    pub chat: ChatField,
    pub draw: DrawField,
}

impl RoomDocument {
    /// A valid document with every field empty and every stamp at zero.
    pub fn empty() -> Self {
        Self {
            v: ROOM_DOCUMENT_VERSION,
            updated_at: 0,
            updated_by: String::new(),
            players: PlayersField::default(),
            deck: DeckField::default(),
            chat: ChatField::default(),
            draw: DrawField::default(),
        }
    }
}

impl Default for RoomDocument {
    fn default() -> Self {
        Self::empty()
    }
}
