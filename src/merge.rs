//! Server-side room document merge.
//!
//! Every write re-merges the incoming document with the stored one before
//! persisting, so two clients racing between the store's read and write
//! converge without a lock: `players` and `deck` resolve per sub-object by
//! last-write-wins with ties favoring the incoming write, chat is an identity
//! union, and the draw follows the newer draw timestamp.
//!
//! Merging two valid documents always yields a valid document.

use crate::chat::merge_chat_lists;
use crate::models::{ChatField, RoomDocument, ROOM_DOCUMENT_VERSION};

/// Merge the stored document with an incoming write at server time `now`.
///
/// With nothing stored, the incoming document is adopted as-is apart from the
/// document-level stamp. The document-level `updated_at` is always `now`;
/// only per-field stamps participate in merge decisions.
pub fn merge_room_state(
    existing: Option<&RoomDocument>,
    incoming: RoomDocument,
    now: i64,
) -> RoomDocument {
    let existing = match existing {
        Some(doc) => doc,
        None => {
            let mut created = incoming;
            created.updated_at = now;
            return created;
        }
    };

    let players = if incoming.players.updated_at >= existing.players.updated_at {
        incoming.players
    } else {
        existing.players.clone()
    };

    let deck = if incoming.deck.updated_at >= existing.deck.updated_at {
        incoming.deck
    } else {
        existing.deck.clone()
    };

    let chat_updated_at = match existing.chat.updated_at.max(incoming.chat.updated_at) {
        0 => now,
        stamp => stamp,
    };
    let chat = ChatField {
        items: merge_chat_lists(&existing.chat.items, &incoming.chat.items),
        updated_at: chat_updated_at,
        updated_by: first_non_empty(&incoming.chat.updated_by, &existing.chat.updated_by),
    };

    // Newer successful draw wins; the incoming side wins ties. A side with no
    // successful draw counts as timestamp zero.
    let draw = if incoming.draw.ok_last().is_some() && incoming.draw.ok_ts() >= existing.draw.ok_ts()
    {
        incoming.draw
    } else {
        existing.draw.clone()
    };

    RoomDocument {
        v: ROOM_DOCUMENT_VERSION,
        updated_at: now,
        updated_by: first_non_empty(&incoming.updated_by, &existing.updated_by),
        players,
        deck,
        chat,
        draw,
    }
}

fn first_non_empty(a: &str, b: &str) -> String {
    if a.is_empty() { b } else { a }.to_string()
}
