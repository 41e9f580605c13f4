//! Chat log normalization and merge.
//!
//! The chat log is the one append-mostly field in the room document. Two
//! replicas of it are combined by identity union: each message's identity is
//! its client-assigned id when present, otherwise the `(ts, side, text)`
//! composite. The merge is commutative and idempotent, so replicas converge
//! no matter how pulls and pushes interleave.

use std::collections::HashMap;

use serde_json::Value;

use crate::models::{ChatMessage, PlayerSide};
use crate::validation::{clamp_len, MAX_CHAT_ITEMS, MAX_CHAT_TEXT_LENGTH, MAX_ID_LENGTH};

/// The identity key of a message.
///
/// Messages with equal keys are the same message regardless of source;
/// content for a given identity is assumed immutable.
pub fn chat_key(message: &ChatMessage) -> String {
    if message.id.is_empty() {
        format!("t:{}|s:{}|x:{}", message.ts, message.side, message.text)
    } else {
        format!("id:{}", message.id)
    }
}

/// Drop a malformed message, clamp an oversized one.
fn sanitize(message: &ChatMessage) -> Option<ChatMessage> {
    if message.text.is_empty() || message.ts <= 0 {
        return None;
    }
    Some(ChatMessage {
        id: clamp_len(&message.id, MAX_ID_LENGTH),
        side: message.side,
        text: clamp_len(&message.text, MAX_CHAT_TEXT_LENGTH),
        ts: message.ts,
    })
}

fn sort_by_identity(items: &mut [ChatMessage]) {
    items.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| chat_key(a).cmp(&chat_key(b))));
}

fn keep_most_recent(mut items: Vec<ChatMessage>) -> Vec<ChatMessage> {
    if items.len() > MAX_CHAT_ITEMS {
        items.drain(..items.len() - MAX_CHAT_ITEMS);
    }
    items
}

/// Normalize one chat list: drop malformed items, clamp oversized fields,
/// sort by `(ts, identity)` with a lexical tie-break, and keep only the most
/// recent [`MAX_CHAT_ITEMS`] entries.
pub fn normalize_chat_list(items: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut out: Vec<ChatMessage> = items.iter().filter_map(sanitize).collect();
    sort_by_identity(&mut out);
    keep_most_recent(out)
}

/// Merge two chat lists into one.
///
/// Each input is normalized, the two are unioned by identity, and the union
/// is re-sorted and truncated to the most recent [`MAX_CHAT_ITEMS`].
/// `merge(a, b) == merge(b, a)` and `merge(a, a) == normalize(a)`.
pub fn merge_chat_lists(a: &[ChatMessage], b: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut by_key: HashMap<String, ChatMessage> = HashMap::new();
    for item in normalize_chat_list(a) {
        by_key.insert(chat_key(&item), item);
    }
    for item in normalize_chat_list(b) {
        by_key.insert(chat_key(&item), item);
    }
    let mut merged: Vec<ChatMessage> = by_key.into_values().collect();
    sort_by_identity(&mut merged);
    keep_most_recent(merged)
}

/// Decode one untrusted JSON value into a chat message.
///
/// Requires a present side of "A"/"B", non-empty text, and a positive
/// timestamp; everything else is defaulted or clamped.
pub fn decode_chat_item(value: &Value) -> Option<ChatMessage> {
    let obj = value.as_object()?;
    let side = PlayerSide::parse(obj.get("side").and_then(Value::as_str).unwrap_or(""))?;
    let text = obj.get("text").and_then(Value::as_str).unwrap_or("");
    let ts = obj.get("ts").and_then(Value::as_i64).unwrap_or(0);
    let id = obj.get("id").and_then(Value::as_str).unwrap_or("");
    if text.is_empty() || ts <= 0 {
        return None;
    }
    Some(ChatMessage {
        id: clamp_len(id, MAX_ID_LENGTH),
        side,
        text: clamp_len(text, MAX_CHAT_TEXT_LENGTH),
        ts,
    })
}

/// Decode an untrusted JSON value into a normalized chat list. Non-arrays and
/// malformed entries decode to nothing.
pub fn decode_chat_list(value: &Value) -> Vec<ChatMessage> {
    let items: Vec<ChatMessage> = value
        .as_array()
        .map(|raw| raw.iter().filter_map(decode_chat_item).collect())
        .unwrap_or_default();
    normalize_chat_list(&items)
}
