//! Room document codec.
//!
//! One strict decode boundary for every untrusted JSON blob the system
//! touches: the stored blob, incoming write bodies, and pulled documents.
//! Decoding is pure and total — any input yields either a valid
//! [`RoomDocument`] or nothing, never a partial object and never a panic.
//!
//! Two shapes are understood: the current v2 document (`v == 2`, per-field
//! stamps) and the legacy v1 flat shape, which is lifted into v2 with the
//! single legacy timestamp applied to every sub-field.

use serde_json::Value;

use crate::chat::decode_chat_list;
use crate::models::{
    ChatField, DeckField, DrawField, DrawPlayer, DrawResult, PlayerSide, PlayersField,
    RoomDocument, ROOM_DOCUMENT_VERSION,
};
use crate::validation::{
    clamp_len, MAX_CHAT_TEXT_LENGTH, MAX_DECK_TEXT_LENGTH, MAX_ID_LENGTH,
    MAX_PLAYER_NAME_LENGTH,
};

/// Outcome of decoding an untrusted blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedRoom {
    /// A current-schema document.
    V2(RoomDocument),
    /// A legacy v1 document, already lifted into the v2 shape.
    Legacy(RoomDocument),
    /// Neither shape; nothing usable.
    Invalid,
}

impl DecodedRoom {
    pub fn into_document(self) -> Option<RoomDocument> {
        match self {
            DecodedRoom::V2(doc) | DecodedRoom::Legacy(doc) => Some(doc),
            DecodedRoom::Invalid => None,
        }
    }
}

/// Decode any supported shape: strict v2 first, then the legacy lift.
pub fn decode_room(value: &Value) -> DecodedRoom {
    if let Some(doc) = decode_v2(value) {
        return DecodedRoom::V2(doc);
    }
    if let Some(doc) = decode_legacy(value) {
        return DecodedRoom::Legacy(doc);
    }
    DecodedRoom::Invalid
}

fn str_in(value: &Value, key: &str, max: usize) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(|s| clamp_len(s, max))
        .unwrap_or_default()
}

fn num_in(value: &Value, key: &str) -> i64 {
    value.get(key).and_then(Value::as_i64).unwrap_or(0)
}

fn decode_draw_player(value: &Value) -> Option<DrawPlayer> {
    let side = PlayerSide::parse(value.get("side").and_then(Value::as_str).unwrap_or(""))?;
    Some(DrawPlayer {
        side,
        name: str_in(value, "name", MAX_PLAYER_NAME_LENGTH),
    })
}

/// Decode a stored draw. Only successful draws (`ok == true`) are kept; a
/// player whose side is unrecognized decodes as unassigned.
fn decode_draw_result(value: &Value) -> Option<DrawResult> {
    if !value.is_object() || value.get("ok").and_then(Value::as_bool) != Some(true) {
        return None;
    }
    Some(DrawResult {
        ok: true,
        player: value.get("player").and_then(decode_draw_player),
        text: str_in(value, "text", MAX_CHAT_TEXT_LENGTH),
        ts: num_in(value, "ts"),
        id: str_in(value, "id", MAX_ID_LENGTH),
        by: str_in(value, "by", MAX_ID_LENGTH),
    })
}

/// Decode a strict v2 document.
///
/// The `v` field must equal 2. Every sub-field is individually type-checked
/// and defaulted: a missing or mistyped value becomes an empty string, zero,
/// an empty list, or no draw.
pub fn decode_v2(value: &Value) -> Option<RoomDocument> {
    if !value.is_object() {
        return None;
    }
    if value.get("v").and_then(Value::as_u64) != Some(ROOM_DOCUMENT_VERSION as u64) {
        return None;
    }

    let empty = Value::Null;
    let players = value.get("players").unwrap_or(&empty);
    let deck = value.get("deck").unwrap_or(&empty);
    let chat = value.get("chat").unwrap_or(&empty);
    let draw = value.get("draw").unwrap_or(&empty);

    Some(RoomDocument {
        v: ROOM_DOCUMENT_VERSION,
        updated_at: num_in(value, "updatedAt"),
        updated_by: str_in(value, "updatedBy", MAX_ID_LENGTH),
        players: PlayersField {
            a: str_in(players, "a", MAX_PLAYER_NAME_LENGTH),
            b: str_in(players, "b", MAX_PLAYER_NAME_LENGTH),
            updated_at: num_in(players, "updatedAt"),
            updated_by: str_in(players, "updatedBy", MAX_ID_LENGTH),
        },
        deck: DeckField {
            text: str_in(deck, "text", MAX_DECK_TEXT_LENGTH),
            updated_at: num_in(deck, "updatedAt"),
            updated_by: str_in(deck, "updatedBy", MAX_ID_LENGTH),
        },
        chat: ChatField {
            items: decode_chat_list(chat.get("items").unwrap_or(&empty)),
            updated_at: num_in(chat, "updatedAt"),
            updated_by: str_in(chat, "updatedBy", MAX_ID_LENGTH),
        },
        draw: DrawField {
            last: draw.get("last").and_then(decode_draw_result),
            updated_at: num_in(draw, "updatedAt"),
            updated_by: str_in(draw, "updatedBy", MAX_ID_LENGTH),
        },
    })
}

const LEGACY_KEYS: [&str; 7] = [
    "playerA", "playerB", "deckText", "chat", "lastDraw", "updatedAt", "updatedBy",
];

/// Decode the legacy v1 flat shape and lift it into v2.
///
/// The legacy shape carried one document-level timestamp, so every lifted
/// sub-field receives that same stamp; the draw keeps its own `ts`. The shape
/// predates versioning: anything carrying a `v` tag is not legacy, and at
/// least one known legacy key must be present.
pub fn decode_legacy(value: &Value) -> Option<RoomDocument> {
    let obj = value.as_object()?;
    if obj.contains_key("v") || !LEGACY_KEYS.iter().any(|k| obj.contains_key(*k)) {
        return None;
    }

    let updated_at = num_in(value, "updatedAt");
    let updated_by = str_in(value, "updatedBy", MAX_ID_LENGTH);
    let last_draw = value.get("lastDraw").and_then(decode_draw_result);
    let draw_ts = last_draw.as_ref().map(|d| d.ts).unwrap_or(0);
    let draw_by = last_draw
        .as_ref()
        .map(|d| d.by.clone())
        .unwrap_or_default();

    Some(RoomDocument {
        v: ROOM_DOCUMENT_VERSION,
        updated_at,
        updated_by: updated_by.clone(),
        players: PlayersField {
            a: str_in(value, "playerA", MAX_PLAYER_NAME_LENGTH),
            b: str_in(value, "playerB", MAX_PLAYER_NAME_LENGTH),
            updated_at,
            updated_by: updated_by.clone(),
        },
        deck: DeckField {
            text: str_in(value, "deckText", MAX_DECK_TEXT_LENGTH),
            updated_at,
            updated_by: updated_by.clone(),
        },
        chat: ChatField {
            items: decode_chat_list(value.get("chat").unwrap_or(&Value::Null)),
            updated_at,
            updated_by,
        },
        draw: DrawField {
            last: last_draw,
            updated_at: draw_ts,
            updated_by: draw_by,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_v2_round_trip() {
        let doc = RoomDocument {
            v: 2,
            updated_at: 500,
            updated_by: "c1".into(),
            players: PlayersField {
                a: "Ann".into(),
                b: "Bo".into(),
                updated_at: 400,
                updated_by: "c1".into(),
            },
            deck: DeckField {
                text: "Q1\nQ2".into(),
                updated_at: 300,
                updated_by: "c2".into(),
            },
            chat: ChatField {
                items: vec![crate::models::ChatMessage {
                    id: "m1".into(),
                    side: PlayerSide::A,
                    text: "hi".into(),
                    ts: 100,
                }],
                updated_at: 100,
                updated_by: "c1".into(),
            },
            draw: DrawField {
                last: Some(DrawResult {
                    ok: true,
                    player: Some(DrawPlayer {
                        side: PlayerSide::B,
                        name: "Bo".into(),
                    }),
                    text: "Q1".into(),
                    ts: 450,
                    id: "d1".into(),
                    by: "c2".into(),
                }),
                updated_at: 450,
                updated_by: "c2".into(),
            },
        };
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(decode_room(&value), DecodedRoom::V2(doc));
    }

    #[test]
    fn test_v2_requires_version_tag() {
        assert!(decode_v2(&json!({"players": {"a": "Ann"}})).is_none());
        assert!(decode_v2(&json!({"v": 1})).is_none());
        assert!(decode_v2(&json!({"v": 3})).is_none());
        assert!(decode_v2(&json!("v2")).is_none());
        assert!(decode_v2(&json!(null)).is_none());
    }

    #[test]
    fn test_v2_defaults_mistyped_fields() {
        let value = json!({
            "v": 2,
            "updatedAt": "not a number",
            "players": {"a": 42, "b": "Bo", "updatedAt": 10},
            "deck": "not an object",
            "chat": {"items": {"also": "wrong"}},
            "draw": {"last": {"ok": false, "text": "x", "ts": 9}}
        });
        let doc = decode_v2(&value).unwrap();
        assert_eq!(doc.updated_at, 0);
        assert_eq!(doc.players.a, "");
        assert_eq!(doc.players.b, "Bo");
        assert_eq!(doc.players.updated_at, 10);
        assert_eq!(doc.deck.text, "");
        assert!(doc.chat.items.is_empty());
        // Failed draws never survive decoding.
        assert!(doc.draw.last.is_none());
    }

    #[test]
    fn test_v2_clamps_oversized_strings() {
        let value = json!({
            "v": 2,
            "players": {"a": "x".repeat(200)},
        });
        let doc = decode_v2(&value).unwrap();
        assert_eq!(doc.players.a.len(), MAX_PLAYER_NAME_LENGTH);
    }

    #[test]
    fn test_v2_draw_player_with_bad_side_is_unassigned() {
        let value = json!({
            "v": 2,
            "draw": {"last": {"ok": true, "player": {"side": "Z", "name": "x"}, "text": "Q", "ts": 5, "id": "d", "by": "c"}, "updatedAt": 5}
        });
        let doc = decode_v2(&value).unwrap();
        let draw = doc.draw.last.unwrap();
        assert!(draw.player.is_none());
        assert_eq!(draw.text, "Q");
    }

    #[test]
    fn test_legacy_upgrade() {
        let value = json!({
            "playerA": "Ann",
            "playerB": "Bo",
            "deckText": "Q1\nQ2",
            "chat": [{"side": "A", "text": "hi", "ts": 1000}],
            "updatedAt": 1000
        });
        let decoded = decode_room(&value);
        let doc = match decoded {
            DecodedRoom::Legacy(doc) => doc,
            other => panic!("expected legacy decode, got {other:?}"),
        };
        assert_eq!(doc.v, 2);
        assert_eq!(doc.players.a, "Ann");
        assert_eq!(doc.players.b, "Bo");
        assert_eq!(doc.players.updated_at, 1000);
        assert_eq!(doc.deck.text, "Q1\nQ2");
        assert_eq!(doc.deck.updated_at, 1000);
        assert_eq!(doc.chat.items.len(), 1);
        assert_eq!(doc.chat.items[0].text, "hi");
        assert_eq!(doc.chat.updated_at, 1000);
        assert_eq!(doc.draw.last, None);
        assert_eq!(doc.draw.updated_at, 0);
    }

    #[test]
    fn test_legacy_draw_keeps_its_own_stamp() {
        let value = json!({
            "deckText": "Q1",
            "updatedAt": 1000,
            "lastDraw": {"ok": true, "player": null, "text": "Q1", "ts": 900, "id": "d", "by": "c9"}
        });
        let doc = decode_legacy(&value).unwrap();
        assert_eq!(doc.draw.updated_at, 900);
        assert_eq!(doc.draw.updated_by, "c9");
        assert_eq!(doc.draw.last.unwrap().ts, 900);
    }

    #[test]
    fn test_unrecognized_shapes_are_invalid() {
        assert_eq!(decode_room(&json!(null)), DecodedRoom::Invalid);
        assert_eq!(decode_room(&json!([1, 2, 3])), DecodedRoom::Invalid);
        assert_eq!(decode_room(&json!({"foo": "bar"})), DecodedRoom::Invalid);
        assert_eq!(decode_room(&json!("just a string")), DecodedRoom::Invalid);
        // A versioned document from the future never lifts as legacy.
        assert_eq!(
            decode_room(&json!({"v": 3, "updatedAt": 5})),
            DecodedRoom::Invalid
        );
    }
}
