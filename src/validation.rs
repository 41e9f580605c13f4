//! Input validation for Parlor.
//!
//! Size limits for every synchronized field, plus room id normalization.
//! Room ids travel in URLs and double as store keys, so the accepted
//! alphabet is deliberately narrow: `[A-Za-z0-9_-]`, at most 64 characters.

// Limits (matching the deployed wire protocol)
pub const MAX_PLAYER_NAME_LENGTH: usize = 80;
pub const MAX_DECK_TEXT_LENGTH: usize = 100_000;
pub const MAX_CHAT_TEXT_LENGTH: usize = 2000;
pub const MAX_ID_LENGTH: usize = 120;
pub const MAX_CHAT_ITEMS: usize = 200;
pub const MAX_DECK_PROMPTS: usize = 2000;
pub const MAX_ROOM_ID_LENGTH: usize = 64;

/// Truncate a string to at most `max` characters.
///
/// Operates on characters, not bytes, so multi-byte text is never split
/// mid-codepoint.
pub fn clamp_len(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    value.chars().take(max).collect()
}

fn is_room_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Check whether a string is a well-formed room id: `[A-Za-z0-9_-]{1,64}`.
pub fn is_valid_room_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= MAX_ROOM_ID_LENGTH && id.chars().all(is_room_id_char)
}

/// Normalize free-form user input into a room id.
///
/// Trims surrounding whitespace, collapses interior whitespace runs to a
/// single `-`, strips every character outside the room id alphabet, and
/// caps the result at 64 characters. An empty result means the input
/// cannot name a room.
pub fn normalize_room_id(input: &str) -> String {
    let mut out = String::new();
    let mut pending_dash = false;
    for c in input.trim().chars() {
        if c.is_whitespace() {
            pending_dash = true;
            continue;
        }
        if pending_dash {
            out.push('-');
            pending_dash = false;
        }
        if is_room_id_char(c) {
            out.push(c);
        }
    }
    out.truncate(out.len().min(MAX_ROOM_ID_LENGTH));
    if is_valid_room_id(&out) {
        out
    } else {
        String::new()
    }
}
