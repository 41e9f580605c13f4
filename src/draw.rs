//! Prompt deck parsing and draw selection.
//!
//! The deck is newline-delimited text; a draw picks a random prompt and a
//! player to answer it. Player selection is random but avoids handing the
//! same side three turns in a row when the other side is present.

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::models::{DrawPlayer, DrawResult, PlayerSide};
use crate::validation::MAX_DECK_PROMPTS;

/// Split deck text into prompts: one per line, trimmed, empties dropped,
/// capped at [`MAX_DECK_PROMPTS`].
pub fn parse_deck(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(MAX_DECK_PROMPTS)
        .map(str::to_string)
        .collect()
}

/// Tracks which side drew last and how many times in a row, so the rotation
/// can force an alternation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrawRotation {
    pub last_side: Option<PlayerSide>,
    pub streak: u32,
}

impl DrawRotation {
    /// Forget the streak, e.g. after the player roster changes.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn record(&mut self, side: PlayerSide) {
        self.streak = if self.last_side == Some(side) {
            self.streak + 1
        } else {
            1
        };
        self.last_side = Some(side);
    }
}

/// Pick the player for the next draw.
///
/// With two players the pick is random, except that a side which has already
/// drawn twice running never draws a third time while the other side exists.
pub fn next_player<R: Rng>(
    rotation: &mut DrawRotation,
    players: &[DrawPlayer],
    rng: &mut R,
) -> Option<DrawPlayer> {
    if players.is_empty() {
        rotation.reset();
        return None;
    }
    if players.len() == 1 {
        let only = players[0].clone();
        rotation.record(only.side);
        return Some(only);
    }

    let picked = players[rng.gen_range(0..players.len())].clone();
    if let Some(last) = rotation.last_side {
        if picked.side == last && rotation.streak >= 2 {
            let others: Vec<&DrawPlayer> =
                players.iter().filter(|p| p.side != last).collect();
            if let Some(forced) = others.first() {
                let forced = (*forced).clone();
                rotation.record(forced.side);
                return Some(forced);
            }
        }
    }
    rotation.record(picked.side);
    Some(picked)
}

pub(crate) fn base36(mut n: i64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n <= 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

pub(crate) fn random_suffix<R: Rng>(rng: &mut R, len: usize) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

/// Draw one prompt for one player.
///
/// Returns `None` when the deck parses to no prompts. The result carries the
/// draw timestamp, a fresh id, and the drawing client's id for the merge
/// rules to compare.
pub fn draw_once<R: Rng>(
    deck_text: &str,
    players: &[DrawPlayer],
    rotation: &mut DrawRotation,
    client_id: &str,
    now: i64,
    rng: &mut R,
) -> Option<DrawResult> {
    let deck = parse_deck(deck_text);
    if deck.is_empty() {
        return None;
    }
    let player = next_player(rotation, players, rng);
    let text = deck[rng.gen_range(0..deck.len())].clone();
    Some(DrawResult {
        ok: true,
        player,
        text,
        ts: now,
        id: format!("d_{}_{}", base36(now), random_suffix(rng, 6)),
        by: client_id.to_string(),
    })
}
