//! Client sync engine.
//!
//! [`RoomSession`] owns a client's shadow copy of the room: the field values,
//! which of them changed locally since the last push (dirty flags), and the
//! newest remote stamp folded into each field (applied-at marks). Local edits
//! persist to the cache immediately and coalesce into one debounced push;
//! a periodic poll pulls the server document and merges it in.
//!
//! Every network operation degrades to "no-op, try again next cycle". The
//! engine has no fatal error path; the only user-visible failure state is
//! [`RoomStatus::InvalidRoom`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::thread_rng;
use reqwest::Client;

use crate::cache::{load_json, save_json, Clipboard, LocalCache};
use crate::chat::{decode_chat_list, merge_chat_lists, normalize_chat_list};
use crate::clock::Clock;
use crate::codec::decode_room;
use crate::config::{
    cache_keys, ensure_client_id, SessionConfig, DEFAULT_DECK_TEXT, DEFAULT_PLAYER_A,
    DEFAULT_PLAYER_B,
};
use crate::draw::{base36, draw_once, random_suffix, DrawRotation};
use crate::error::{ParlorError, ParlorResult};
use crate::models::{
    ChatField, ChatMessage, DeckField, DrawField, DrawPlayer, DrawResult, PlayerSide,
    PlayersField, RoomDocument, ROOM_DOCUMENT_VERSION,
};
use crate::scheduler::TaskSlot;
use crate::validation::{clamp_len, normalize_room_id, MAX_CHAT_TEXT_LENGTH};

/// Connection state of a session, for status display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomStatus {
    /// No room joined.
    Idle,
    /// Join sequence in progress.
    Connecting,
    /// Joined; the poll loop is running.
    Connected,
    /// The requested room id failed validation.
    InvalidRoom,
}

/// Which fields changed locally since the last successful push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FieldFlags {
    players: bool,
    deck: bool,
    chat: bool,
    draw: bool,
}

/// Latest remote `updatedAt` folded into local state, per field. A remote
/// field is applied only when its stamp is strictly greater, so these marks
/// never regress.
#[derive(Debug, Clone, Copy, Default)]
struct FieldStamps {
    players: i64,
    deck: i64,
    chat: i64,
    draw: i64,
}

struct SessionState {
    player_a: String,
    player_b: String,
    self_side: PlayerSide,
    deck_text: String,
    chat: Vec<ChatMessage>,
    last_draw: Option<DrawResult>,
    rotation: DrawRotation,
    room_id: String,
    status: RoomStatus,
    dirty: FieldFlags,
    applied_at: FieldStamps,
    last_applied_at: i64,
    last_seen_at: i64,
    last_pushed_at: i64,
}

#[derive(Default)]
struct SessionTasks {
    push: TaskSlot,
    poll: TaskSlot,
}

struct SessionInner {
    http: Client,
    config: SessionConfig,
    client_id: String,
    cache: Arc<dyn LocalCache>,
    clock: Arc<dyn Clock>,
    state: Mutex<SessionState>,
    tasks: Mutex<SessionTasks>,
}

/// One client's live session. Cheap to clone; clones share the same state.
///
/// Must be used from within a tokio runtime: local mutations arm background
/// tasks for the debounced push and the poll loop.
#[derive(Clone)]
pub struct RoomSession {
    inner: Arc<SessionInner>,
}

impl RoomSession {
    /// Create a session, seeding shadow state from the cache (or defaults
    /// where the cache has nothing).
    pub fn new(
        config: SessionConfig,
        cache: Arc<dyn LocalCache>,
        clock: Arc<dyn Clock>,
    ) -> ParlorResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ParlorError::network(e.to_string()))?;

        let client_id = ensure_client_id(cache.as_ref());
        let chat = load_json(cache.as_ref(), cache_keys::CHAT)
            .map(|value| decode_chat_list(&value))
            .unwrap_or_default();

        let state = SessionState {
            player_a: cache
                .get(cache_keys::PLAYER_A)
                .unwrap_or_else(|| DEFAULT_PLAYER_A.to_string()),
            player_b: cache
                .get(cache_keys::PLAYER_B)
                .unwrap_or_else(|| DEFAULT_PLAYER_B.to_string()),
            self_side: cache
                .get(cache_keys::SELF_SIDE)
                .and_then(|s| PlayerSide::parse(&s))
                .unwrap_or(PlayerSide::A),
            deck_text: cache
                .get(cache_keys::DECK_TEXT)
                .unwrap_or_else(|| DEFAULT_DECK_TEXT.to_string()),
            chat,
            last_draw: None,
            rotation: DrawRotation::default(),
            room_id: cache
                .get(cache_keys::ROOM_ID)
                .map(|s| normalize_room_id(&s))
                .unwrap_or_default(),
            status: RoomStatus::Idle,
            dirty: FieldFlags::default(),
            applied_at: FieldStamps::default(),
            last_applied_at: 0,
            last_seen_at: 0,
            last_pushed_at: 0,
        };

        Ok(Self {
            inner: Arc::new(SessionInner {
                http,
                config,
                client_id,
                cache,
                clock,
                state: Mutex::new(state),
                tasks: Mutex::new(SessionTasks::default()),
            }),
        })
    }

    // Accessors (snapshots)

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn player_a(&self) -> String {
        self.inner.lock_state().player_a.clone()
    }

    pub fn player_b(&self) -> String {
        self.inner.lock_state().player_b.clone()
    }

    pub fn self_side(&self) -> PlayerSide {
        self.inner.lock_state().self_side
    }

    pub fn deck_text(&self) -> String {
        self.inner.lock_state().deck_text.clone()
    }

    pub fn chat(&self) -> Vec<ChatMessage> {
        self.inner.lock_state().chat.clone()
    }

    pub fn last_draw(&self) -> Option<DrawResult> {
        self.inner.lock_state().last_draw.clone()
    }

    pub fn room_id(&self) -> Option<String> {
        let st = self.inner.lock_state();
        if st.room_id.is_empty() {
            None
        } else {
            Some(st.room_id.clone())
        }
    }

    pub fn status(&self) -> RoomStatus {
        self.inner.lock_state().status
    }

    /// When a remote document was last folded in (local clock).
    pub fn last_seen_at(&self) -> i64 {
        self.inner.lock_state().last_seen_at
    }

    /// When the last successful push completed (local clock).
    pub fn last_pushed_at(&self) -> i64 {
        self.inner.lock_state().last_pushed_at
    }

    // Local mutations

    pub fn set_player_a(&self, name: &str) {
        let joined = {
            let mut st = self.inner.lock_state();
            st.player_a = name.to_string();
            st.rotation.reset();
            self.inner.cache.set(cache_keys::PLAYER_A, name);
            st.mark_players_dirty()
        };
        if joined {
            self.schedule_push();
        }
    }

    pub fn set_player_b(&self, name: &str) {
        let joined = {
            let mut st = self.inner.lock_state();
            st.player_b = name.to_string();
            st.rotation.reset();
            self.inner.cache.set(cache_keys::PLAYER_B, name);
            st.mark_players_dirty()
        };
        if joined {
            self.schedule_push();
        }
    }

    /// Which side this device speaks as. Not synchronized; each device keeps
    /// its own.
    pub fn set_self_side(&self, side: PlayerSide) {
        let mut st = self.inner.lock_state();
        st.self_side = side;
        self.inner.cache.set(cache_keys::SELF_SIDE, side.as_str());
    }

    pub fn set_deck_text(&self, text: &str) {
        let joined = {
            let mut st = self.inner.lock_state();
            st.deck_text = text.to_string();
            self.inner.cache.set(cache_keys::DECK_TEXT, text);
            st.mark_deck_dirty()
        };
        if joined {
            self.schedule_push();
        }
    }

    /// Restore the starter deck.
    pub fn reset_deck(&self) {
        self.set_deck_text(DEFAULT_DECK_TEXT);
    }

    pub fn clear_deck(&self) {
        self.set_deck_text("");
    }

    /// Append a chat message from this device's side. Returns the message,
    /// or `None` when the text trims to nothing.
    pub fn send_chat(&self, text: &str) -> Option<ChatMessage> {
        let unified = text.replace("\r\n", "\n");
        let trimmed = unified.trim();
        if trimmed.is_empty() {
            return None;
        }
        let body = clamp_len(trimmed, MAX_CHAT_TEXT_LENGTH);
        let now = self.inner.clock.now_ms();

        let (message, joined) = {
            let mut st = self.inner.lock_state();
            let message = ChatMessage {
                id: make_chat_id(&self.inner.client_id, now),
                side: st.self_side,
                text: body,
                ts: now,
            };
            st.chat = merge_chat_lists(&st.chat, std::slice::from_ref(&message));
            save_json(self.inner.cache.as_ref(), cache_keys::CHAT, &st.chat);
            let joined = st.mark_chat_dirty();
            (message, joined)
        };
        if joined {
            self.schedule_push();
        }
        Some(message)
    }

    /// Clear this device's chat log. The union merge means the room's log
    /// flows back on the next pull; clearing is local.
    pub fn clear_chat(&self) {
        let joined = {
            let mut st = self.inner.lock_state();
            st.chat.clear();
            save_json(self.inner.cache.as_ref(), cache_keys::CHAT, &st.chat);
            st.mark_chat_dirty()
        };
        if joined {
            self.schedule_push();
        }
    }

    /// Draw a prompt for the next player. Returns `None` when the deck has
    /// no prompts.
    pub fn draw(&self) -> Option<DrawResult> {
        let now = self.inner.clock.now_ms();
        let (result, joined) = {
            let mut st = self.inner.lock_state();
            let mut players = Vec::new();
            let a = st.player_a.trim().to_string();
            let b = st.player_b.trim().to_string();
            if !a.is_empty() {
                players.push(DrawPlayer {
                    side: PlayerSide::A,
                    name: a,
                });
            }
            if !b.is_empty() {
                players.push(DrawPlayer {
                    side: PlayerSide::B,
                    name: b,
                });
            }
            let deck_text = st.deck_text.clone();
            let result = match draw_once(
                &deck_text,
                &players,
                &mut st.rotation,
                &self.inner.client_id,
                now,
                &mut thread_rng(),
            ) {
                Some(result) => result,
                None => return None,
            };
            st.last_draw = Some(result.clone());
            let joined = st.mark_draw_dirty();
            (result, joined)
        };
        if joined {
            self.schedule_push();
        }
        Some(result)
    }

    // Sync operations

    /// Join a room: pull, publish local state, pull the authoritative merge,
    /// then start the poll loop. An invalid id sets [`RoomStatus::InvalidRoom`]
    /// and changes nothing else.
    pub async fn join_room(&self, room_id: &str) -> ParlorResult<()> {
        let clean = normalize_room_id(room_id);
        if clean.is_empty() {
            self.inner.lock_state().status = RoomStatus::InvalidRoom;
            return Err(ParlorError::validation(
                "room_id",
                "room ids are 1-64 characters of [A-Za-z0-9_-]",
            ));
        }
        {
            let mut st = self.inner.lock_state();
            st.room_id = clean.clone();
            st.status = RoomStatus::Connecting;
        }
        self.inner.cache.set(cache_keys::ROOM_ID, &clean);
        tracing::debug!("joining room {}", clean);

        SessionInner::pull_once(&self.inner).await;
        SessionInner::push_once(&self.inner).await;
        tokio::time::sleep(self.inner.config.join_settle).await;
        SessionInner::pull_once(&self.inner).await;

        let inner = Arc::clone(&self.inner);
        let every = self.inner.config.poll_interval;
        {
            let mut tasks = self.inner.tasks.lock().unwrap();
            tasks.poll.arm(async move {
                let mut ticker = tokio::time::interval(every);
                // The first interval tick fires immediately; the join
                // sequence just pulled, so skip it.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    SessionInner::pull_once(&inner).await;
                }
            });
        }
        self.inner.lock_state().status = RoomStatus::Connected;
        Ok(())
    }

    /// Pull the room document and merge it into local state. Never writes to
    /// the store; any failure is a silent no-op.
    pub async fn pull_once(&self) {
        SessionInner::pull_once(&self.inner).await;
    }

    /// Push local state: fetch the server document, overlay dirty fields,
    /// merge chat, PUT. Failure leaves dirty flags set for the next cycle.
    pub async fn push_once(&self) {
        SessionInner::push_once(&self.inner).await;
    }

    /// Shareable link for the joined room.
    pub fn room_link(&self, page_url: &str) -> Option<String> {
        let st = self.inner.lock_state();
        if st.room_id.is_empty() {
            None
        } else {
            Some(format!("{}#room={}", page_url, st.room_id))
        }
    }

    /// Copy the room link through the clipboard capability.
    pub fn copy_room_link(&self, page_url: &str, clipboard: &dyn Clipboard) -> bool {
        match self.room_link(page_url) {
            Some(link) => clipboard.copy_text(&link),
            None => false,
        }
    }

    /// Copy the last draw as "Turn: name" plus the prompt.
    pub fn copy_last_draw(&self, clipboard: &dyn Clipboard) -> bool {
        let text = {
            let st = self.inner.lock_state();
            match &st.last_draw {
                Some(draw) if draw.ok => draw_share_text(&st, draw),
                _ => return false,
            }
        };
        clipboard.copy_text(&text)
    }

    /// Tear the session down: cancel the debounced push and the poll loop.
    pub fn close(&self) {
        {
            let mut tasks = self.inner.tasks.lock().unwrap();
            tasks.push.cancel();
            tasks.poll.cancel();
        }
        self.inner.lock_state().status = RoomStatus::Idle;
    }

    fn schedule_push(&self) {
        let inner = Arc::clone(&self.inner);
        let delay = self.inner.config.push_debounce;
        let mut tasks = self.inner.tasks.lock().unwrap();
        tasks.push.arm(async move {
            tokio::time::sleep(delay).await;
            SessionInner::push_once(&inner).await;
        });
    }
}

impl SessionState {
    fn joined(&self) -> bool {
        !self.room_id.is_empty()
    }

    fn mark_players_dirty(&mut self) -> bool {
        if self.joined() {
            self.dirty.players = true;
        }
        self.joined()
    }

    fn mark_deck_dirty(&mut self) -> bool {
        if self.joined() {
            self.dirty.deck = true;
        }
        self.joined()
    }

    fn mark_chat_dirty(&mut self) -> bool {
        if self.joined() {
            self.dirty.chat = true;
        }
        self.joined()
    }

    fn mark_draw_dirty(&mut self) -> bool {
        if self.joined() {
            self.dirty.draw = true;
        }
        self.joined()
    }
}

impl SessionInner {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap()
    }

    fn room_url(&self) -> Option<String> {
        let st = self.lock_state();
        if st.room_id.is_empty() {
            return None;
        }
        Some(format!(
            "{}?room={}",
            self.config.base_url,
            urlencoding::encode(&st.room_id)
        ))
    }

    /// GET the room document. `Ok(None)` covers not-found and undecodable
    /// bodies; `Err` means the request itself failed.
    async fn fetch_document(&self, url: &str) -> ParlorResult<Option<RoomDocument>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ParlorError::network(e.to_string()))?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let text = response
            .text()
            .await
            .map_err(|e| ParlorError::network(e.to_string()))?;
        let value: serde_json::Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(_) => return Ok(None),
        };
        Ok(decode_room(&value).into_document())
    }

    async fn pull_once(self: &Arc<Self>) {
        let url = match self.room_url() {
            Some(url) => url,
            None => return,
        };
        match self.fetch_document(&url).await {
            Ok(Some(doc)) => self.apply_remote(doc),
            Ok(None) => {}
            Err(e) => tracing::debug!("pull failed: {}", e),
        }
    }

    /// Fold a remote document into local state.
    ///
    /// Chat is merged unconditionally; its applied-at mark is bookkeeping.
    /// The draw follows the newer draw timestamp, remote winning ties.
    /// Players and deck apply only when the remote stamp is strictly newer
    /// than the applied-at mark, so a stale replica never overwrites a field
    /// the local side has already seen a newer value for.
    fn apply_remote(&self, doc: RoomDocument) {
        let now = self.clock.now_ms();
        let mut st = self.lock_state();

        let merged = merge_chat_lists(&st.chat, &doc.chat.items);
        if merged != st.chat {
            st.chat = merged;
            save_json(self.cache.as_ref(), cache_keys::CHAT, &st.chat);
        }
        st.applied_at.chat = st.applied_at.chat.max(doc.chat.updated_at);

        if let Some(remote_draw) = doc.draw.ok_last() {
            let local_ts = st.last_draw.as_ref().map(|d| d.ts).unwrap_or(0);
            if st.last_draw.is_none() || remote_draw.ts >= local_ts {
                st.applied_at.draw = st.applied_at.draw.max(remote_draw.ts);
                st.last_draw = Some(remote_draw.clone());
            }
        }

        if doc.players.updated_at > st.applied_at.players {
            st.applied_at.players = doc.players.updated_at;
            st.player_a = doc.players.a;
            st.player_b = doc.players.b;
            self.cache.set(cache_keys::PLAYER_A, &st.player_a);
            self.cache.set(cache_keys::PLAYER_B, &st.player_b);
        }

        if doc.deck.updated_at > st.applied_at.deck {
            st.applied_at.deck = doc.deck.updated_at;
            st.deck_text = doc.deck.text;
            self.cache.set(cache_keys::DECK_TEXT, &st.deck_text);
        }

        st.last_applied_at = st.last_applied_at.max(doc.updated_at);
        st.last_seen_at = now;
    }

    async fn push_once(self: &Arc<Self>) {
        let url = match self.room_url() {
            Some(url) => url,
            None => return,
        };

        // Read-merge-write: fetch the server's current document first so the
        // push overlays only locally-dirty fields instead of blindly
        // overwriting.
        let remote = match self.fetch_document(&url).await {
            Ok(remote) => remote,
            Err(e) => {
                tracing::debug!("push aborted, pre-fetch failed: {}", e);
                return;
            }
        };

        let now = self.clock.now_ms();
        let outgoing = {
            let st = self.lock_state();
            build_outgoing(&st, remote.as_ref(), &self.client_id, now)
        };

        match self.http.put(&url).json(&outgoing).send().await {
            Ok(response) if response.status().is_success() => {
                let mut st = self.lock_state();
                st.dirty = FieldFlags::default();
                st.last_pushed_at = now;
            }
            Ok(response) => {
                tracing::debug!("push rejected with status {}", response.status());
            }
            Err(e) => tracing::debug!("push failed: {}", e),
        }
    }
}

fn make_chat_id(client_id: &str, now: i64) -> String {
    format!(
        "{}_{}_{}",
        client_id,
        base36(now),
        random_suffix(&mut thread_rng(), 6)
    )
}

fn display_name_for_side(st: &SessionState, side: PlayerSide) -> String {
    let name = match side {
        PlayerSide::A => st.player_a.trim(),
        PlayerSide::B => st.player_b.trim(),
    };
    if name.is_empty() {
        match side {
            PlayerSide::A => "Player 1".to_string(),
            PlayerSide::B => "Player 2".to_string(),
        }
    } else {
        name.to_string()
    }
}

fn draw_share_text(st: &SessionState, draw: &DrawResult) -> String {
    match &draw.player {
        Some(player) => {
            let name = if player.name.trim().is_empty() {
                display_name_for_side(st, player.side)
            } else {
                player.name.clone()
            };
            format!("Turn: {}\n{}", name, draw.text)
        }
        None => format!("Prompt\n{}", draw.text),
    }
}

/// A document entirely from local state, used when the room has nothing
/// stored yet.
fn build_local_document(st: &SessionState, client_id: &str, now: i64) -> RoomDocument {
    let draw = st.last_draw.clone().filter(|d| d.ok);
    let draw_ts = draw.as_ref().map(|d| d.ts).unwrap_or(0);
    let draw_by = draw.as_ref().map(|d| d.by.clone()).unwrap_or_default();
    RoomDocument {
        v: ROOM_DOCUMENT_VERSION,
        updated_at: now,
        updated_by: client_id.to_string(),
        players: PlayersField {
            a: st.player_a.clone(),
            b: st.player_b.clone(),
            updated_at: now,
            updated_by: client_id.to_string(),
        },
        deck: DeckField {
            text: st.deck_text.clone(),
            updated_at: now,
            updated_by: client_id.to_string(),
        },
        chat: ChatField {
            items: normalize_chat_list(&st.chat),
            updated_at: now,
            updated_by: client_id.to_string(),
        },
        draw: DrawField {
            last: draw,
            updated_at: draw_ts,
            updated_by: draw_by,
        },
    }
}

/// Build the outgoing document for a push: start from the server document
/// (or a local one when none exists), overlay each dirty field with a fresh
/// stamp, and always carry the chat union. Chat is re-stamped only when the
/// merge changed content or chat was locally dirty.
fn build_outgoing(
    st: &SessionState,
    remote: Option<&RoomDocument>,
    client_id: &str,
    now: i64,
) -> RoomDocument {
    let local_chat = normalize_chat_list(&st.chat);
    let mut next = remote
        .cloned()
        .unwrap_or_else(|| build_local_document(st, client_id, now));
    next.updated_at = now;
    next.updated_by = client_id.to_string();

    let remote_chat: &[ChatMessage] = remote.map(|r| r.chat.items.as_slice()).unwrap_or(&[]);
    let merged_chat = merge_chat_lists(remote_chat, &local_chat);
    let chat_changed = remote.is_none() || merged_chat != normalize_chat_list(remote_chat);
    next.chat.items = merged_chat;
    if st.dirty.chat || chat_changed {
        next.chat.updated_at = now;
        next.chat.updated_by = client_id.to_string();
    } else if let Some(r) = remote {
        next.chat.updated_at = r.chat.updated_at;
        next.chat.updated_by = r.chat.updated_by.clone();
    }

    if st.dirty.players {
        next.players = PlayersField {
            a: st.player_a.clone(),
            b: st.player_b.clone(),
            updated_at: now,
            updated_by: client_id.to_string(),
        };
    } else if let Some(r) = remote {
        next.players = r.players.clone();
    }

    if st.dirty.deck {
        next.deck = DeckField {
            text: st.deck_text.clone(),
            updated_at: now,
            updated_by: client_id.to_string(),
        };
    } else if let Some(r) = remote {
        next.deck = r.deck.clone();
    }

    let local_draw = st.last_draw.as_ref().filter(|d| d.ok);
    let remote_draw = remote.and_then(|r| r.draw.ok_last());
    let local_ts = local_draw.map(|d| d.ts).unwrap_or(0);
    let remote_ts = remote_draw.map(|d| d.ts).unwrap_or(0);
    if st.dirty.draw && local_draw.is_some() {
        let draw = local_draw.cloned();
        let by = draw
            .as_ref()
            .map(|d| d.by.clone())
            .filter(|by| !by.is_empty())
            .unwrap_or_else(|| client_id.to_string());
        next.draw = DrawField {
            last: draw,
            updated_at: if local_ts > 0 { local_ts } else { now },
            updated_by: by,
        };
    } else if remote_draw.is_some() && remote_ts >= local_ts {
        next.draw = DrawField {
            last: remote_draw.cloned(),
            updated_at: remote_ts,
            updated_by: remote_draw.map(|d| d.by.clone()).unwrap_or_default(),
        };
    } else if let Some(d) = local_draw {
        next.draw = DrawField {
            last: Some(d.clone()),
            updated_at: local_ts,
            updated_by: if d.by.is_empty() {
                client_id.to_string()
            } else {
                d.by.clone()
            },
        };
    } else {
        next.draw = DrawField::default();
    }

    next
}

// ============================================================================
// Tests - engine semantics, plus end-to-end runs against the real endpoint
// ============================================================================
