//! Room endpoint implementation using Axum.
//!
//! One route, `/room`, backed by a key-value blob store:
//! - GET    - return the stored document verbatim, 404 when absent
//! - PUT    - decode the body, merge it with the stored document, persist
//! - POST   - same as PUT
//! - DELETE - remove the stored document
//! - OPTIONS - permissive CORS preflight
//!
//! The merge-on-every-write is what makes concurrent clients converge: two
//! writers race only on the read-modify-write of the stored blob, and the
//! loser's fields are carried forward by the next pull/push cycle.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio::sync::oneshot;

use crate::clock::Clock;
use crate::codec::decode_room;
use crate::error::ParlorResult;
use crate::merge::merge_room_state;
use crate::models::RoomDocument;
use crate::store::RoomStore;
use crate::validation::is_valid_room_id;

/// Server shutdown handle
static SHUTDOWN_TX: OnceLock<Mutex<Option<oneshot::Sender<()>>>> = OnceLock::new();

/// Shared server state
#[derive(Clone)]
struct AppState {
    store: Arc<dyn RoomStore>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Deserialize)]
struct RoomQuery {
    room: Option<String>,
    #[serde(rename = "roomId")]
    room_id: Option<String>,
    id: Option<String>,
}

impl RoomQuery {
    /// The room id under any of its accepted parameter names.
    ///
    /// The server validates rather than normalizes: an id that fails the
    /// `[A-Za-z0-9_-]{1,64}` pattern is rejected outright, never massaged
    /// into some other room's key. Normalizing free-form input is the
    /// client's job before it ever sends a request.
    fn valid_room_id(&self) -> Option<&str> {
        let raw = self
            .room
            .as_deref()
            .or(self.room_id.as_deref())
            .or(self.id.as_deref())
            .unwrap_or("");
        is_valid_room_id(raw).then_some(raw)
    }
}

// Every response is uncacheable: clients poll this endpoint and a cached
// document would stall convergence.

fn json_response(status: StatusCode, body: String) -> Response {
    (
        status,
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::CONTENT_TYPE, "application/json; charset=utf-8"),
        ],
        body,
    )
        .into_response()
}

fn text_response(status: StatusCode, text: &str) -> Response {
    (
        status,
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
        ],
        text.to_string(),
    )
        .into_response()
}

fn empty_response(status: StatusCode) -> Response {
    (status, [(header::CACHE_CONTROL, "no-store")], "").into_response()
}

/// Decode a stored blob. A blob that no longer decodes is treated as absent
/// rather than wedging the room.
fn decode_stored(raw: &str) -> Option<RoomDocument> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    decode_room(&value).into_document()
}

// Route handlers

async fn get_room(State(state): State<AppState>, Query(query): Query<RoomQuery>) -> Response {
    let room_id = match query.valid_room_id() {
        Some(id) => id.to_string(),
        None => {
            tracing::warn!("GET with invalid room id");
            return text_response(StatusCode::BAD_REQUEST, "Invalid room id");
        }
    };

    match state.store.get(&room_id) {
        Ok(Some(raw)) => {
            tracing::debug!("GET room={} ({} bytes)", room_id, raw.len());
            json_response(StatusCode::OK, raw)
        }
        Ok(None) => {
            tracing::debug!("GET room={} not found", room_id);
            empty_response(StatusCode::NOT_FOUND)
        }
        Err(e) => {
            tracing::error!("GET room={} store failure: {}", room_id, e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

async fn write_room(
    State(state): State<AppState>,
    Query(query): Query<RoomQuery>,
    body: Bytes,
) -> Response {
    let room_id = match query.valid_room_id() {
        Some(id) => id.to_string(),
        None => {
            tracing::warn!("write with invalid room id");
            return text_response(StatusCode::BAD_REQUEST, "Invalid room id");
        }
    };

    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!("write room={} body is not JSON", room_id);
            return text_response(StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };
    let incoming = match decode_room(&value).into_document() {
        Some(doc) => doc,
        None => {
            tracing::warn!("write room={} body is not a room document", room_id);
            return text_response(StatusCode::BAD_REQUEST, "Invalid room state");
        }
    };

    match merge_and_store(&state, &room_id, incoming) {
        Ok(raw) => json_response(StatusCode::OK, raw),
        Err(e) => {
            tracing::error!("write room={} failed: {}", room_id, e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

/// Read-merge-write for one incoming document. Nothing is persisted unless
/// the whole merge succeeds.
fn merge_and_store(
    state: &AppState,
    room_id: &str,
    incoming: RoomDocument,
) -> ParlorResult<String> {
    let existing = state
        .store
        .get(room_id)?
        .and_then(|raw| decode_stored(&raw));

    let merged = merge_room_state(existing.as_ref(), incoming, state.clock.now_ms());
    let raw = serde_json::to_string(&merged)?;
    state.store.put(room_id, &raw)?;
    tracing::debug!(
        "write room={} merged (existing={}, {} chat items)",
        room_id,
        existing.is_some(),
        merged.chat.items.len()
    );
    Ok(raw)
}

async fn delete_room(State(state): State<AppState>, Query(query): Query<RoomQuery>) -> Response {
    let room_id = match query.valid_room_id() {
        Some(id) => id.to_string(),
        None => {
            tracing::warn!("DELETE with invalid room id");
            return text_response(StatusCode::BAD_REQUEST, "Invalid room id");
        }
    };

    match state.store.delete(&room_id) {
        Ok(()) => {
            tracing::debug!("DELETE room={}", room_id);
            empty_response(StatusCode::NO_CONTENT)
        }
        Err(e) => {
            tracing::error!("DELETE room={} store failure: {}", room_id, e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

async fn options_room() -> Response {
    (
        StatusCode::NO_CONTENT,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (
                header::ACCESS_CONTROL_ALLOW_METHODS,
                "GET,PUT,POST,DELETE,OPTIONS",
            ),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
            (header::ACCESS_CONTROL_MAX_AGE, "86400"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        "",
    )
        .into_response()
}

/// Build the room router over a store and a clock.
pub fn create_router(store: Arc<dyn RoomStore>, clock: Arc<dyn Clock>) -> Router {
    let state = AppState { store, clock };

    Router::new()
        .route(
            "/room",
            get(get_room)
                .put(write_room)
                .post(write_room)
                .delete(delete_room)
                .options(options_room),
        )
        .with_state(state)
}

/// Start the room server
pub async fn start_server(
    store: Arc<dyn RoomStore>,
    clock: Arc<dyn Clock>,
    port: u16,
) -> ParlorResult<()> {
    let router = create_router(store, clock);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    // Create shutdown channel
    let (tx, rx) = oneshot::channel::<()>();
    SHUTDOWN_TX.get_or_init(|| Mutex::new(Some(tx)));

    tracing::info!("Starting room server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| crate::error::ParlorError::Network(e.to_string()))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            rx.await.ok();
        })
        .await
        .map_err(|e| crate::error::ParlorError::Network(e.to_string()))?;

    Ok(())
}

/// Stop the room server
pub fn stop_server() {
    if let Some(mutex) = SHUTDOWN_TX.get() {
        if let Ok(mut guard) = mutex.lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(());
            }
        }
    }
}

// ============================================================================
// Tests - the endpoint is the convergence point; exercise it over real HTTP
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::models::{ChatMessage, PlayerSide};
    use crate::store::MemoryStore;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store wrapper that counts accesses, to prove invalid requests never
    /// reach the store.
    struct CountingStore {
        inner: MemoryStore,
        accesses: AtomicUsize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                accesses: AtomicUsize::new(0),
            }
        }
    }

    impl RoomStore for CountingStore {
        fn get(&self, room_id: &str) -> ParlorResult<Option<String>> {
            self.accesses.fetch_add(1, Ordering::SeqCst);
            self.inner.get(room_id)
        }
        fn put(&self, room_id: &str, raw: &str) -> ParlorResult<()> {
            self.accesses.fetch_add(1, Ordering::SeqCst);
            self.inner.put(room_id, raw)
        }
        fn delete(&self, room_id: &str) -> ParlorResult<()> {
            self.accesses.fetch_add(1, Ordering::SeqCst);
            self.inner.delete(room_id)
        }
    }

    /// A store whose every operation fails.
    struct BrokenStore;

    impl RoomStore for BrokenStore {
        fn get(&self, _room_id: &str) -> ParlorResult<Option<String>> {
            Err(crate::error::ParlorError::store("disk on fire"))
        }
        fn put(&self, _room_id: &str, _raw: &str) -> ParlorResult<()> {
            Err(crate::error::ParlorError::store("disk on fire"))
        }
        fn delete(&self, _room_id: &str) -> ParlorResult<()> {
            Err(crate::error::ParlorError::store("disk on fire"))
        }
    }

    async fn serve(store: Arc<dyn RoomStore>) -> String {
        let router = create_router(store, Arc::new(SystemClock));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/room")
    }

    fn v2_doc(deck_text: &str, deck_at: i64, by: &str) -> Value {
        json!({
            "v": 2,
            "updatedAt": deck_at,
            "updatedBy": by,
            "players": {"a": "", "b": "", "updatedAt": 0, "updatedBy": ""},
            "deck": {"text": deck_text, "updatedAt": deck_at, "updatedBy": by},
            "chat": {"items": [], "updatedAt": 0, "updatedBy": ""},
            "draw": {"last": null, "updatedAt": 0, "updatedBy": ""}
        })
    }

    #[tokio::test]
    async fn test_get_unknown_room_is_404() {
        let url = serve(Arc::new(MemoryStore::new())).await;
        let res = reqwest::get(format!("{url}?room=nope")).await.unwrap();
        assert_eq!(res.status(), 404);
        assert_eq!(res.headers()["cache-control"], "no-store");
        assert_eq!(res.text().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_invalid_room_id_is_400_with_no_store_access() {
        let store = Arc::new(CountingStore::new());
        let url = serve(store.clone()).await;
        let client = reqwest::Client::new();

        for target in [
            format!("{url}?room=..%2Fetc"),
            format!("{url}?room="),
            url.clone(),
        ] {
            let res = client.get(&target).send().await.unwrap();
            assert_eq!(res.status(), 400);
            assert_eq!(res.text().await.unwrap(), "Invalid room id");
        }
        let res = client
            .put(format!("{url}?room=%21%21%21"))
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 400);

        assert_eq!(store.accesses.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_room_id_alias_parameters() {
        let url = serve(Arc::new(MemoryStore::new())).await;
        let client = reqwest::Client::new();
        client
            .put(format!("{url}?roomId=alias-room"))
            .json(&v2_doc("Q1", 100, "c1"))
            .send()
            .await
            .unwrap();
        let res = client
            .get(format!("{url}?id=alias-room"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
    }

    #[tokio::test]
    async fn test_put_invalid_json_is_400() {
        let url = serve(Arc::new(MemoryStore::new())).await;
        let client = reqwest::Client::new();
        let res = client
            .put(format!("{url}?room=r1"))
            .body("{definitely not json")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 400);
        assert_eq!(res.text().await.unwrap(), "Invalid JSON");
    }

    #[tokio::test]
    async fn test_put_undecodable_document_is_400() {
        let store = Arc::new(MemoryStore::new());
        let url = serve(store.clone()).await;
        let client = reqwest::Client::new();
        let res = client
            .put(format!("{url}?room=r1"))
            .json(&json!({"v": 7, "something": "else"}))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 400);
        assert_eq!(res.text().await.unwrap(), "Invalid room state");
        // Rejected bodies never create the room.
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_put_creates_then_get_returns_stored_verbatim() {
        let store = Arc::new(MemoryStore::new());
        let url = serve(store.clone()).await;
        let client = reqwest::Client::new();

        let res = client
            .put(format!("{url}?room=r1"))
            .json(&v2_doc("Q1\nQ2", 100, "c1"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        let merged: Value = res.json().await.unwrap();
        assert_eq!(merged["deck"]["text"], "Q1\nQ2");
        // Document-level stamp is re-issued by the server.
        assert!(merged["updatedAt"].as_i64().unwrap() > 100);

        let got = client
            .get(format!("{url}?room=r1"))
            .send()
            .await
            .unwrap();
        assert_eq!(got.headers()["content-type"], "application/json; charset=utf-8");
        let body = got.text().await.unwrap();
        assert_eq!(body, store.get("r1").unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_two_client_converge_scenario() {
        // Client1 pushes a deck; Client2, which never pulled, pushes player
        // names against the now-populated room. Both edits must survive.
        let url = serve(Arc::new(MemoryStore::new())).await;
        let client = reqwest::Client::new();

        client
            .put(format!("{url}?room=game"))
            .json(&v2_doc("Q1\nQ2", 100, "c1"))
            .send()
            .await
            .unwrap();

        let mut from_c2 = v2_doc("", 0, "c2");
        from_c2["players"] = json!({"a": "X", "b": "", "updatedAt": 200, "updatedBy": "c2"});
        let res = client
            .put(format!("{url}?room=game"))
            .json(&from_c2)
            .send()
            .await
            .unwrap();
        let merged: Value = res.json().await.unwrap();
        assert_eq!(merged["deck"]["text"], "Q1\nQ2");
        assert_eq!(merged["players"]["a"], "X");
    }

    #[tokio::test]
    async fn test_put_accepts_legacy_document() {
        let url = serve(Arc::new(MemoryStore::new())).await;
        let client = reqwest::Client::new();
        let legacy = json!({
            "playerA": "Ann",
            "playerB": "Bo",
            "deckText": "Q1\nQ2",
            "chat": [{"side": "A", "text": "hi", "ts": 1000}],
            "updatedAt": 1000
        });
        let res = client
            .put(format!("{url}?room=old-room"))
            .json(&legacy)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        let merged: Value = res.json().await.unwrap();
        assert_eq!(merged["v"], 2);
        assert_eq!(merged["players"]["a"], "Ann");
        assert_eq!(merged["players"]["updatedAt"], 1000);
        assert_eq!(merged["chat"]["items"][0]["text"], "hi");
    }

    #[tokio::test]
    async fn test_chat_union_across_writes() {
        let url = serve(Arc::new(MemoryStore::new())).await;
        let client = reqwest::Client::new();

        let msg = |id: &str, text: &str, ts: i64| {
            serde_json::to_value(ChatMessage {
                id: id.into(),
                side: PlayerSide::A,
                text: text.into(),
                ts,
            })
            .unwrap()
        };

        let mut first = v2_doc("", 0, "c1");
        first["chat"] = json!({"items": [msg("1", "one", 10)], "updatedAt": 10, "updatedBy": "c1"});
        client
            .put(format!("{url}?room=chatty"))
            .json(&first)
            .send()
            .await
            .unwrap();

        let mut second = v2_doc("", 0, "c2");
        second["chat"] =
            json!({"items": [msg("2", "two", 20)], "updatedAt": 20, "updatedBy": "c2"});
        let res = client
            .put(format!("{url}?room=chatty"))
            .json(&second)
            .send()
            .await
            .unwrap();
        let merged: Value = res.json().await.unwrap();
        let items = merged["chat"]["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["text"], "one");
        assert_eq!(items[1]["text"], "two");
    }

    #[tokio::test]
    async fn test_draw_tie_break_favors_incoming() {
        let url = serve(Arc::new(MemoryStore::new())).await;
        let client = reqwest::Client::new();

        let draw = |text: &str, by: &str| {
            json!({"last": {"ok": true, "player": null, "text": text, "ts": 1000, "id": "d1", "by": by}, "updatedAt": 1000, "updatedBy": by})
        };

        let mut first = v2_doc("", 0, "c1");
        first["draw"] = draw("existing prompt", "c1");
        client
            .put(format!("{url}?room=draws"))
            .json(&first)
            .send()
            .await
            .unwrap();

        let mut second = v2_doc("", 0, "c2");
        second["draw"] = draw("incoming prompt", "c2");
        let res = client
            .put(format!("{url}?room=draws"))
            .json(&second)
            .send()
            .await
            .unwrap();
        let merged: Value = res.json().await.unwrap();
        assert_eq!(merged["draw"]["last"]["text"], "incoming prompt");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let url = serve(store.clone()).await;
        let client = reqwest::Client::new();

        client
            .put(format!("{url}?room=gone"))
            .json(&v2_doc("Q1", 100, "c1"))
            .send()
            .await
            .unwrap();
        assert!(!store.is_empty());

        for _ in 0..2 {
            let res = client
                .delete(format!("{url}?room=gone"))
                .send()
                .await
                .unwrap();
            assert_eq!(res.status(), 204);
        }
        assert!(store.is_empty());

        let res = client.get(format!("{url}?room=gone")).send().await.unwrap();
        assert_eq!(res.status(), 404);
    }

    #[tokio::test]
    async fn test_options_preflight() {
        let url = serve(Arc::new(MemoryStore::new())).await;
        let client = reqwest::Client::new();
        let res = client
            .request(reqwest::Method::OPTIONS, format!("{url}?room=r1"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 204);
        assert_eq!(res.headers()["access-control-allow-origin"], "*");
        assert_eq!(
            res.headers()["access-control-allow-methods"],
            "GET,PUT,POST,DELETE,OPTIONS"
        );
        assert_eq!(res.headers()["cache-control"], "no-store");
    }

    #[tokio::test]
    async fn test_store_failure_is_500() {
        let url = serve(Arc::new(BrokenStore)).await;
        let client = reqwest::Client::new();

        let res = client.get(format!("{url}?room=r1")).send().await.unwrap();
        assert_eq!(res.status(), 500);
        assert_eq!(res.text().await.unwrap(), "Internal error");

        let res = client
            .put(format!("{url}?room=r1"))
            .json(&v2_doc("Q1", 100, "c1"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 500);
    }

    #[tokio::test]
    async fn test_corrupt_stored_blob_treated_as_absent() {
        let store = Arc::new(MemoryStore::new());
        store.put("r1", "}}} not json {{{").unwrap();
        let url = serve(store.clone()).await;
        let client = reqwest::Client::new();

        let res = client
            .put(format!("{url}?room=r1"))
            .json(&v2_doc("Q1", 100, "c1"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        let merged: Value = res.json().await.unwrap();
        assert_eq!(merged["deck"]["text"], "Q1");
    }
}
