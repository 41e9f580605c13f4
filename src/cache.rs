//! Client-side platform collaborators.
//!
//! The sync engine persists its shadow state through a small key-value cache
//! and shares text through an opaque clipboard capability. Both are traits so
//! embedders can plug in whatever the platform provides; the in-memory
//! implementations cover tests and ephemeral sessions.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;

/// Key-value cache for a client's own copy of its fields.
///
/// Writes are best-effort: a cache that cannot store a value drops it
/// silently, and the engine keeps working from memory.
pub trait LocalCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// In-memory cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value.to_string());
        }
    }
}

/// Load a JSON value from the cache. Missing or malformed content loads as
/// nothing.
pub fn load_json(cache: &dyn LocalCache, key: &str) -> Option<Value> {
    let text = cache.get(key)?;
    serde_json::from_str(&text).ok()
}

/// Store a value as JSON. Serialization failures are dropped.
pub fn save_json<T: Serialize>(cache: &dyn LocalCache, key: &str, value: &T) {
    if let Ok(text) = serde_json::to_string(value) {
        cache.set(key, &text);
    }
}

/// Clipboard-write capability. UI plumbing (fallback strategies, focus
/// handling) lives outside the core; the engine only needs "copy this text,
/// did it work".
pub trait Clipboard: Send + Sync {
    fn copy_text(&self, text: &str) -> bool;
}

/// A clipboard that accepts nothing. Useful where no clipboard exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullClipboard;

impl Clipboard for NullClipboard {
    fn copy_text(&self, _text: &str) -> bool {
        false
    }
}
