//! ParlorCore - core library for the Parlor shared prompt-deck session.
//!
//! Two participants share a live room (player names, a prompt deck, a chat
//! log, the last drawn prompt) across independent devices, with no persistent
//! connection and no central authority beyond one key-value blob per room.
//! This library provides:
//! - The room document model and its strict JSON codec (v2 + legacy v1 lift)
//! - Field-level last-write-wins merge and the deduplicating chat-log union
//! - The client sync engine (dirty tracking, debounced push, periodic pull)
//! - The server merge endpoint (axum), which re-merges on every write
//! - Prompt deck parsing and draw selection
//!
//! The protocol offers eventual, field-wise convergence, not strong
//! consistency: per-field timestamps decide winners, chat merges by message
//! identity, and every failure path degrades to "no-op, retry next cycle".
//!
//! # Feature Flags
//!
//! - `server`: Include HTTP server components (axum). Not needed by
//!   embedders that only run the client engine.

pub mod cache;
pub mod chat;
pub mod clock;
pub mod codec;
pub mod config;
pub mod draw;
pub mod error;
pub mod merge;
pub mod models;
pub mod scheduler;
pub mod store;
pub mod sync_client;
#[cfg(feature = "server")]
pub mod sync_server;
pub mod validation;

// Re-export commonly used types
pub use cache::{Clipboard, LocalCache, MemoryCache};
pub use clock::{Clock, SystemClock};
pub use config::SessionConfig;
pub use error::{ParlorError, ParlorResult};
pub use models::{ChatMessage, DrawResult, PlayerSide, RoomDocument};
pub use store::{MemoryStore, RoomStore};
pub use sync_client::{RoomSession, RoomStatus};
