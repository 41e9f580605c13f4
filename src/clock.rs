//! Time source for protocol stamps.
//!
//! Every merge decision in the protocol compares wall-clock millisecond
//! timestamps. The engine and the server take the clock as a trait object so
//! tests can pin time exactly.

use chrono::Utc;

/// Source of wall-clock timestamps (milliseconds since the Unix epoch).
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// System wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}
