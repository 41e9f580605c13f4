//! Cancelable task slots.
//!
//! The engine runs two kinds of background work: a debounced push and a
//! periodic poll. Each kind owns exactly one [`TaskSlot`]; arming a slot
//! always cancels the prior instance first, so a burst of edits coalesces
//! into one push and re-joining a room replaces the old poll loop instead of
//! stacking a second one.

use std::future::Future;

use tokio::task::JoinHandle;

/// Holder for at most one running background task.
#[derive(Debug, Default)]
pub struct TaskSlot {
    handle: Option<JoinHandle<()>>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `future`, canceling whatever the slot was running before.
    pub fn arm<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(future));
    }

    /// Abort the running task, if any.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Whether a task has been armed and has not been canceled.
    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
