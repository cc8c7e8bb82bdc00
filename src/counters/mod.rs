//! Fixed-window admission counters
//!
//! A counter is created by the first increment in a window, which also sets
//! its expiry to the window length. Later increments never move the expiry,
//! so every key resets exactly once per window.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

pub use self::memory::MemoryCounterStore;
pub use self::redis::RedisCounterStore;

#[derive(Debug, thiserror::Error)]
pub enum CounterError {
    #[error("counter store connection error: {0}")]
    Connection(String),

    #[error("counter store error: {0}")]
    Backend(String),
}

/// Post-increment state of one window counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    /// Time until the window resets.
    pub resets_in: Duration,
}

#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    /// Atomically increment `key` and read the new value. The first increment
    /// of a window arms the expiry at `window`.
    async fn increment_in_window(&self, key: &str, window: Duration) -> Result<WindowCount, CounterError>;

    fn backend_name(&self) -> &'static str;
}
