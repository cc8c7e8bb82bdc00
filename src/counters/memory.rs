use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{CounterError, CounterStore, WindowCount};

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    expires_at: Instant,
}

/// In-process counters keyed by client. The map lock is held across the
/// whole read-modify-write, which is what makes increments atomic here.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    windows: Mutex<HashMap<String, Window>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop windows that have already reset.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, window| window.expires_at > now);
        before - windows.len()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment_in_window(&self, key: &str, window: Duration) -> Result<WindowCount, CounterError> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        let entry = windows
            .entry(key.to_string())
            .and_modify(|current| {
                if current.expires_at <= now {
                    *current = Window { count: 0, expires_at: now + window };
                }
            })
            .or_insert(Window { count: 0, expires_at: now + window });
        entry.count += 1;

        Ok(WindowCount {
            count: entry.count,
            resets_in: entry.expires_at.saturating_duration_since(now),
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test(start_paused = true)]
    async fn test_window_is_fixed_not_sliding() {
        let store = MemoryCounterStore::new();

        let first = store.increment_in_window("10.0.0.1", HOUR).await.unwrap();
        assert_eq!(first, WindowCount { count: 1, resets_in: HOUR });

        tokio::time::advance(Duration::from_secs(1800)).await;
        let second = store.increment_in_window("10.0.0.1", HOUR).await.unwrap();
        assert_eq!(second.count, 2);
        assert_eq!(second.resets_in, Duration::from_secs(1800));

        tokio::time::advance(Duration::from_secs(1800)).await;
        let reset = store.increment_in_window("10.0.0.1", HOUR).await.unwrap();
        assert_eq!(reset, WindowCount { count: 1, resets_in: HOUR });
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = MemoryCounterStore::new();
        store.increment_in_window("a", HOUR).await.unwrap();
        store.increment_in_window("a", HOUR).await.unwrap();
        let b = store.increment_in_window("b", HOUR).await.unwrap();
        assert_eq!(b.count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryCounterStore::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.increment_in_window("shared", HOUR).await.unwrap().count
            }));
        }

        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap());
        }
        counts.sort_unstable();
        assert_eq!(counts, (1..=50).collect::<Vec<u64>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = MemoryCounterStore::new();
        store.increment_in_window("old", Duration::from_secs(10)).await.unwrap();
        store.increment_in_window("new", HOUR).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.purge_expired().await, 1);
    }
}
