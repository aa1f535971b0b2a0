use crate::clock::{system_clock, Clock};
use crate::error::{ResilienceError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Counter state for one key inside its current window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub count: u64,
    pub expires_at: DateTime<Utc>,
}

impl WindowSnapshot {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Backing store for fixed-window counters.
///
/// `increment` must be atomic per key: concurrent callers on the same key
/// each observe a distinct count. When no window is active (first request, or
/// the previous window expired) the store starts a new one at `count = 1`
/// expiring `window` from now.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowSnapshot>;

    /// Current window for `key`, or `None` when no window is active.
    async fn snapshot(&self, key: &str) -> Result<Option<WindowSnapshot>>;

    async fn ping(&self) -> Result<()>;

    /// Drop windows that have expired. Returns how many keys were removed.
    /// Stores whose entries expire on their own keep the default.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

type WindowCell = Mutex<Option<WindowSnapshot>>;

/// Process-local counter store.
///
/// Increments run under the map's read lock plus the key's own mutex, so keys
/// never contend with each other. Purging takes the write lock and so can never
/// drop a cell while an increment is updating it.
#[derive(Debug)]
pub struct InMemoryCounterStore {
    windows: RwLock<HashMap<String, WindowCell>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            clock,
        }
    }

    fn advance(cell: &WindowCell, now: DateTime<Utc>, window: chrono::Duration) -> WindowSnapshot {
        let mut guard = cell.lock().unwrap_or_else(|e| e.into_inner());
        let next = match *guard {
            Some(current) if !current.is_expired(now) => WindowSnapshot {
                count: current.count.saturating_add(1),
                expires_at: current.expires_at,
            },
            _ => WindowSnapshot {
                count: 1,
                expires_at: now + window,
            },
        };
        *guard = Some(next);
        next
    }

    fn active(cell: &WindowCell, now: DateTime<Utc>) -> Option<WindowSnapshot> {
        let guard = cell.lock().unwrap_or_else(|e| e.into_inner());
        (*guard).filter(|snapshot| !snapshot.is_expired(now))
    }

    pub async fn active_keys(&self) -> usize {
        let now = self.clock.now();
        self.windows
            .read()
            .await
            .values()
            .filter(|cell| Self::active(cell, now).is_some())
            .count()
    }

    /// Number of keys held, expired or not
    pub async fn len(&self) -> usize {
        self.windows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.windows.read().await.is_empty()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowSnapshot> {
        let window = chrono::Duration::from_std(window)
            .map_err(|e| ResilienceError::invalid_config(format!("rate limit window: {e}")))?;

        {
            let windows = self.windows.read().await;
            if let Some(cell) = windows.get(key) {
                return Ok(Self::advance(cell, self.clock.now(), window));
            }
        }

        let mut windows = self.windows.write().await;
        let cell = windows
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(None));
        Ok(Self::advance(cell, self.clock.now(), window))
    }

    async fn snapshot(&self, key: &str) -> Result<Option<WindowSnapshot>> {
        let now = self.clock.now();
        let windows = self.windows.read().await;
        Ok(windows.get(key).and_then(|cell| Self::active(cell, now)))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut windows = self.windows.write().await;
        let before = windows.len();

        windows.retain(|_, cell| Self::active(cell, now).is_some());

        let removed = before - windows.len();
        if removed > 0 {
            debug!("Purged {} expired rate limit windows", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn test_window_starts_at_one_and_expires() {
        let clock = ManualClock::default();
        let store = InMemoryCounterStore::with_clock(Arc::new(clock.clone()));
        let window = Duration::from_secs(60);

        assert_eq!(store.increment("k", window).await.unwrap().count, 1);
        assert_eq!(store.increment("k", window).await.unwrap().count, 2);

        clock.advance(chrono::Duration::seconds(60));
        assert!(store.snapshot("k").await.unwrap().is_none());

        let fresh = store.increment("k", window).await.unwrap();
        assert_eq!(fresh.count, 1);
        assert_eq!(fresh.expires_at, clock.now() + chrono::Duration::seconds(60));
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_active_windows() {
        let clock = ManualClock::default();
        let store = InMemoryCounterStore::with_clock(Arc::new(clock.clone()));

        store.increment("short", Duration::from_secs(10)).await.unwrap();
        store.increment("long", Duration::from_secs(120)).await.unwrap();
        clock.advance(chrono::Duration::seconds(30));

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.active_keys().await, 1);
        assert!(store.snapshot("long").await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_purge_never_resets_a_live_window() {
        let store = Arc::new(InMemoryCounterStore::new());
        let window = Duration::from_secs(60);

        let purger = {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    store.purge_expired().await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        for round in 0..200 {
            let key = format!("client-{round}");
            let callers: Vec<_> = (0..4)
                .map(|_| {
                    let store = store.clone();
                    let key = key.clone();
                    tokio::spawn(async move { store.increment(&key, window).await.unwrap().count })
                })
                .collect();

            let mut counts = Vec::new();
            for caller in callers {
                counts.push(caller.await.unwrap());
            }
            counts.sort_unstable();
            assert_eq!(counts, vec![1, 2, 3, 4], "key {key}");
        }

        purger.await.unwrap();
        assert_eq!(store.len().await, 200);
    }
}
