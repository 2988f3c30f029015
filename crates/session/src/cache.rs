//! Provider-executor cache (C2, §4.2): an LRU+TTL table keyed by
//! `chatbotId`, holding one connected executor per key.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use voicecore_config::ExecutorCacheConfig;
use voicecore_types::session::ChatbotId;
use voicecore_types::ProviderExecutor;

struct Entry {
    executor: Arc<dyn ProviderExecutor>,
    last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EntryStats {
    pub chatbot_id: ChatbotId,
    pub idle_secs: i64,
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub inactivity_ttl_secs: u64,
    pub entries: Vec<EntryStats>,
}

/// All mutations serialize on one lock (§4.2 Concurrency); readers never
/// observe a half-inserted entry.
pub struct ExecutorCache {
    entries: RwLock<HashMap<ChatbotId, Entry>>,
    config: ExecutorCacheConfig,
}

impl ExecutorCache {
    pub fn new(config: ExecutorCacheConfig) -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            config,
        })
    }

    fn ttl(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.config.inactivity_ttl_secs as i64)
    }

    /// Returns the cached executor and refreshes `lastActivity`, evicting
    /// (and disconnecting) it first if it has expired.
    pub async fn get(&self, chatbot_id: &str) -> Option<Arc<dyn ProviderExecutor>> {
        let now = Utc::now();
        let expired = {
            let mut entries = self.entries.write();
            match entries.get_mut(chatbot_id) {
                Some(entry) if now - entry.last_activity <= self.ttl() => {
                    entry.last_activity = now;
                    return Some(Arc::clone(&entry.executor));
                }
                Some(_) => entries.remove(chatbot_id),
                None => None,
            }
        };
        if let Some(entry) = expired {
            entry.executor.disconnect().await;
        }
        None
    }

    /// Inserts `executor` under `chatbot_id`, evicting the least-recently
    /// -used entry first if the cache is full and the key is new. The
    /// evicted executor is disconnected before its entry is dropped
    /// (§3 invariant: eviction strictly prefers LRU; §8 invariant 3:
    /// disconnect precedes removal).
    pub async fn set(&self, chatbot_id: ChatbotId, executor: Arc<dyn ProviderExecutor>) {
        let evicted = {
            let mut entries = self.entries.write();
            let evicted = if !entries.contains_key(&chatbot_id) && entries.len() >= self.config.max_size
            {
                entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_activity)
                    .map(|(key, _)| key.clone())
                    .and_then(|key| entries.remove(&key).map(|entry| entry.executor))
            } else {
                None
            };
            entries.insert(
                chatbot_id,
                Entry {
                    executor,
                    last_activity: Utc::now(),
                },
            );
            evicted
        };
        if let Some(executor) = evicted {
            executor.disconnect().await;
        }
    }

    /// Disconnects and removes the entry for `chatbot_id`, if any.
    pub async fn invalidate(&self, chatbot_id: &str) {
        let removed = self.entries.write().remove(chatbot_id).map(|e| e.executor);
        if let Some(executor) = removed {
            executor.disconnect().await;
        }
    }

    /// Disconnects every entry and empties the map.
    pub async fn clear(&self) {
        let drained: Vec<_> = self.entries.write().drain().map(|(_, e)| e.executor).collect();
        for executor in drained {
            executor.disconnect().await;
        }
    }

    pub fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let entries = self.entries.read();
        CacheStats {
            size: entries.len(),
            max_size: self.config.max_size,
            inactivity_ttl_secs: self.config.inactivity_ttl_secs,
            entries: entries
                .iter()
                .map(|(chatbot_id, entry)| EntryStats {
                    chatbot_id: chatbot_id.clone(),
                    idle_secs: (now - entry.last_activity).num_seconds(),
                })
                .collect(),
        }
    }

    /// Evicts every entry past its TTL. Called on `cleanupInterval`.
    async fn evict_expired(&self) {
        let now = Utc::now();
        let ttl = self.ttl();
        let expired: Vec<_> = {
            let mut entries = self.entries.write();
            let expired_keys: Vec<_> = entries
                .iter()
                .filter(|(_, entry)| now - entry.last_activity > ttl)
                .map(|(key, _)| key.clone())
                .collect();
            expired_keys
                .into_iter()
                .filter_map(|key| entries.remove(&key))
                .map(|entry| entry.executor)
                .collect()
        };
        for executor in expired {
            executor.disconnect().await;
        }
    }

    /// Spawns the periodic expiry sweep (§4.2 "Background task every
    /// `cleanupInterval`"). The returned sender stops the loop.
    pub fn start_cleanup_task(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let cache = Arc::clone(self);
        let cleanup_interval = Duration::from_secs(cache.config.cleanup_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = interval(cleanup_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => cache.evict_expired().await,
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        shutdown_tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use voicecore_types::executor::{ExecutorError, ExecutorEvent};

    struct FakeExecutor {
        connected: AtomicBool,
    }

    impl FakeExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                connected: AtomicBool::new(true),
            })
        }
    }

    #[async_trait]
    impl ProviderExecutor for FakeExecutor {
        async fn connect(&self) -> Result<(), ExecutorError> {
            Ok(())
        }
        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }
        async fn send_audio(&self, _pcm16: &[u8]) -> Result<(), ExecutorError> {
            Ok(())
        }
        async fn cancel_response(&self) {}
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        fn is_speaking(&self) -> bool {
            false
        }
        fn subscribe(&self) -> tokio::sync::mpsc::Receiver<ExecutorEvent> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            rx
        }
    }

    fn config(max_size: usize) -> ExecutorCacheConfig {
        ExecutorCacheConfig {
            max_size,
            inactivity_ttl_secs: 3600,
            cleanup_interval_secs: 900,
        }
    }

    #[tokio::test]
    async fn set_then_get_refreshes_activity() {
        let cache = ExecutorCache::new(config(10));
        let executor = FakeExecutor::new();
        cache.set("bot-1".to_string(), executor.clone()).await;
        let fetched = cache.get("bot-1").await;
        assert!(fetched.is_some());
        assert!(executor.is_connected());
    }

    #[tokio::test]
    async fn eviction_disconnects_the_lru_entry_before_removal() {
        let cache = ExecutorCache::new(config(1));
        let first = FakeExecutor::new();
        let second = FakeExecutor::new();
        cache.set("bot-1".to_string(), first.clone()).await;
        cache.set("bot-2".to_string(), second.clone()).await;
        assert!(!first.is_connected(), "LRU entry must be disconnected on eviction");
        assert!(second.is_connected());
        assert_eq!(cache.stats().size, 1);
    }

    #[tokio::test]
    async fn invalidate_disconnects_and_removes() {
        let cache = ExecutorCache::new(config(10));
        let executor = FakeExecutor::new();
        cache.set("bot-1".to_string(), executor.clone()).await;
        cache.invalidate("bot-1").await;
        assert!(!executor.is_connected());
        assert!(cache.get("bot-1").await.is_none());
    }

    #[tokio::test]
    async fn clear_disconnects_every_entry() {
        let cache = ExecutorCache::new(config(10));
        let a = FakeExecutor::new();
        let b = FakeExecutor::new();
        cache.set("bot-1".to_string(), a.clone()).await;
        cache.set("bot-2".to_string(), b.clone()).await;
        cache.clear().await;
        assert!(!a.is_connected());
        assert!(!b.is_connected());
        assert_eq!(cache.stats().size, 0);
    }

    #[tokio::test]
    async fn stats_report_size_and_idle_time() {
        let cache = ExecutorCache::new(config(10));
        cache.set("bot-1".to_string(), FakeExecutor::new()).await;
        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.max_size, 10);
        assert_eq!(stats.entries.len(), 1);
        assert_eq!(stats.entries[0].chatbot_id, "bot-1");
    }
}
