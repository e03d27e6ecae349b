//! Client pool (C7): an LRU cache of initialized clients keyed by
//! `(provider, model)`.
//!
//! Per §9 Design Notes, the teacher's process-wide singleton is reified
//! here as an explicit owner: callers construct a `ClientPool`, own it for
//! the lifetime of the session, and tests build a fresh one per case.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use forge_types::ClientIdentity;
use lru::LruCache;
use tokio::sync::Mutex;

use crate::client::ProviderClient;

const DEFAULT_CAPACITY: usize = 16;
const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(15 * 60);

struct Entry {
    client: Arc<dyn ProviderClient>,
    last_touched: Instant,
}

struct State {
    entries: LruCache<ClientIdentity, Entry>,
    closed: bool,
}

/// A bounded map keyed by `(provider, model)` -> client, safe under
/// concurrent use via a single coarse mutex covering both the map and the
/// LRU order (§5 Shared-resource policy).
pub struct ClientPool {
    state: Mutex<State>,
    idle_ttl: Duration,
}

impl ClientPool {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                entries: LruCache::new(
                    NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1"),
                ),
                closed: false,
            }),
            idle_ttl: DEFAULT_IDLE_TTL,
        }
    }

    #[must_use]
    pub fn with_idle_ttl(capacity: usize, idle_ttl: Duration) -> Self {
        Self {
            idle_ttl,
            ..Self::new(capacity)
        }
    }

    /// Touches the entry's LRU position. Returns `None` if absent or if
    /// the pool has been closed.
    pub async fn get(&self, identity: &ClientIdentity) -> Option<Arc<dyn ProviderClient>> {
        let mut state = self.state.lock().await;
        if state.closed {
            return None;
        }
        let entry = state.entries.get_mut(identity)?;
        entry.last_touched = Instant::now();
        Some(Arc::clone(&entry.client))
    }

    /// Insert a client, evicting the least-recently-used entry if at
    /// capacity. The evicted client (if any) is closed after the lock is
    /// released. No-op (dropping `client`) if the pool is closed.
    pub async fn put(&self, identity: ClientIdentity, client: Arc<dyn ProviderClient>) {
        let evicted = {
            let mut state = self.state.lock().await;
            if state.closed {
                return;
            }
            state.entries.push(
                identity,
                Entry {
                    client,
                    last_touched: Instant::now(),
                },
            )
        };
        if let Some((_, entry)) = evicted {
            entry.client.close().await;
        }
    }

    /// Remove every entry idle beyond the configured TTL, closing each.
    pub async fn cleanup_idle(&self) {
        let expired = {
            let mut state = self.state.lock().await;
            if state.closed {
                return;
            }
            let now = Instant::now();
            let stale: Vec<ClientIdentity> = state
                .entries
                .iter()
                .filter(|(_, e)| now.duration_since(e.last_touched) > self.idle_ttl)
                .map(|(k, _)| k.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|k| state.entries.pop(&k))
                .collect::<Vec<_>>()
        };
        for entry in expired {
            entry.client.close().await;
        }
    }

    /// Close every entry and mark the pool closed. Further `get`/`put`
    /// return not-found / no-op.
    pub async fn close(&self) {
        let entries = {
            let mut state = self.state.lock().await;
            state.closed = true;
            let mut drained = Vec::new();
            while let Some((_, entry)) = state.entries.pop_lru() {
                drained.push(entry);
            }
            drained
        };
        for entry in entries {
            entry.client.close().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }
}

impl Default for ClientPool {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::ratelimit::RateLimiter;
    use crate::stream::{self, ChunkStream};
    use forge_types::{Part, Provider, ToolDefinition, Turn};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    struct StubClient {
        model: String,
        closed: AtomicBool,
    }

    #[async_trait::async_trait]
    impl ProviderClient for StubClient {
        async fn send_with_history(
            &self,
            _cancel: &CancellationToken,
            _history: &[Turn],
            _new_message: Turn,
        ) -> Result<ChunkStream, ClientError> {
            let (_tx, rx) = stream::channel();
            Ok(rx)
        }

        async fn send_tool_responses(
            &self,
            _cancel: &CancellationToken,
            _history: &[Turn],
            _responses: Vec<Part>,
        ) -> Result<ChunkStream, ClientError> {
            let (_tx, rx) = stream::channel();
            Ok(rx)
        }

        fn set_tools(&self, _tools: Vec<ToolDefinition>) {}
        fn set_system_instruction(&self, _instruction: Option<String>) {}
        fn set_rate_limiter(&self, _limiter: Arc<dyn RateLimiter>) {}
        fn count_tokens(&self, _history: &[Turn]) -> u32 {
            0
        }
        fn get_model(&self) -> &str {
            &self.model
        }
        fn with_model(self: Arc<Self>, new_model: String) -> Arc<dyn ProviderClient> {
            Arc::new(StubClient {
                model: new_model,
                closed: AtomicBool::new(false),
            })
        }
        fn identity(&self) -> ClientIdentity {
            ClientIdentity::new(Provider::Ollama, self.model.clone())
        }
        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn stub(model: &str) -> Arc<StubClient> {
        Arc::new(StubClient {
            model: model.to_string(),
            closed: AtomicBool::new(false),
        })
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let pool = ClientPool::new(2);
        let id = ClientIdentity::new(Provider::Ollama, "llama3".to_string());
        pool.put(id.clone(), stub("llama3")).await;
        assert!(pool.get(&id).await.is_some());
    }

    #[tokio::test]
    async fn eviction_at_capacity_closes_evicted_client() {
        let pool = ClientPool::new(1);
        let a = ClientIdentity::new(Provider::Ollama, "a".to_string());
        let b = ClientIdentity::new(Provider::Ollama, "b".to_string());
        let client_a = stub("a");
        pool.put(a.clone(), client_a.clone()).await;
        pool.put(b.clone(), stub("b")).await;

        assert!(pool.get(&a).await.is_none());
        assert!(pool.get(&b).await.is_some());
        assert!(client_a.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn close_marks_pool_closed_and_rejects_further_ops() {
        let pool = ClientPool::new(4);
        let id = ClientIdentity::new(Provider::Ollama, "a".to_string());
        pool.put(id.clone(), stub("a")).await;
        pool.close().await;
        assert!(pool.get(&id).await.is_none());
        pool.put(id.clone(), stub("a")).await;
        assert_eq!(pool.len().await, 0);
    }

    #[tokio::test]
    async fn cleanup_idle_closes_stale_entries_only() {
        let pool = ClientPool::with_idle_ttl(4, Duration::from_millis(10));
        let id = ClientIdentity::new(Provider::Ollama, "a".to_string());
        let client = stub("a");
        pool.put(id.clone(), client.clone()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.cleanup_idle().await;
        assert!(client.closed.load(Ordering::SeqCst));
        assert_eq!(pool.len().await, 0);
        let _ = AtomicUsize::new(0);
    }
}
