//! Background indexer (C11): a {Stopped, Running} state machine that owns
//! two cooperative tasks — a periodic reindexer and a debounce processor —
//! communicating with the filesystem watcher through a bounded channel
//! rather than shared mutable state (§9 Design Notes).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::indexer::Indexer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Copy)]
pub struct BackgroundIndexerConfig {
    pub interval: Duration,
    pub debounce_interval: Duration,
    pub max_pending_files: usize,
}

impl Default for BackgroundIndexerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            debounce_interval: Duration::from_secs(1),
            max_pending_files: 200,
        }
    }
}

pub struct BackgroundIndexer {
    indexer: Arc<Indexer>,
    config: BackgroundIndexerConfig,
    state: Mutex<State>,
    pending_tx: mpsc::Sender<(PathBuf, Instant)>,
    pending_rx: Mutex<Option<mpsc::Receiver<(PathBuf, Instant)>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl BackgroundIndexer {
    #[must_use]
    pub fn new(indexer: Arc<Indexer>, config: BackgroundIndexerConfig) -> Self {
        let (pending_tx, pending_rx) = mpsc::channel(1024);
        Self {
            indexer,
            config,
            state: Mutex::new(State::Stopped),
            pending_tx,
            pending_rx: Mutex::new(Some(pending_rx)),
            tasks: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// The watcher callback's entry point: push a changed path with its
    /// event time onto the pending channel. Never blocks the watcher on a
    /// full channel by dropping the event (backpressure here would stall
    /// filesystem event delivery).
    pub fn notify(&self, path: PathBuf) {
        let _ = self.pending_tx.try_send((path, Instant::now()));
    }

    pub async fn state(&self) -> State {
        *self.state.lock().await
    }

    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state == State::Running {
            return Ok(());
        }

        let Some(pending_rx) = self.pending_rx.lock().await.take() else {
            *state = State::Running;
            return Ok(());
        };

        let mut tasks = self.tasks.lock().await;

        let periodic_indexer = Arc::clone(&self.indexer);
        let periodic_cancel = self.cancel.clone();
        let interval = self.config.interval;
        tasks.push(tokio::spawn(async move {
            periodic_reindex_loop(periodic_indexer, interval, periodic_cancel).await;
        }));

        let debounce_indexer = Arc::clone(&self.indexer);
        let debounce_cancel = self.cancel.clone();
        let debounce_interval = self.config.debounce_interval;
        let max_pending_files = self.config.max_pending_files;
        tasks.push(tokio::spawn(async move {
            debounce_loop(debounce_indexer, pending_rx, debounce_interval, max_pending_files, debounce_cancel).await;
        }));

        *state = State::Running;
        Ok(())
    }

    /// Cancel both tasks and persist the index.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state == State::Stopped {
            return Ok(());
        }

        self.cancel.cancel();
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }

        *state = State::Stopped;
        self.indexer.persist()
    }
}

async fn periodic_reindex_loop(indexer: Arc<Indexer>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; skip it
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if let Err(err) = indexer.index_changed(&cancel).await {
                    tracing::warn!(error = %err, "periodic reindex failed");
                }
            }
        }
    }
}

async fn debounce_loop(
    indexer: Arc<Indexer>,
    mut pending_rx: mpsc::Receiver<(PathBuf, Instant)>,
    debounce_interval: Duration,
    max_pending_files: usize,
    cancel: CancellationToken,
) {
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
    let mut ticker = tokio::time::interval(debounce_interval / 2);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            Some((path, event_time)) = pending_rx.recv() => {
                pending.insert(path, event_time);
                if pending.len() >= max_pending_files {
                    flush(&indexer, &mut pending, &cancel).await;
                }
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                let stale: Vec<PathBuf> = pending
                    .iter()
                    .filter(|(_, &event_time)| now.duration_since(event_time) >= debounce_interval)
                    .map(|(path, _)| path.clone())
                    .collect();
                if !stale.is_empty() {
                    for path in &stale {
                        pending.remove(path);
                    }
                    if let Err(err) = indexer.index_files(stale, &cancel).await {
                        tracing::warn!(error = %err, "debounced reindex failed");
                    }
                }
            }
        }
    }
}

async fn flush(indexer: &Arc<Indexer>, pending: &mut HashMap<PathBuf, Instant>, cancel: &CancellationToken) {
    let paths: Vec<PathBuf> = pending.drain().map(|(path, _)| path).collect();
    if let Err(err) = indexer.index_files(paths, cancel).await {
        tracing::warn!(error = %err, "pending-size flush failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed_cache::EmbeddingCache;
    use crate::embedder::Embedder;
    use crate::error::IndexError;
    use crate::indexer::IndexerConfig;

    struct NoopEmbedder;

    #[async_trait::async_trait]
    impl Embedder for NoopEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, IndexError> {
            Ok(texts.iter().map(|_| vec![0.0]).collect())
        }
    }

    fn make_background(dir: &std::path::Path) -> BackgroundIndexer {
        let cache = Arc::new(EmbeddingCache::load(dir.join("embeddings.gob"), Duration::from_secs(3600)));
        let embedder: Arc<dyn Embedder> = Arc::new(NoopEmbedder);
        let indexer = Arc::new(Indexer::new(
            dir.to_path_buf(),
            dir.join("index.json"),
            cache,
            embedder,
            IndexerConfig::default(),
        ));
        BackgroundIndexer::new(indexer, BackgroundIndexerConfig {
            interval: Duration::from_secs(3600),
            debounce_interval: Duration::from_millis(50),
            max_pending_files: 3,
        })
    }

    #[tokio::test]
    async fn start_transitions_to_running_then_stop_to_stopped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bg = make_background(dir.path());
        assert_eq!(bg.state().await, State::Stopped);
        bg.start().await.expect("start");
        assert_eq!(bg.state().await, State::Running);
        bg.stop().await.expect("stop");
        assert_eq!(bg.state().await, State::Stopped);
    }

    #[tokio::test]
    async fn debounced_notify_eventually_indexes_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.rs"), "fn a() {}\n").expect("write");

        let bg = make_background(dir.path());
        bg.start().await.expect("start");
        bg.notify(dir.path().join("a.rs"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        bg.stop().await.expect("stop");

        assert!(dir.path().join("index.json").exists());
    }
}
