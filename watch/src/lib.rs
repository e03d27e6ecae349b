//! Filesystem watcher (C14): watches a project tree with `notify`, drops
//! temp-file noise at the source, coalesces per-path events, and flushes
//! stable changes to a consumer channel after a debounce window.
//!
//! Grounded on the same cooperative-task/channel style as the background
//! indexer (`forge_index::background`) — the watcher owns no state the
//! debounce task doesn't also own, communication happens over channels.

pub mod error;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use error::{Result, WatchError};

const SKIP_DIRS: &[&str] = &[
    ".git", "node_modules", "vendor", "target", "build", "dist", "out", "__pycache__", ".idea", ".vscode", "bin",
    "obj",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Modify,
    Delete,
}

#[derive(Debug, Clone)]
pub struct Change {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, Copy)]
pub struct WatchConfig {
    pub debounce: Duration,
    pub max_watches: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            max_watches: 8192,
        }
    }
}

pub struct FsWatcher {
    _notify: Arc<Mutex<RecommendedWatcher>>,
    debounce_task: JoinHandle<()>,
    cancel: CancellationToken,
}

impl FsWatcher {
    /// Start watching `root`. Returns the handle plus the channel of
    /// coalesced, debounced changes.
    pub fn spawn(root: PathBuf, config: WatchConfig) -> Result<(Self, mpsc::UnboundedReceiver<Change>)> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<Event>();

        let notify_watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let _ = raw_tx.send(event);
            }
        })
        .map_err(WatchError::Init)?;

        let notify_watcher = Arc::new(Mutex::new(notify_watcher));
        let watched = Arc::new(Mutex::new(HashSet::new()));
        register_tree(&notify_watcher, &watched, &root, config.max_watches)?;

        let (out_tx, out_rx) = mpsc::unbounded_channel::<Change>();
        let cancel = CancellationToken::new();

        let task_notify = Arc::clone(&notify_watcher);
        let task_cancel = cancel.clone();
        let debounce_task = tokio::spawn(async move {
            debounce_loop(raw_rx, out_tx, task_notify, watched, config, task_cancel).await;
        });

        Ok((
            Self {
                _notify: notify_watcher,
                debounce_task,
                cancel,
            },
            out_rx,
        ))
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.debounce_task.await;
    }
}

async fn debounce_loop(
    mut raw_rx: mpsc::UnboundedReceiver<Event>,
    out_tx: mpsc::UnboundedSender<Change>,
    notify_watcher: Arc<Mutex<RecommendedWatcher>>,
    watched: Arc<Mutex<HashSet<PathBuf>>>,
    config: WatchConfig,
    cancel: CancellationToken,
) {
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
    let mut ticker = tokio::time::interval((config.debounce / 2).max(Duration::from_millis(10)));

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            Some(event) = raw_rx.recv() => {
                handle_event(&event, &notify_watcher, &watched, config.max_watches, &mut pending);
            }
            _ = ticker.tick() => {
                flush_stable(&mut pending, config.debounce, &out_tx);
            }
        }
    }
}

fn handle_event(
    event: &Event,
    notify_watcher: &Arc<Mutex<RecommendedWatcher>>,
    watched: &Arc<Mutex<HashSet<PathBuf>>>,
    max_watches: usize,
    pending: &mut HashMap<PathBuf, Instant>,
) {
    let is_create = matches!(event.kind, EventKind::Create(_));
    for path in &event.paths {
        if is_temp_file(path) || is_in_skip_dir(path) {
            continue;
        }
        if is_create && path.is_dir() {
            let mut set = watched.lock().expect("poisoned");
            if set.len() < max_watches && !set.contains(path) {
                let mut watcher = notify_watcher.lock().expect("poisoned");
                if watcher.watch(path, RecursiveMode::NonRecursive).is_ok() {
                    set.insert(path.clone());
                }
            }
        }
        pending.insert(path.clone(), Instant::now());
    }
}

fn flush_stable(pending: &mut HashMap<PathBuf, Instant>, debounce: Duration, out_tx: &mpsc::UnboundedSender<Change>) {
    let now = Instant::now();
    let stable: Vec<PathBuf> = pending
        .iter()
        .filter(|(_, &seen)| now.duration_since(seen) >= debounce)
        .map(|(path, _)| path.clone())
        .collect();

    for path in stable {
        pending.remove(&path);
        let kind = if path.exists() { ChangeKind::Modify } else { ChangeKind::Delete };
        let _ = out_tx.send(Change { path, kind });
    }
}

fn is_temp_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.starts_with('.') || (name.starts_with('#') && name.ends_with('#')) || name.ends_with('~')
}

fn is_in_skip_dir(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, std::path::Component::Normal(name) if SKIP_DIRS.contains(&name.to_string_lossy().as_ref())))
}

fn register_tree(
    notify_watcher: &Arc<Mutex<RecommendedWatcher>>,
    watched: &Arc<Mutex<HashSet<PathBuf>>>,
    root: &Path,
    max_watches: usize,
) -> Result<()> {
    let mut dirs = vec![root.to_path_buf()];
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() || is_in_skip_dir(&path) || is_temp_file(&path) {
                continue;
            }
            dirs.push(path.clone());
            stack.push(path);
        }
    }

    let mut watcher = notify_watcher.lock().expect("poisoned");
    let mut set = watched.lock().expect("poisoned");
    for dir in dirs {
        if set.len() >= max_watches {
            break;
        }
        watcher.watch(&dir, RecursiveMode::NonRecursive).map_err(|source| WatchError::Watch {
            path: dir.clone(),
            source,
        })?;
        set.insert(dir);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotfiles_and_emacs_and_tilde_are_temp_files() {
        assert!(is_temp_file(Path::new("/a/.hidden")));
        assert!(is_temp_file(Path::new("/a/#scratch#")));
        assert!(is_temp_file(Path::new("/a/file.rs~")));
        assert!(!is_temp_file(Path::new("/a/file.rs")));
    }

    #[test]
    fn skip_dir_detection_matches_any_path_component() {
        assert!(is_in_skip_dir(Path::new("/repo/node_modules/pkg/index.js")));
        assert!(!is_in_skip_dir(Path::new("/repo/src/main.rs")));
    }

    #[tokio::test]
    async fn spawn_and_stop_round_trips_cleanly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (watcher, _rx) = FsWatcher::spawn(dir.path().to_path_buf(), WatchConfig::default()).expect("spawn");
        watcher.stop().await;
    }

    #[tokio::test]
    async fn modified_file_is_reported_after_debounce() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file_path = dir.path().join("a.rs");
        std::fs::write(&file_path, "fn a() {}\n").expect("write");

        let config = WatchConfig {
            debounce: Duration::from_millis(50),
            max_watches: 100,
        };
        let (watcher, mut rx) = FsWatcher::spawn(dir.path().to_path_buf(), config).expect("spawn");

        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(&file_path, "fn a() { 1 }\n").expect("rewrite");

        let change = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        watcher.stop().await;

        assert!(matches!(change, Ok(Some(_))));
    }
}
