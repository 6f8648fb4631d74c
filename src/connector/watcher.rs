//! Polling file watcher.
//!
//! Builds an mtime snapshot on the first pass (emitting nothing), then
//! diffs each subsequent pass into change events. A bounded queue with
//! drop-oldest protects against event storms; dropped counts stay
//! observable through [`WatcherStatus`].

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::connector::ignore::{is_prunable_dir, IgnoreChecker};
use crate::domain::normalize_rel_path;

const EVENT_QUEUE_CAP: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct FileChangeEvent {
    /// Repo-relative path.
    pub path: String,
    pub kind: WatchEventKind,
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WatcherStatus {
    pub dropped_events: u64,
    pub passes: u64,
}

pub type EventSink = Arc<dyn Fn(Vec<FileChangeEvent>) + Send + Sync>;

pub struct FileWatcher {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    dropped: Arc<AtomicU64>,
    passes: Arc<AtomicU64>,
}

impl FileWatcher {
    /// Start polling `repo_root` every `poll_interval`, delivering batches
    /// of change events to `sink`.
    pub fn start(
        repo_root: &Path,
        respect_gitignore: bool,
        poll_interval: Duration,
        sink: EventSink,
    ) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let dropped = Arc::new(AtomicU64::new(0));
        let passes = Arc::new(AtomicU64::new(0));

        let root = repo_root.to_path_buf();
        let dropped_task = dropped.clone();
        let passes_task = passes.clone();

        let handle = tokio::spawn(async move {
            let checker = IgnoreChecker::new(&root, &[], respect_gitignore);
            let mut snapshot = scan_mtimes(&root, &checker);
            let mut queue: VecDeque<FileChangeEvent> = VecDeque::new();
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately; the
            // initial snapshot above already consumed that pass.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }

                let current = scan_mtimes(&root, &checker);
                let events = diff_snapshots(&snapshot, &current);
                snapshot = current;
                passes_task.fetch_add(1, Ordering::Relaxed);

                for event in events {
                    if queue.len() >= EVENT_QUEUE_CAP {
                        queue.pop_front();
                        let total = dropped_task.fetch_add(1, Ordering::Relaxed) + 1;
                        if total % 1000 == 1 {
                            warn!(dropped = total, "watcher queue overflow, dropping oldest");
                        }
                    }
                    queue.push_back(event);
                }

                if !queue.is_empty() {
                    let batch: Vec<FileChangeEvent> = queue.drain(..).collect();
                    debug!(count = batch.len(), "watcher emitting change events");
                    sink(batch);
                }
            }
        });

        Self {
            stop_tx,
            handle,
            dropped,
            passes,
        }
    }

    pub fn status(&self) -> WatcherStatus {
        WatcherStatus {
            dropped_events: self.dropped.load(Ordering::Relaxed),
            passes: self.passes.load(Ordering::Relaxed),
        }
    }

    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }
}

fn scan_mtimes(root: &Path, checker: &IgnoreChecker) -> HashMap<String, SystemTime> {
    let mut snapshot = HashMap::new();
    let walker = WalkDir::new(root).into_iter().filter_entry(|e| {
        !(e.file_type().is_dir()
            && is_prunable_dir(e.file_name().to_str().unwrap_or("")))
    });

    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        if checker.should_ignore(entry.path()) {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        if let Ok(meta) = entry.metadata() {
            if let Ok(mtime) = meta.modified() {
                snapshot.insert(normalize_rel_path(rel), mtime);
            }
        }
    }
    snapshot
}

fn diff_snapshots(
    before: &HashMap<String, SystemTime>,
    after: &HashMap<String, SystemTime>,
) -> Vec<FileChangeEvent> {
    let now = SystemTime::now();
    let mut events = Vec::new();

    for (path, mtime) in after {
        match before.get(path) {
            None => events.push(FileChangeEvent {
                path: path.clone(),
                kind: WatchEventKind::Created,
                timestamp: now,
            }),
            Some(old) if old != mtime => events.push(FileChangeEvent {
                path: path.clone(),
                kind: WatchEventKind::Modified,
                timestamp: now,
            }),
            Some(_) => {}
        }
    }

    for path in before.keys() {
        if !after.contains_key(path) {
            events.push(FileChangeEvent {
                path: path.clone(),
                kind: WatchEventKind::Deleted,
                timestamp: now,
            });
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_sink() -> (EventSink, Arc<Mutex<Vec<FileChangeEvent>>>) {
        let seen: Arc<Mutex<Vec<FileChangeEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: EventSink = Arc::new(move |events| {
            sink_seen.lock().unwrap().extend(events);
        });
        (sink, seen)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_watcher_emits_created_and_deleted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("existing.py"), "x = 1\n").unwrap();

        let (sink, seen) = collect_sink();
        let watcher = FileWatcher::start(dir.path(), false, Duration::from_millis(50), sink);

        // Initial snapshot pass emits nothing for pre-existing files.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(seen.lock().unwrap().is_empty());

        std::fs::write(dir.path().join("new.py"), "y = 2\n").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        std::fs::remove_file(dir.path().join("existing.py")).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        watcher.stop().await;

        let events = seen.lock().unwrap();
        assert!(events
            .iter()
            .any(|e| e.path == "new.py" && e.kind == WatchEventKind::Created));
        assert!(events
            .iter()
            .any(|e| e.path == "existing.py" && e.kind == WatchEventKind::Deleted));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_watcher_ignores_prunable_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules")).unwrap();

        let (sink, seen) = collect_sink();
        let watcher = FileWatcher::start(dir.path(), false, Duration::from_millis(50), sink);
        tokio::time::sleep(Duration::from_millis(100)).await;

        std::fs::write(dir.path().join("node_modules/lib.js"), "x\n").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        watcher.stop().await;

        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_diff_snapshots_modified() {
        let t1 = SystemTime::UNIX_EPOCH;
        let t2 = t1 + Duration::from_secs(5);
        let before = HashMap::from([("a.py".to_string(), t1)]);
        let after = HashMap::from([("a.py".to_string(), t2)]);

        let events = diff_snapshots(&before, &after);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, WatchEventKind::Modified);
    }
}
