//! Background indexer: debounced queue plus worker dispatch.
//!
//! `queue_paths` unions into a pending set and re-arms a debounce
//! timer. When the timer fires, the pending set is drained atomically
//! and one logical job runs: reconcile, extract, resolve, publish one
//! epoch. Multiple queue calls within the window coalesce into a single
//! job and a single epoch.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::application::coordinator::IndexCoordinator;
use crate::domain::IndexStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerState {
    Idle,
    Indexing,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct IndexerStatus {
    pub state: IndexerState,
    pub queue_size: usize,
    pub last_stats: Option<IndexStats>,
    pub last_error: Option<String>,
}

pub type CompletionCallback = Arc<dyn Fn(&IndexStats) + Send + Sync>;

pub struct BackgroundIndexer {
    coordinator: Arc<IndexCoordinator>,
    debounce: Duration,
    state: Mutex<IndexerState>,
    pending: Mutex<HashSet<String>>,
    debounce_task: Mutex<Option<JoinHandle<()>>>,
    job_task: Mutex<Option<JoinHandle<()>>>,
    last_stats: Mutex<Option<IndexStats>>,
    last_error: Mutex<Option<String>>,
    on_complete: Mutex<Option<CompletionCallback>>,
}

impl BackgroundIndexer {
    pub fn new(coordinator: Arc<IndexCoordinator>, debounce: Duration) -> Arc<Self> {
        Arc::new(Self {
            coordinator,
            debounce,
            state: Mutex::new(IndexerState::Idle),
            pending: Mutex::new(HashSet::new()),
            debounce_task: Mutex::new(None),
            job_task: Mutex::new(None),
            last_stats: Mutex::new(None),
            last_error: Mutex::new(None),
            on_complete: Mutex::new(None),
        })
    }

    /// Host hook invoked with the stats of every completed job.
    pub fn set_on_complete(&self, callback: CompletionCallback) {
        if let Ok(mut slot) = self.on_complete.lock() {
            *slot = Some(callback);
        }
    }

    fn state(&self) -> IndexerState {
        self.state.lock().map(|s| *s).unwrap_or(IndexerState::Stopped)
    }

    fn set_state(&self, state: IndexerState) {
        if let Ok(mut slot) = self.state.lock() {
            *slot = state;
        }
    }

    /// Union paths into the pending set and (re-)arm the debounce timer.
    pub fn queue_paths(self: &Arc<Self>, paths: impl IntoIterator<Item = String>) {
        if matches!(self.state(), IndexerState::Stopping | IndexerState::Stopped) {
            return;
        }
        let total = {
            let mut pending = match self.pending.lock() {
                Ok(p) => p,
                Err(_) => return,
            };
            pending.extend(paths);
            pending.len()
        };
        debug!(total_pending = total, "paths queued");
        self.arm_debounce();
    }

    fn arm_debounce(self: &Arc<Self>) {
        let indexer = self.clone();
        let mut slot = match self.debounce_task.lock() {
            Ok(slot) => slot,
            Err(_) => return,
        };
        if let Some(existing) = slot.take() {
            existing.abort();
        }
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(indexer.debounce).await;
            indexer.spawn_job();
        }));
    }

    /// Atomically drain pending and run one job. The job handle is kept
    /// so `stop()` can wait for it.
    fn spawn_job(self: &Arc<Self>) {
        let indexer = self.clone();
        let handle = tokio::spawn(async move {
            indexer.run_job().await;
        });
        if let Ok(mut slot) = self.job_task.lock() {
            *slot = Some(handle);
        }
    }

    async fn run_job(self: &Arc<Self>) {
        if self.state() != IndexerState::Idle {
            return;
        }
        let batch: Vec<String> = {
            let Ok(mut pending) = self.pending.lock() else {
                return;
            };
            pending.drain().collect()
        };
        if batch.is_empty() {
            return;
        }

        self.set_state(IndexerState::Indexing);
        info!(files = batch.len(), "background indexing job started");

        match self.coordinator.reindex_incremental(batch).await {
            Ok(stats) => {
                info!(
                    added = stats.files_added,
                    updated = stats.files_updated,
                    removed = stats.files_removed,
                    epoch = stats.epoch_id,
                    "background indexing job finished"
                );
                if let Ok(mut slot) = self.last_stats.lock() {
                    *slot = Some(stats.clone());
                }
                if let Ok(mut slot) = self.last_error.lock() {
                    *slot = None;
                }
                let callback = self.on_complete.lock().ok().and_then(|cb| cb.clone());
                if let Some(callback) = callback {
                    callback(&stats);
                }
            }
            Err(e) => {
                error!(error = %e, "background indexing job failed");
                if let Ok(mut slot) = self.last_error.lock() {
                    *slot = Some(e.to_string());
                }
            }
        }

        // A stop() racing the job leaves the state at Stopping.
        if self.state() == IndexerState::Indexing {
            self.set_state(IndexerState::Idle);
        }

        // Paths queued while the job ran wait for their own window.
        let backlog = self.pending.lock().map(|p| !p.is_empty()).unwrap_or(false);
        if backlog && self.state() == IndexerState::Idle {
            self.arm_debounce();
        }
    }

    /// Cancel the pending debounce, wait for a running job, and drain
    /// the queue without starting a new one.
    pub async fn stop(&self) {
        self.set_state(IndexerState::Stopping);

        let debounce = self.debounce_task.lock().ok().and_then(|mut s| s.take());
        if let Some(handle) = debounce {
            handle.abort();
        }
        let job = self.job_task.lock().ok().and_then(|mut s| s.take());
        if let Some(handle) = job {
            let _ = handle.await;
        }
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }

        self.set_state(IndexerState::Stopped);
        info!("background indexer stopped");
    }

    pub fn status(&self) -> IndexerStatus {
        IndexerStatus {
            state: self.state(),
            queue_size: self.pending.lock().map(|p| p.len()).unwrap_or(0),
            last_stats: self.last_stats.lock().ok().and_then(|s| s.clone()),
            last_error: self.last_error.lock().ok().and_then(|e| e.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn temp_repo(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        dir
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_debounce_coalesces_into_one_epoch() {
        let repo = temp_repo(&[
            ("p1.py", "def a():\n    return 1\n"),
            ("p2.py", "def b():\n    return 2\n"),
            ("p3.py", "def c():\n    return 3\n"),
        ]);
        let coordinator = Arc::new(
            IndexCoordinator::open(repo.path(), Config::default()).unwrap(),
        );
        let epoch_before = coordinator.get_current_epoch().unwrap();

        let indexer = BackgroundIndexer::new(coordinator.clone(), Duration::from_millis(100));
        indexer.queue_paths(["p1.py".to_string()]);
        indexer.queue_paths(["p2.py".to_string()]);
        indexer.queue_paths(["p1.py".to_string(), "p3.py".to_string()]);

        // One debounce window later, exactly one job has run.
        assert!(coordinator
            .await_epoch(epoch_before + 1, Duration::from_secs(5))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(coordinator.get_current_epoch().unwrap(), epoch_before + 1);
        let status = indexer.status();
        let stats = status.last_stats.unwrap();
        assert_eq!(stats.files_added, 3);
        assert_eq!(status.queue_size, 0);
        indexer.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_completion_callback_invoked() {
        let repo = temp_repo(&[("a.py", "x = 1\n")]);
        let coordinator = Arc::new(
            IndexCoordinator::open(repo.path(), Config::default()).unwrap(),
        );
        let indexer = BackgroundIndexer::new(coordinator.clone(), Duration::from_millis(50));

        let seen: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        indexer.set_on_complete(Arc::new(move |stats| {
            sink.lock().unwrap().push(stats.files_processed);
        }));

        indexer.queue_paths(["a.py".to_string()]);
        assert!(coordinator
            .await_epoch(1, Duration::from_secs(5))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(seen.lock().unwrap().as_slice(), &[1]);
        indexer.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_drains_without_running() {
        let repo = temp_repo(&[("a.py", "x = 1\n")]);
        let coordinator = Arc::new(
            IndexCoordinator::open(repo.path(), Config::default()).unwrap(),
        );
        let indexer = BackgroundIndexer::new(coordinator.clone(), Duration::from_secs(30));

        indexer.queue_paths(["a.py".to_string()]);
        indexer.stop().await;

        assert_eq!(indexer.status().state, IndexerState::Stopped);
        assert_eq!(indexer.status().queue_size, 0);
        // The long debounce never fired: no epoch was published.
        assert_eq!(coordinator.get_current_epoch().unwrap(), 0);

        // Queueing after stop is a no-op.
        indexer.queue_paths(["a.py".to_string()]);
        assert_eq!(indexer.status().queue_size, 0);
    }
}
