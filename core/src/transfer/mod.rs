use crate::error::SvnError;
use crate::path;
use crate::repository::Repository;
use dashmap::DashMap;
use log::{debug, info, warn};
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub mod actions;

pub type TaskId = Uuid;

pub const DEFAULT_UPLOAD_MESSAGE: &str = "Uploaded via SVNC";
pub const DEFAULT_UPDATE_MESSAGE: &str = "Updated via SVNC";
pub const DEFAULT_DELETE_MESSAGE: &str = "Deleted via SVNC";
pub const DEFAULT_MKDIR_MESSAGE: &str = "Created folder via SVNC";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Download,
    Upload,
    Update,
    Delete,
    Mkdir,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "state")]
pub enum TransferState {
    Pending,
    Running,
    Completed,
    Failed {
        exit_code: Option<i32>,
        reason: String,
    },
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Failed { .. })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TransferTask {
    pub id: TaskId,
    pub kind: TransferKind,
    pub source: String,
    pub target: String,
    pub total_bytes: Option<u64>,
    pub transferred_bytes: u64,
    pub state: TransferState,
}

impl TransferTask {
    fn new(kind: TransferKind, source: String, target: String, total_bytes: Option<u64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            source,
            target,
            total_bytes: total_bytes.filter(|total| *total > 0),
            transferred_bytes: 0,
            state: TransferState::Pending,
        }
    }

    pub fn percent(&self) -> Option<u8> {
        progress_percent(self.transferred_bytes, self.total_bytes)
    }

    /// Applies `next` if the state machine allows it: Pending -> Running and
    /// Running -> Completed | Failed. Terminal states never change again.
    fn transition(&mut self, next: TransferState) -> bool {
        let allowed = match (&self.state, &next) {
            (TransferState::Pending, TransferState::Running) => true,
            (TransferState::Running, TransferState::Completed) => true,
            (TransferState::Running, TransferState::Failed { .. }) => true,
            _ => false,
        };
        if allowed {
            self.state = next;
        }
        allowed
    }
}

/// `min(100, round(transferred / total * 100))`, or `None` while the size is unknown.
pub fn progress_percent(transferred: u64, total: Option<u64>) -> Option<u8> {
    match total {
        Some(total) if total > 0 => {
            let percent = ((transferred as f64 / total as f64) * 100.0).round();
            Some(percent.min(100.0) as u8)
        }
        _ => None,
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TransferEvent {
    Queued(TransferTask),
    Progress {
        id: TaskId,
        percent: Option<u8>,
        transferred: u64,
    },
    Finished(TransferTask),
}

#[derive(Debug)]
pub struct BatchFailure {
    pub target: String,
    pub error: SvnError,
}

/// Aggregate of independently run tasks. One failure never stops the others.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.failures.len()
    }

    pub fn record<T>(&mut self, target: impl Into<String>, result: Result<T, SvnError>) {
        match result {
            Ok(_) => self.succeeded += 1,
            Err(error) => self.failures.push(BatchFailure {
                target: target.into(),
                error,
            }),
        }
    }
}

pub struct TransferCoordinator {
    repo: Arc<Repository>,
    scratch_dir: PathBuf,
    events: Option<Sender<TransferEvent>>,
    tasks: DashMap<TaskId, TransferTask>,
    cancels: DashMap<TaskId, CancellationToken>,
    path_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TransferCoordinator {
    pub fn new(repo: Arc<Repository>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo,
            scratch_dir: scratch_dir.into(),
            events: None,
            tasks: DashMap::new(),
            cancels: DashMap::new(),
            path_locks: DashMap::new(),
        }
    }

    /// Progress and lifecycle events go to `events`. A full channel drops progress
    /// updates rather than stalling transfers.
    pub fn with_events(mut self, events: Sender<TransferEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repo
    }

    pub fn scratch_dir(&self) -> &std::path::Path {
        &self.scratch_dir
    }

    pub fn task(&self, id: TaskId) -> Option<TransferTask> {
        self.tasks.get(&id).map(|task| task.clone())
    }

    pub fn tasks(&self) -> Vec<TransferTask> {
        self.tasks.iter().map(|task| task.clone()).collect()
    }

    /// Forgets completed and failed tasks.
    pub fn clear_finished(&self) {
        self.tasks.retain(|_, task| !task.state.is_terminal());
    }

    /// Asks a running streaming download to stop at its next chunk boundary.
    /// Returns false when the task is unknown, already finished, or of a kind that
    /// cannot be interrupted.
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.cancels.get(&id) {
            Some(token) => {
                info!("cancelling transfer {id}");
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn register(
        &self,
        kind: TransferKind,
        source: impl Into<String>,
        target: impl Into<String>,
        total_bytes: Option<u64>,
    ) -> TaskId {
        let task = TransferTask::new(kind, source.into(), target.into(), total_bytes);
        let id = task.id;
        debug!("queued {:?} task {id}: {} -> {}", kind, task.source, task.target);
        self.tasks.insert(id, task.clone());
        self.emit(TransferEvent::Queued(task));
        id
    }

    /// Registers a cancellation token for `id`. Only streaming work reads it.
    fn cancellable(&self, id: TaskId) -> CancellationToken {
        self.cancels.entry(id).or_default().clone()
    }

    /// Drives one task through Running to its terminal state.
    async fn run_task<T, F>(&self, id: TaskId, operation: F) -> Result<T, SvnError>
    where
        F: Future<Output = Result<T, SvnError>>,
    {
        self.transition(id, TransferState::Running);
        let result = operation.await;

        let next = match &result {
            Ok(_) => TransferState::Completed,
            Err(err) => TransferState::Failed {
                exit_code: err.exit_code(),
                reason: err.to_string(),
            },
        };
        if let Err(err) = &result {
            warn!("transfer {id} failed: {err}");
        }
        self.transition(id, next);
        self.cancels.remove(&id);

        if let Some(task) = self.task(id) {
            self.emit(TransferEvent::Finished(task));
        }
        result
    }

    fn transition(&self, id: TaskId, next: TransferState) {
        if let Some(mut task) = self.tasks.get_mut(&id) {
            if !task.transition(next.clone()) {
                warn!("ignored transition of task {id} from {:?} to {next:?}", task.state);
            }
        }
    }

    fn progress(&self, id: TaskId, transferred: u64) {
        let event = match self.tasks.get_mut(&id) {
            Some(mut task) => {
                task.transferred_bytes = transferred;
                TransferEvent::Progress {
                    id,
                    percent: task.percent(),
                    transferred,
                }
            }
            None => return,
        };
        self.emit(event);
    }

    /// Waits for exclusive use of a remote path among mutating transfers.
    async fn lock_path(&self, url: &str) -> PathGuard<'_> {
        let key = path::normalize(url);
        let lock = self.path_locks.entry(key.clone()).or_default().clone();
        let guard = lock.lock_owned().await;
        PathGuard {
            locks: &self.path_locks,
            key,
            guard: Some(guard),
        }
    }

    fn emit(&self, event: TransferEvent) {
        let Some(sender) = &self.events else {
            return;
        };

        match sender.try_send(event) {
            Ok(_) => {}
            Err(TrySendError::Closed(_)) => {
                debug!("transfer event receiver is gone");
            }
            Err(TrySendError::Full(event)) => {
                debug!("transfer event channel full, dropping {event:?}");
            }
        }
    }
}

/// Exclusive hold on one remote path. The table entry goes away once nobody
/// holds or waits for it.
struct PathGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
