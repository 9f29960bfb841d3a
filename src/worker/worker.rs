//! Per-dispatch worker execution.
//!
//! A `Worker` owns exactly one task invocation. Starting it moves the task
//! onto the blocking thread pool; the paired `WorkerHandle` receives the
//! progress stream and the single terminal result.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::worker::result::{TaskResult, TaskStatus};
use crate::worker::state::{Lifecycle, WorkerState};
use crate::worker::task::{Task, TaskContext, TaskFamily};

/// Lifecycle events republished on the manager-wide stream.
///
/// Every event carries the worker id so a subscriber can tell a stale
/// completion from the one it is waiting on.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    Started {
        worker_id: Uuid,
        family: TaskFamily,
    },
    Progress {
        worker_id: Uuid,
        message: String,
    },
    Finished {
        worker_id: Uuid,
        family: TaskFamily,
        result: TaskResult,
    },
}

impl WorkerEvent {
    pub fn worker_id(&self) -> Uuid {
        match self {
            Self::Started { worker_id, .. }
            | Self::Progress { worker_id, .. }
            | Self::Finished { worker_id, .. } => *worker_id,
        }
    }
}

/// Worker that executes a single task.
pub struct Worker {
    id: Uuid,
    task: Box<dyn Task>,
    cancel: CancellationToken,
    lifecycle: Arc<Mutex<Lifecycle>>,
    progress_tx: mpsc::UnboundedSender<String>,
    result_tx: oneshot::Sender<TaskResult>,
    events: Option<broadcast::Sender<WorkerEvent>>,
}

impl Worker {
    /// Create a worker for `task` together with the caller's handle.
    pub fn new(task: Box<dyn Task>) -> (Self, WorkerHandle) {
        let id = Uuid::new_v4();
        let family = task.family();
        let cancel = CancellationToken::new();
        let lifecycle = Arc::new(Mutex::new(Lifecycle::new()));
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = oneshot::channel();

        let worker = Self {
            id,
            task,
            cancel: cancel.clone(),
            lifecycle: Arc::clone(&lifecycle),
            progress_tx,
            result_tx,
            events: None,
        };
        let handle = WorkerHandle {
            id,
            family,
            progress: progress_rx,
            finished: result_rx,
            cancel,
            lifecycle,
        };
        (worker, handle)
    }

    /// Republish this worker's events on a shared stream.
    pub fn with_events(mut self, events: broadcast::Sender<WorkerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn family(&self) -> TaskFamily {
        self.task.family()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Shared lifecycle record, for callers that track the worker.
    pub(crate) fn shared_lifecycle(&self) -> Arc<Mutex<Lifecycle>> {
        Arc::clone(&self.lifecycle)
    }

    /// Run the task on the blocking pool. Consumes the worker: a worker
    /// runs at most once.
    pub fn start(self) -> JoinHandle<()> {
        tokio::task::spawn_blocking(move || self.run())
    }

    fn run(self) {
        let Worker {
            id,
            task,
            cancel,
            lifecycle,
            progress_tx,
            result_tx,
            events,
        } = self;
        let family = task.family();

        if cancel.is_cancelled() {
            set_state(&lifecycle, WorkerState::Cancelled);
            tracing::info!(worker_id = %id, family = %family, "Worker cancelled before start");
            let result = TaskResult::cancelled(Vec::new(), vec!["cancelled before start".into()]);
            drop(progress_tx);
            deliver(id, family, result, result_tx, events.as_ref());
            return;
        }

        set_state(&lifecycle, WorkerState::Running);
        tracing::info!(worker_id = %id, family = %family, "Worker starting");
        if let Some(events) = &events {
            let _ = events.send(WorkerEvent::Started {
                worker_id: id,
                family,
            });
        }

        let mut ctx = TaskContext::new(id, progress_tx, cancel);
        if let Some(events) = &events {
            ctx = ctx.with_events(events.clone());
        }

        // The context (and with it the progress sender) is consumed by the
        // task, so the progress stream closes before the result is sent.
        let result = match panic::catch_unwind(AssertUnwindSafe(|| task.run(ctx))) {
            Ok(result) => result,
            Err(payload) => {
                let detail = panic_message(payload.as_ref());
                tracing::error!(worker_id = %id, family = %family, "Task panicked: {}", detail);
                TaskResult::internal_error(detail)
            }
        };

        let final_state = if result.status() == TaskStatus::Cancelled {
            WorkerState::Cancelled
        } else {
            WorkerState::Completed
        };
        set_state(&lifecycle, final_state);

        match result.status() {
            TaskStatus::Success => {
                tracing::info!(worker_id = %id, family = %family, "Worker completed: {}", result.message())
            }
            TaskStatus::Failure => {
                tracing::warn!(worker_id = %id, family = %family, "Worker failed: {}", result.message())
            }
            TaskStatus::Cancelled => {
                tracing::info!(worker_id = %id, family = %family, "Worker cancelled")
            }
        }

        deliver(id, family, result, result_tx, events.as_ref());
    }
}

fn set_state(lifecycle: &Mutex<Lifecycle>, state: WorkerState) {
    let mut lifecycle = lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(e) = lifecycle.transition_to(state) {
        tracing::warn!("{}", e);
    }
}

fn deliver(
    id: Uuid,
    family: TaskFamily,
    result: TaskResult,
    result_tx: oneshot::Sender<TaskResult>,
    events: Option<&broadcast::Sender<WorkerEvent>>,
) {
    if let Some(events) = events {
        let _ = events.send(WorkerEvent::Finished {
            worker_id: id,
            family,
            result: result.clone(),
        });
    }
    if result_tx.send(result).is_err() {
        tracing::debug!(worker_id = %id, "Worker handle dropped before result delivery");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

/// Caller side of a worker: progress stream, terminal result, cancellation.
pub struct WorkerHandle {
    id: Uuid,
    family: TaskFamily,
    progress: mpsc::UnboundedReceiver<String>,
    finished: oneshot::Receiver<TaskResult>,
    cancel: CancellationToken,
    lifecycle: Arc<Mutex<Lifecycle>>,
}

impl WorkerHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn family(&self) -> TaskFamily {
        self.family
    }

    /// Request cooperative cancellation. No effect once the worker finished.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    /// Next progress message; `None` once the task has returned.
    pub async fn next_progress(&mut self) -> Option<String> {
        self.progress.recv().await
    }

    /// Wait for the terminal result, discarding unread progress.
    pub async fn wait(self) -> TaskResult {
        self.finished.await.unwrap_or_else(|_| {
            TaskResult::internal_error("worker exited without delivering a result")
        })
    }

    /// Wait for the terminal result together with the final lifecycle
    /// record. The terminal state is recorded before the result is sent.
    pub async fn wait_with_lifecycle(self) -> (TaskResult, Lifecycle) {
        let lifecycle = Arc::clone(&self.lifecycle);
        let result = self.wait().await;
        let lifecycle = lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        (result, lifecycle)
    }

    /// Drain all progress messages, then wait for the terminal result.
    pub async fn join(mut self) -> (Vec<String>, TaskResult) {
        let mut messages = Vec::new();
        while let Some(message) = self.progress.recv().await {
            messages.push(message);
        }
        let result = self.wait().await;
        (messages, result)
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("family", &self.family)
            .field("state", &self.state())
            .finish()
    }
}
