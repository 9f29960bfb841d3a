//! Task manager: single-active dispatch with a bounded FIFO queue.
//!
//! At most one worker executes at a time. A dispatch made while a worker is
//! active waits in the queue and starts when everything ahead of it has
//! finished. A dispatch that finds the queue full is rejected with
//! `DispatchError::Busy`; a capacity of zero therefore rejects every
//! dispatch made while a worker is active.

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError};

use serde::Serialize;
use tokio::sync::{Mutex, Notify, RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{Config, ParamMap};
use crate::error::DispatchError;
use crate::params::{TaskParams, resolve_params};
use crate::tasks::build_task;
use crate::worker::state::Lifecycle;
use crate::worker::task::{Task, TaskFamily};
use crate::worker::worker::{Worker, WorkerEvent, WorkerHandle};

const EVENT_CAPACITY: usize = 256;

/// Identity of a tracked worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerInfo {
    pub id: Uuid,
    pub family: TaskFamily,
}

#[derive(Clone)]
struct Slot {
    info: WorkerInfo,
    cancel: CancellationToken,
    lifecycle: Arc<std::sync::Mutex<Lifecycle>>,
}

impl Slot {
    /// The worker already delivered its result; the slot is only waiting to
    /// be cleared.
    fn is_finished(&self) -> bool {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .is_terminal()
    }
}

struct Queued {
    slot: Slot,
    worker: Worker,
}

#[derive(Default)]
struct ManagerState {
    active: Option<Slot>,
    pending: VecDeque<Queued>,
}

/// Dispatches tasks and enforces the single-active discipline.
pub struct TaskManager {
    config: RwLock<Config>,
    state: Arc<Mutex<ManagerState>>,
    events_tx: broadcast::Sender<WorkerEvent>,
    idle: Arc<Notify>,
}

impl TaskManager {
    pub fn new(config: Config) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config: RwLock::new(config),
            state: Arc::new(Mutex::new(ManagerState::default())),
            events_tx,
            idle: Arc::new(Notify::new()),
        }
    }

    /// Resolve parameters for `family` and dispatch the resulting task.
    ///
    /// Overrides are shallow-merged over the family defaults and validated
    /// before any worker exists, so a rejected dispatch never produces a
    /// result. Band-math expressions are recorded in the configured history
    /// file unless the options name another one.
    pub async fn dispatch(
        &self,
        family: TaskFamily,
        overrides: ParamMap,
    ) -> Result<WorkerHandle, DispatchError> {
        let (resolved, history_path) = {
            let config = self.config.read().await;
            (
                resolve_params(&config.defaults(family), &overrides),
                config.history_path().to_path_buf(),
            )
        };
        let params = TaskParams::parse(family, &resolved)?.with_history_path(&history_path);
        self.submit(build_task(params)).await
    }

    /// Dispatch by family name.
    pub async fn dispatch_named(
        &self,
        name: &str,
        overrides: ParamMap,
    ) -> Result<WorkerHandle, DispatchError> {
        self.dispatch(name.parse()?, overrides).await
    }

    /// Dispatch an already-built task.
    pub async fn submit(&self, task: Box<dyn Task>) -> Result<WorkerHandle, DispatchError> {
        let (worker, handle) = Worker::new(task);
        let worker = worker.with_events(self.events_tx.clone());
        let slot = Slot {
            info: WorkerInfo {
                id: worker.id(),
                family: worker.family(),
            },
            cancel: worker.cancel_token(),
            lifecycle: worker.shared_lifecycle(),
        };
        let capacity = self.config.read().await.queue_capacity;

        let mut state = self.state.lock().await;
        if state.active.is_none() {
            tracing::info!(worker_id = %slot.info.id, family = %slot.info.family, "Dispatching worker");
            state.active = Some(slot);
            drop(state);
            tokio::spawn(drive(
                Arc::clone(&self.state),
                Arc::clone(&self.idle),
                worker,
            ));
            return Ok(handle);
        }

        if state.pending.len() >= capacity {
            tracing::warn!(family = %slot.info.family, "Dispatch rejected: queue full");
            return Err(DispatchError::Busy { capacity });
        }
        state.pending.push_back(Queued { slot, worker });
        tracing::info!(
            worker_id = %handle.id(),
            family = %handle.family(),
            "Worker queued at position {}",
            state.pending.len()
        );
        Ok(handle)
    }

    /// Request cancellation of the active worker.
    ///
    /// Returns `false` when nothing is active or the active worker has
    /// already finished. The active slot stays occupied until the worker
    /// delivers its result.
    pub async fn cancel(&self) -> bool {
        let state = self.state.lock().await;
        match state.active.as_ref().filter(|s| !s.is_finished()) {
            Some(slot) => {
                tracing::info!(worker_id = %slot.info.id, "Cancelling active worker");
                slot.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel a specific worker, active or queued.
    ///
    /// A queued worker leaves the queue at once and delivers its
    /// cancelled-before-start result without executing. A worker that has
    /// already finished is no longer tracked.
    pub async fn cancel_worker(&self, id: Uuid) -> Result<(), DispatchError> {
        let mut state = self.state.lock().await;
        if let Some(slot) = state
            .active
            .as_ref()
            .filter(|s| s.info.id == id && !s.is_finished())
        {
            tracing::info!(worker_id = %id, "Cancelling active worker");
            slot.cancel.cancel();
            return Ok(());
        }
        let position = state
            .pending
            .iter()
            .position(|q| q.slot.info.id == id)
            .ok_or(DispatchError::WorkerNotFound { id })?;
        if let Some(queued) = state.pending.remove(position) {
            tracing::info!(worker_id = %id, "Cancelling queued worker");
            release(queued);
        }
        Ok(())
    }

    /// Cancel the active worker and drain the queue.
    pub async fn cancel_all(&self) {
        let mut state = self.state.lock().await;
        if let Some(slot) = state.active.as_ref().filter(|s| !s.is_finished()) {
            slot.cancel.cancel();
        }
        let drained: Vec<Queued> = state.pending.drain(..).collect();
        drop(state);
        if !drained.is_empty() {
            tracing::info!("Cancelling {} queued workers", drained.len());
        }
        for queued in drained {
            release(queued);
        }
    }

    /// The worker currently executing, if any.
    pub async fn active(&self) -> Option<WorkerInfo> {
        self.state.lock().await.active.as_ref().map(|s| s.info)
    }

    /// Queued workers, oldest first.
    pub async fn pending(&self) -> Vec<WorkerInfo> {
        self.state
            .lock()
            .await
            .pending
            .iter()
            .map(|q| q.slot.info)
            .collect()
    }

    pub async fn is_busy(&self) -> bool {
        self.state.lock().await.active.is_some()
    }

    /// Wait until no worker is active and the queue is empty.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.state.lock().await.active.is_none() {
                return;
            }
            notified.await;
        }
    }

    /// Subscribe to lifecycle events of every dispatched worker.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events_tx.subscribe()
    }

    /// Snapshot of the current configuration.
    pub async fn config(&self) -> Config {
        self.config.read().await.clone()
    }

    /// Mutate the configuration; affects later dispatches only.
    pub async fn update_config(&self, f: impl FnOnce(&mut Config)) {
        f(&mut *self.config.write().await);
    }
}

/// Cancel a queued worker and let it deliver its result immediately.
fn release(queued: Queued) {
    queued.slot.cancel.cancel();
    queued.worker.start();
}

/// Run `worker`, then everything queued behind it, one at a time.
async fn drive(state: Arc<Mutex<ManagerState>>, idle: Arc<Notify>, mut worker: Worker) {
    loop {
        let id = worker.id();
        if let Err(e) = worker.start().await {
            tracing::error!(worker_id = %id, "Worker thread failed: {}", e);
        }

        let mut state = state.lock().await;
        match state.pending.pop_front() {
            Some(next) => {
                tracing::debug!(worker_id = %next.slot.info.id, "Promoting queued worker");
                state.active = Some(next.slot);
                worker = next.worker;
            }
            None => {
                state.active = None;
                drop(state);
                idle.notify_waiters();
                return;
            }
        }
    }
}
