//! Worker system: task execution off the caller's thread.
//!
//! Core components:
//! - `task` — Task contract, task families and the per-run context
//! - `result` — Immutable task outcome
//! - `state` — Worker state machine (Created → Running → Completed/Cancelled)
//! - `worker` — One-shot worker and its caller-side handle
//! - `manager` — Single-active dispatch with a bounded queue

pub mod manager;
pub mod result;
pub mod state;
pub mod task;
pub mod worker;

pub use manager::{TaskManager, WorkerInfo};
pub use result::{TaskResult, TaskStatus};
pub use state::{Lifecycle, StateTransition, WorkerState};
pub use task::{Task, TaskContext, TaskFamily};
pub use worker::{Worker, WorkerEvent, WorkerHandle};
