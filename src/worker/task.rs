//! Task contract and the per-run context handed to a task.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{DispatchError, TaskError};
use crate::worker::result::TaskResult;
use crate::worker::worker::WorkerEvent;

/// Closed set of background job categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskFamily {
    FileOperation,
    ImageDisplay,
    ImageProcessing,
    FileSaver,
    VectorProcessing,
    Classification,
    FeatureExtraction,
    Evaluation,
}

impl TaskFamily {
    pub const ALL: [TaskFamily; 8] = [
        TaskFamily::FileOperation,
        TaskFamily::ImageDisplay,
        TaskFamily::ImageProcessing,
        TaskFamily::FileSaver,
        TaskFamily::VectorProcessing,
        TaskFamily::Classification,
        TaskFamily::FeatureExtraction,
        TaskFamily::Evaluation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileOperation => "file_operation",
            Self::ImageDisplay => "image_display",
            Self::ImageProcessing => "image_processing",
            Self::FileSaver => "file_saver",
            Self::VectorProcessing => "vector_processing",
            Self::Classification => "classification",
            Self::FeatureExtraction => "feature_extraction",
            Self::Evaluation => "evaluation",
        }
    }

    /// Human-readable title used in status messages.
    pub fn title(&self) -> &'static str {
        match self {
            Self::FileOperation => "File loading",
            Self::ImageDisplay => "Band display",
            Self::ImageProcessing => "Image processing",
            Self::FileSaver => "File saving",
            Self::VectorProcessing => "Vector processing",
            Self::Classification => "Classification",
            Self::FeatureExtraction => "Feature extraction",
            Self::Evaluation => "Accuracy evaluation",
        }
    }
}

impl std::fmt::Display for TaskFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskFamily {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskFamily::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| DispatchError::UnknownFamily {
                name: s.to_string(),
            })
    }
}

/// A unit of background work.
///
/// Implementations hold their validated parameters and do all blocking I/O
/// inside `execute`. Errors are returned, never raised: `run` turns the
/// outcome into a `TaskResult`.
pub trait Task: Send + 'static {
    fn family(&self) -> TaskFamily;

    /// Perform the work, returning the success summary.
    fn execute(&self, ctx: &mut TaskContext) -> Result<String, TaskError>;

    fn run(&self, mut ctx: TaskContext) -> TaskResult {
        let outcome = self.execute(&mut ctx);
        ctx.finish(outcome)
    }
}

/// Per-run context: progress reporting, log trail, produced artifacts and
/// the cancellation token.
pub struct TaskContext {
    worker_id: Uuid,
    progress: mpsc::UnboundedSender<String>,
    events: Option<broadcast::Sender<WorkerEvent>>,
    cancel: CancellationToken,
    logs: Vec<String>,
    outputs: Vec<PathBuf>,
}

impl TaskContext {
    pub fn new(
        worker_id: Uuid,
        progress: mpsc::UnboundedSender<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            worker_id,
            progress,
            events: None,
            cancel,
            logs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Also republish progress on a manager-wide event stream.
    pub fn with_events(mut self, events: broadcast::Sender<WorkerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Replace the caller's current status text.
    pub fn progress(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(worker_id = %self.worker_id, "{}", message);
        if let Some(events) = &self.events {
            let _ = events.send(WorkerEvent::Progress {
                worker_id: self.worker_id,
                message: message.clone(),
            });
        }
        let _ = self.progress.send(message);
    }

    /// Append a diagnostic line to the result's log trail.
    pub fn log(&mut self, message: impl Into<String>) {
        self.logs.push(message.into());
    }

    /// Log a line and report it as progress.
    pub fn step(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.progress(message.clone());
        self.logs.push(message);
    }

    /// Record a produced artifact.
    pub fn output(&mut self, path: impl Into<PathBuf>) {
        self.outputs.push(path.into());
    }

    pub fn outputs(&self) -> &[PathBuf] {
        &self.outputs
    }

    /// Cancellation checkpoint, to be called between stages.
    pub fn checkpoint(&self) -> Result<(), TaskError> {
        if self.cancel.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Seal the run into its immutable result.
    pub fn finish(mut self, outcome: Result<String, TaskError>) -> TaskResult {
        match outcome {
            Ok(message) => {
                let result = TaskResult::success(message, self.outputs.clone(), self.logs.clone());
                let missing = result.missing_output().map(|p| p.display().to_string());
                match missing {
                    Some(missing) => {
                        let reason = format!("output artifact missing: {missing}");
                        self.logs.push(reason.clone());
                        TaskResult::failure(reason, self.outputs, self.logs)
                    }
                    None => result,
                }
            }
            Err(TaskError::Cancelled) => {
                self.logs.push("cancelled".to_string());
                TaskResult::cancelled(self.outputs, self.logs)
            }
            Err(e) => {
                let reason = e.to_string();
                self.logs.push(reason.clone());
                TaskResult::failure(reason, self.outputs, self.logs)
            }
        }
    }
}
