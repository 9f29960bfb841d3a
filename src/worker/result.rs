//! Task outcome value.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Terminal status of one task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Failure,
    Cancelled,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Immutable outcome of exactly one worker run.
///
/// Fields are only readable; a result is built once by the task context
/// (or by the worker boundary for faults) and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    status: TaskStatus,
    message: String,
    outputs: Vec<PathBuf>,
    logs: Vec<String>,
}

impl TaskResult {
    /// A successful result. Callers are expected to have written every output.
    pub fn success(
        message: impl Into<String>,
        outputs: Vec<PathBuf>,
        logs: Vec<String>,
    ) -> Self {
        Self {
            status: TaskStatus::Success,
            message: message.into(),
            outputs,
            logs,
        }
    }

    /// A failed result. An empty message is replaced with a generic one so
    /// failures always carry a reason.
    pub fn failure(
        message: impl Into<String>,
        outputs: Vec<PathBuf>,
        logs: Vec<String>,
    ) -> Self {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = "task failed without a reason".to_string();
        }
        Self {
            status: TaskStatus::Failure,
            message,
            outputs,
            logs,
        }
    }

    /// A result for a run that observed a cancellation request.
    pub fn cancelled(outputs: Vec<PathBuf>, logs: Vec<String>) -> Self {
        Self {
            status: TaskStatus::Cancelled,
            message: "cancelled".to_string(),
            outputs,
            logs,
        }
    }

    /// Failure produced at the worker boundary when a task faults.
    pub fn internal_error(detail: impl std::fmt::Display) -> Self {
        let message = format!("internal error: {detail}");
        Self::failure(message.clone(), Vec::new(), vec![message])
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn outputs(&self) -> &[PathBuf] {
        &self.outputs
    }

    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }

    /// First output that does not exist on disk, if any.
    pub fn missing_output(&self) -> Option<&Path> {
        self.outputs
            .iter()
            .map(PathBuf::as_path)
            .find(|p| !p.exists())
    }
}
