//! Error types for geoworker.

use std::path::PathBuf;

use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Orchestration errors, reported synchronously to the caller.
///
/// None of these produce a `TaskResult`: either no worker was created or
/// the request targets a worker that is no longer tracked.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Unknown task family: {name}")]
    UnknownFamily { name: String },

    #[error("Invalid parameters for {family}: {reason}")]
    InvalidParameters { family: String, reason: String },

    #[error("Task manager busy: {capacity} dispatches already pending")]
    Busy { capacity: usize },

    #[error("Worker {id} not found")]
    WorkerNotFound { id: Uuid },
}

/// Expression history persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("History file {path} is not a JSON array of strings: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// NPY array codec errors.
#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not an NPY file: {0}")]
    BadMagic(PathBuf),

    #[error("Unsupported NPY format version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },

    #[error("Malformed NPY header: {0}")]
    Header(String),

    #[error("Unsupported dtype: {0}")]
    UnsupportedDtype(String),

    #[error("Fortran-ordered arrays are not supported")]
    FortranOrder,

    #[error("Array data truncated: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Shape mismatch: expected {expected:?}, found {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Expected a {expected}-D array, found shape {actual:?}")]
    Dimensions { expected: usize, actual: Vec<usize> },
}

/// Sample-table errors.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported table format: {0} (use .csv)")]
    UnsupportedFormat(String),

    #[error("Table has no header row")]
    MissingHeader,

    #[error("Sample table must contain {0} column")]
    MissingColumn(String),

    #[error("Line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Sample table has no labelled rows")]
    NoLabelledRows,
}

/// Errors raised inside a task body.
///
/// These never leave the task: the task boundary renders them into a
/// failed `TaskResult` using their `Display` text.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    InvalidInput(String),

    #[error("cancelled")]
    Cancelled,
}

impl TaskError {
    /// Wrap an IO error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for geoworker.
pub type Result<T> = std::result::Result<T, Error>;
