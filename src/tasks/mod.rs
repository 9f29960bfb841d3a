//! Built-in task families.
//!
//! Each family is a `Task` holding its validated parameters. `build_task`
//! is the only place a family is mapped to its implementation.

pub mod band_math;
pub mod classification;
pub mod evaluation;
pub mod feature_extraction;
pub mod file_operation;
pub mod file_saver;
pub mod image_display;
pub mod image_processing;
pub mod kernels;
pub mod vector;

use std::path::{Path, PathBuf};

use crate::error::TaskError;
use crate::params::TaskParams;
use crate::raster::Raster;
use crate::worker::{Task, TaskContext};

pub use classification::ClassificationTask;
pub use evaluation::EvaluationTask;
pub use feature_extraction::FeatureExtractionTask;
pub use file_operation::FileOperationTask;
pub use file_saver::FileSaverTask;
pub use image_display::ImageDisplayTask;
pub use image_processing::ImageProcessingTask;
pub use vector::VectorProcessingTask;

/// Map validated parameters to the family's task.
pub fn build_task(params: TaskParams) -> Box<dyn Task> {
    match params {
        TaskParams::FileOperation(p) => Box::new(FileOperationTask::new(p)),
        TaskParams::ImageDisplay(p) => Box::new(ImageDisplayTask::new(p)),
        TaskParams::ImageProcessing(p) => Box::new(ImageProcessingTask::new(p)),
        TaskParams::FileSaver(p) => Box::new(FileSaverTask::new(p)),
        TaskParams::VectorProcessing(p) => Box::new(VectorProcessingTask::new(p)),
        TaskParams::Classification(p) => Box::new(ClassificationTask::new(p)),
        TaskParams::FeatureExtraction(p) => Box::new(FeatureExtractionTask::new(p)),
        TaskParams::Evaluation(p) => Box::new(EvaluationTask::new(p)),
    }
}

/// Create `dir` (and parents) if missing.
fn ensure_dir(ctx: &mut TaskContext, dir: &Path) -> Result<(), TaskError> {
    std::fs::create_dir_all(dir).map_err(|e| TaskError::io(dir, e))?;
    ctx.log(format!("Output directory: {}", dir.display()));
    Ok(())
}

/// File name without extension, for naming derived artifacts.
fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "output".to_string())
}

fn load_raster(ctx: &mut TaskContext, path: &Path) -> Result<Raster, TaskError> {
    let raster = Raster::load(path)?;
    ctx.log(format!("Loaded {} {:?}", path.display(), raster.shape()));
    Ok(raster)
}

/// Save `raster` and record it as an output.
fn save_raster(ctx: &mut TaskContext, raster: &Raster, path: PathBuf) -> Result<(), TaskError> {
    raster.save(&path)?;
    ctx.log(format!("Saved {}", path.display()));
    ctx.output(path);
    Ok(())
}

/// Write a text artifact and record it as an output.
fn save_text(ctx: &mut TaskContext, path: PathBuf, text: &str) -> Result<(), TaskError> {
    std::fs::write(&path, text).map_err(|e| TaskError::io(&path, e))?;
    ctx.log(format!("Saved {}", path.display()));
    ctx.output(path);
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    use crate::worker::{Task, TaskContext, TaskResult};

    /// Run a task synchronously on the current thread.
    pub fn run(task: &dyn Task) -> (Vec<String>, TaskResult) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = TaskContext::new(Uuid::new_v4(), tx, CancellationToken::new());
        let result = task.run(ctx);
        let mut progress = Vec::new();
        while let Ok(message) = rx.try_recv() {
            progress.push(message);
        }
        (progress, result)
    }

    /// Run a task whose token is already cancelled.
    pub fn run_cancelled(task: &dyn Task) -> TaskResult {
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        task.run(TaskContext::new(Uuid::new_v4(), tx, cancel))
    }
}
