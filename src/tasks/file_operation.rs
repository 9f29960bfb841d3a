//! Input validation: every path must exist and be readable.

use crate::error::TaskError;
use crate::params::FileOperationParams;
use crate::raster::Raster;
use crate::worker::{Task, TaskContext, TaskFamily};

pub struct FileOperationTask {
    params: FileOperationParams,
}

impl FileOperationTask {
    pub fn new(params: FileOperationParams) -> Self {
        Self { params }
    }
}

impl Task for FileOperationTask {
    fn family(&self) -> TaskFamily {
        TaskFamily::FileOperation
    }

    fn execute(&self, ctx: &mut TaskContext) -> Result<String, TaskError> {
        let total = self.params.input_paths.len();
        for (i, path) in self.params.input_paths.iter().enumerate() {
            ctx.checkpoint()?;
            ctx.progress(format!("Checking {} ({}/{})", path.display(), i + 1, total));

            let metadata = std::fs::metadata(path).map_err(|e| TaskError::io(path, e))?;
            if !metadata.is_file() {
                return Err(TaskError::InvalidInput(format!(
                    "{} is not a file",
                    path.display()
                )));
            }
            std::fs::File::open(path).map_err(|e| TaskError::io(path, e))?;

            let is_npy = path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("npy"));
            if is_npy {
                let raster = Raster::load(path)?;
                ctx.log(format!("{}: array {:?}", path.display(), raster.shape()));
            } else {
                ctx.log(format!("{}: {} bytes", path.display(), metadata.len()));
            }
            ctx.output(path.clone());
        }
        Ok(format!("{total} file(s) loaded"))
    }
}
