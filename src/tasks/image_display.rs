//! Band selection: writes an `(n, h, w)` composite of the chosen bands.

use crate::error::TaskError;
use crate::params::ImageDisplayParams;
use crate::raster::Raster;
use crate::tasks::{ensure_dir, file_stem, load_raster, save_raster};
use crate::worker::{Task, TaskContext, TaskFamily};

pub struct ImageDisplayTask {
    params: ImageDisplayParams,
}

impl ImageDisplayTask {
    pub fn new(params: ImageDisplayParams) -> Self {
        Self { params }
    }
}

impl Task for ImageDisplayTask {
    fn family(&self) -> TaskFamily {
        TaskFamily::ImageDisplay
    }

    fn execute(&self, ctx: &mut TaskContext) -> Result<String, TaskError> {
        let p = &self.params;
        ensure_dir(ctx, &p.output_dir)?;
        let suffix: Vec<String> = p.bands.iter().map(|b| b.to_string()).collect();
        let suffix = suffix.join("");

        for path in &p.paths {
            ctx.checkpoint()?;
            ctx.step(format!("Selecting bands {:?} from {}", p.bands, path.display()));
            let image = load_raster(ctx, path)?;
            let (count, _, _) = image.band_dims()?;

            let planes = p
                .bands
                .iter()
                .map(|&band| {
                    if band > count {
                        return Err(TaskError::InvalidInput(format!(
                            "band {band} out of range: {} has {count} band(s)",
                            path.display()
                        )));
                    }
                    image.band_raster(band - 1).map_err(TaskError::from)
                })
                .collect::<Result<Vec<_>, _>>()?;

            let composite = Raster::stack(&planes)?;
            let out = p
                .output_dir
                .join(format!("{}_bands_{suffix}.npy", file_stem(path)));
            save_raster(ctx, &composite, out)?;
        }
        Ok(format!(
            "Displayed bands {:?} for {} image(s)",
            p.bands,
            p.paths.len()
        ))
    }
}
