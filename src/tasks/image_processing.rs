//! Per-image processing chain: stretch, smooth, sharpen, edge, band math.

use crate::error::TaskError;
use crate::history::ExpressionHistory;
use crate::params::{ImageProcessingParams, ProcessingMethod};
use crate::raster::Raster;
use crate::tasks::{ensure_dir, file_stem, kernels, load_raster, save_raster};
use crate::worker::{Task, TaskContext, TaskFamily};

pub struct ImageProcessingTask {
    params: ImageProcessingParams,
}

impl ImageProcessingTask {
    pub fn new(params: ImageProcessingParams) -> Self {
        Self { params }
    }

    fn apply(&self, method: ProcessingMethod, image: &Raster) -> Result<Raster, TaskError> {
        let options = &self.params.options;
        let (count, h, w) = image.band_dims()?;

        let kernel: Box<dyn Fn(&[f64]) -> Vec<f64>> = match method {
            ProcessingMethod::Stretch => {
                let (low, high) = options.stretch.in_range;
                Box::new(move |plane: &[f64]| kernels::stretch(plane, low, high))
            }
            ProcessingMethod::Smooth => {
                let size = options.smooth.size;
                Box::new(move |plane: &[f64]| kernels::smooth(plane, h, w, size))
            }
            ProcessingMethod::Sharpen => {
                let amount = options.sharpen.amount;
                Box::new(move |plane: &[f64]| kernels::sharpen(plane, h, w, amount))
            }
            ProcessingMethod::Edge => Box::new(move |plane: &[f64]| kernels::sobel(plane, h, w)),
            ProcessingMethod::BandMath => return self.band_math(image),
        };

        let mut out = Vec::with_capacity(image.len());
        for b in 0..count {
            out.extend(kernel(image.band(b)?));
        }
        Ok(Raster::new(image.shape().to_vec(), out)?)
    }

    /// Evaluate the configured expression; the result is a single `(h, w)` band.
    fn band_math(&self, image: &Raster) -> Result<Raster, TaskError> {
        let band_math = self.params.options.band_math.as_ref().ok_or_else(|| {
            TaskError::InvalidInput("band_math requires an expression".to_string())
        })?;
        let (count, h, w) = image.band_dims()?;
        let bands = (0..count)
            .map(|b| image.band(b))
            .collect::<Result<Vec<_>, _>>()?;
        let data = band_math.expression.evaluate(&bands)?;
        Ok(Raster::new(vec![h, w], data)?)
    }
}

impl Task for ImageProcessingTask {
    fn family(&self) -> TaskFamily {
        TaskFamily::ImageProcessing
    }

    fn execute(&self, ctx: &mut TaskContext) -> Result<String, TaskError> {
        let p = &self.params;
        ensure_dir(ctx, &p.output_dir)?;
        let total = p.paths.len();

        for (i, path) in p.paths.iter().enumerate() {
            ctx.checkpoint()?;
            let mut image = load_raster(ctx, path)?;
            for method in &p.methods {
                ctx.checkpoint()?;
                ctx.step(format!(
                    "Applying {} to {} ({}/{})",
                    method.as_str(),
                    path.display(),
                    i + 1,
                    total
                ));
                image = self.apply(*method, &image)?;
            }
            let out = p
                .output_dir
                .join(format!("{}_processed.npy", file_stem(path)));
            save_raster(ctx, &image, out)?;
        }

        if p.methods.contains(&ProcessingMethod::BandMath) {
            if let Some(band_math) = &p.options.band_math {
                if let Some(history_path) = &band_math.history_path {
                    let history = ExpressionHistory::new(history_path);
                    if history.push(band_math.expression.source())? {
                        ctx.log(format!("Expression saved to {}", history_path.display()));
                    }
                }
            }
        }

        let methods: Vec<&str> = p.methods.iter().map(|m| m.as_str()).collect();
        Ok(format!(
            "Processed {total} image(s) with {}",
            methods.join(", ")
        ))
    }
}
