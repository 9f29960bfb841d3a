//! ROI polygons to label masks.
//!
//! Input files are JSON documents:
//!
//! ```json
//! { "width": 4, "height": 3, "rois": [{ "label": 1, "points": [[0, 0], [2, 0], [2, 2]] }] }
//! ```
//!
//! Coordinates are in pixel units with the origin at the top-left corner.

use std::path::Path;

use serde::Deserialize;

use crate::error::TaskError;
use crate::params::VectorProcessingParams;
use crate::raster::Raster;
use crate::tasks::{ensure_dir, file_stem, save_raster};
use crate::worker::{Task, TaskContext, TaskFamily};

#[derive(Debug, Deserialize)]
struct RoiFile {
    width: usize,
    height: usize,
    rois: Vec<Roi>,
}

#[derive(Debug, Deserialize)]
struct Roi {
    label: i64,
    points: Vec<[f64; 2]>,
}

/// Even-odd test.
fn contains(points: &[[f64; 2]], x: f64, y: f64) -> bool {
    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let [xi, yi] = points[i];
        let [xj, yj] = points[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

pub struct VectorProcessingTask {
    params: VectorProcessingParams,
}

impl VectorProcessingTask {
    pub fn new(params: VectorProcessingParams) -> Self {
        Self { params }
    }

    fn rasterize(&self, ctx: &mut TaskContext, path: &Path) -> Result<Raster, TaskError> {
        let text = std::fs::read_to_string(path).map_err(|e| TaskError::io(path, e))?;
        let file: RoiFile = serde_json::from_str(&text).map_err(|e| {
            TaskError::InvalidInput(format!("{} is not an ROI file: {e}", path.display()))
        })?;

        let mut mask = Raster::zeros(vec![file.height, file.width]);
        for (index, roi) in file.rois.iter().enumerate() {
            if roi.points.len() < 3 {
                ctx.log(format!(
                    "Skipping ROI {index} (label {}): fewer than 3 points",
                    roi.label
                ));
                continue;
            }
            let label = roi.label as f64;
            let data = mask.data_mut();
            for y in 0..file.height {
                for x in 0..file.width {
                    if contains(&roi.points, x as f64 + 0.5, y as f64 + 0.5) {
                        data[y * file.width + x] = label;
                    }
                }
            }
        }
        Ok(mask)
    }
}

impl Task for VectorProcessingTask {
    fn family(&self) -> TaskFamily {
        TaskFamily::VectorProcessing
    }

    fn execute(&self, ctx: &mut TaskContext) -> Result<String, TaskError> {
        let p = &self.params;
        if let Some(dir) = &p.output_dir {
            ensure_dir(ctx, dir)?;
        }
        if p.input_paths.is_empty() {
            let dir = p.output_dir.as_deref().unwrap_or(Path::new("."));
            ctx.output(dir);
            return Ok(format!("Vector output directory ready: {}", dir.display()));
        }

        for path in &p.input_paths {
            ctx.checkpoint()?;
            ctx.step(format!("Rasterizing {}", path.display()));
            let mask = self.rasterize(ctx, path)?;
            let dir = match &p.output_dir {
                Some(dir) => dir.as_path(),
                None => path.parent().unwrap_or(Path::new(".")),
            };
            let out = dir.join(format!("{}_mask.npy", file_stem(path)));
            save_raster(ctx, &mask, out)?;
        }
        Ok(format!("Rasterized {} ROI file(s)", p.input_paths.len()))
    }
}
