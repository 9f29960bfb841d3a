//! Spectral index features.
//!
//! A single band-first array names its first five bands `blue, green, red,
//! nir, swir`. Separate files take those names only when exactly five are
//! given; otherwise every band is `band_<i>`. Each index is computed when
//! the bands it needs are present, saved on its own, then all are stacked
//! into `feature_all.npy` with shape `(h, w, n)`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::TaskError;
use crate::params::FeatureExtractionParams;
use crate::raster::Raster;
use crate::tasks::{ensure_dir, load_raster, save_raster, save_text};
use crate::worker::{Task, TaskContext, TaskFamily};

const BAND_NAMES: [&str; 5] = ["blue", "green", "red", "nir", "swir"];

/// Division that yields 0 where the denominator is 0.
fn safe_div(num: f64, den: f64) -> f64 {
    if den == 0.0 { 0.0 } else { num / den }
}

fn normalized_difference(a: f64, b: f64) -> f64 {
    safe_div(a - b, a + b)
}

/// Reflectances of one pixel.
struct Pixel {
    blue: f64,
    green: f64,
    red: f64,
    nir: f64,
    swir: f64,
}

fn ndvi(p: &Pixel) -> f64 {
    normalized_difference(p.nir, p.red)
}

fn msavi(p: &Pixel) -> f64 {
    let t = 2.0 * p.nir + 1.0;
    (t - (t * t - 8.0 * (p.nir - p.red)).max(0.0).sqrt()) / 2.0
}

fn evi(p: &Pixel) -> f64 {
    2.5 * safe_div(p.nir - p.red, p.nir + 6.0 * p.red - 7.5 * p.blue + 1.0)
}

fn ndwi(p: &Pixel) -> f64 {
    normalized_difference(p.green, p.nir)
}

fn mndwi(p: &Pixel) -> f64 {
    normalized_difference(p.green, p.swir)
}

fn ndbi(p: &Pixel) -> f64 {
    normalized_difference(p.swir, p.nir)
}

fn bsi(p: &Pixel) -> f64 {
    normalized_difference(p.swir + p.red, p.nir + p.blue)
}

type IndexFn = fn(&Pixel) -> f64;

/// Index name, the bands it reads, formula.
const INDICES: [(&str, &[&str], IndexFn); 7] = [
    ("ndvi", &["nir", "red"], ndvi),
    ("msavi", &["nir", "red"], msavi),
    ("evi", &["nir", "red", "blue"], evi),
    ("ndwi", &["green", "nir"], ndwi),
    ("mndwi", &["green", "swir"], mndwi),
    ("ndbi", &["swir", "nir"], ndbi),
    ("bsi", &["blue", "red", "nir", "swir"], bsi),
];

fn band_names(count: usize, single_file: bool) -> Vec<String> {
    let named = single_file || count == BAND_NAMES.len();
    (0..count)
        .map(|i| match BAND_NAMES.get(i) {
            Some(name) if named => name.to_string(),
            _ => format!("band_{}", i + 1),
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct FeatureEntry {
    index: usize,
    shape: [usize; 2],
}

#[derive(Debug, Serialize)]
struct FeatureInfo {
    feature_names: Vec<String>,
    feature_info: BTreeMap<String, FeatureEntry>,
    total_features: usize,
    spatial_shape: [usize; 2],
    feature_all_shape: [usize; 3],
}

pub struct FeatureExtractionTask {
    params: FeatureExtractionParams,
}

impl FeatureExtractionTask {
    pub fn new(params: FeatureExtractionParams) -> Self {
        Self { params }
    }

    /// Load band planes: one band-first 3-D array, or one plane per file.
    fn load_bands(&self, ctx: &mut TaskContext) -> Result<Vec<Raster>, TaskError> {
        let files = &self.params.input_files;
        if let [single] = files.as_slice() {
            let image = load_raster(ctx, single)?;
            let (count, _, _) = image.band_dims()?;
            return (0..count)
                .map(|b| image.band_raster(b).map_err(TaskError::from))
                .collect();
        }
        let mut planes = Vec::with_capacity(files.len());
        for path in files {
            ctx.checkpoint()?;
            let image = load_raster(ctx, path)?;
            // Multi-band files contribute their first band.
            planes.push(image.band_raster(0)?);
        }
        Ok(planes)
    }
}

impl Task for FeatureExtractionTask {
    fn family(&self) -> TaskFamily {
        TaskFamily::FeatureExtraction
    }

    fn execute(&self, ctx: &mut TaskContext) -> Result<String, TaskError> {
        let p = &self.params;
        ensure_dir(ctx, &p.output_dir)?;

        ctx.step("Loading bands");
        let planes = self.load_bands(ctx)?;
        let (h, w) = planes
            .first()
            .ok_or_else(|| TaskError::InvalidInput("no bands loaded".to_string()))?
            .dims2()?;
        if let Some(odd) = planes.iter().find(|b| b.shape() != [h, w]) {
            return Err(TaskError::InvalidInput(format!(
                "band shapes differ: {:?} vs {:?}",
                [h, w],
                odd.shape()
            )));
        }
        let names = band_names(planes.len(), p.input_files.len() == 1);
        ctx.log(format!("Band names: {}", names.join(", ")));
        let plane = |band: &str| {
            names
                .iter()
                .position(|n| n == band)
                .map(|i| planes[i].data())
        };
        let indices: Vec<_> = INDICES
            .iter()
            .filter(|(_, needs, _)| needs.iter().all(|band| plane(band).is_some()))
            .collect();
        if indices.is_empty() {
            return Err(TaskError::InvalidInput(format!(
                "no spectral index can be computed from bands: {}",
                names.join(", ")
            )));
        }
        let value = |band: &str, i: usize| plane(band).map_or(0.0, |data| data[i]);
        let pixels: Vec<Pixel> = (0..h * w)
            .map(|i| Pixel {
                blue: value("blue", i),
                green: value("green", i),
                red: value("red", i),
                nir: value("nir", i),
                swir: value("swir", i),
            })
            .collect();

        let mut features: Vec<(&str, Raster)> = Vec::with_capacity(indices.len());
        for &&(name, _, formula) in &indices {
            ctx.checkpoint()?;
            ctx.step(format!("Computing {}", name.to_uppercase()));
            let raster = Raster::new(vec![h, w], pixels.iter().map(formula).collect())?;
            save_raster(ctx, &raster, p.output_dir.join(format!("{name}.npy")))?;
            features.push((name, raster));
        }

        ctx.checkpoint()?;
        ctx.step("Stacking features");
        let n = features.len();
        let mut stacked = Vec::with_capacity(h * w * n);
        for i in 0..h * w {
            stacked.extend(features.iter().map(|(_, r)| r.data()[i]));
        }
        let all = Raster::new(vec![h, w, n], stacked)?;
        save_raster(ctx, &all, p.output_dir.join("feature_all.npy"))?;

        let info = FeatureInfo {
            feature_names: features.iter().map(|(name, _)| name.to_string()).collect(),
            feature_info: features
                .iter()
                .enumerate()
                .map(|(index, (name, _))| {
                    (name.to_string(), FeatureEntry { index, shape: [h, w] })
                })
                .collect(),
            total_features: n,
            spatial_shape: [h, w],
            feature_all_shape: [h, w, n],
        };
        let json = serde_json::to_string_pretty(&info)
            .map_err(|e| TaskError::InvalidInput(format!("feature info: {e}")))?;
        let info_path: PathBuf = p.output_dir.join("feature_info.json");
        save_text(ctx, info_path, &json)?;

        Ok(format!("Extracted {n} feature(s)"))
    }
}
