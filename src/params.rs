//! Parameter resolution and per-family schemas.
//!
//! A dispatch starts from the family's default map, shallow-merges the
//! caller's overrides on top, then decodes the merged map into the closed
//! `TaskParams` variant for that family. Decoding and validation happen at
//! dispatch time so a bad key never reaches a worker thread. Unrecognized
//! keys are ignored.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::ParamMap;
use crate::error::DispatchError;
use crate::tasks::band_math::BandExpression;
use crate::worker::TaskFamily;

/// Shallow merge: override keys win, nested maps are replaced, not merged.
pub fn resolve_params(defaults: &ParamMap, overrides: &ParamMap) -> ParamMap {
    let mut resolved = defaults.clone();
    for (key, value) in overrides {
        resolved.insert(key.clone(), value.clone());
    }
    resolved
}

/// Overrides that feed a finished task's outputs into the primary input of
/// the next family.
pub fn chain_overrides(next: TaskFamily, outputs: &[PathBuf]) -> ParamMap {
    let mut overrides = ParamMap::new();
    let Some(first) = outputs.first() else {
        return overrides;
    };
    let all: Vec<Value> = outputs
        .iter()
        .map(|p| Value::String(p.display().to_string()))
        .collect();
    let preferred = |suffix: &str| {
        outputs
            .iter()
            .find(|p| p.to_string_lossy().ends_with(suffix))
            .unwrap_or(first)
            .display()
            .to_string()
    };

    match next {
        TaskFamily::FileOperation | TaskFamily::VectorProcessing => {
            overrides.insert("input_paths".into(), Value::Array(all));
        }
        TaskFamily::ImageDisplay | TaskFamily::ImageProcessing | TaskFamily::FileSaver => {
            overrides.insert("paths".into(), Value::Array(all));
        }
        TaskFamily::FeatureExtraction => {
            overrides.insert("input_files".into(), Value::Array(all));
        }
        TaskFamily::Classification => {
            overrides.insert(
                "data".into(),
                json!({ "features": preferred("feature_all.npy") }),
            );
        }
        TaskFamily::Evaluation => {
            overrides.insert(
                "class_map_path".into(),
                Value::String(preferred("class_map.npy")),
            );
        }
    }
    overrides
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOperationParams {
    pub input_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageDisplayParams {
    pub paths: Vec<PathBuf>,
    /// 1-based band indices.
    pub bands: Vec<usize>,
    #[serde(default = "default_display_dir")]
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMethod {
    Stretch,
    Smooth,
    Sharpen,
    Edge,
    BandMath,
}

impl ProcessingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stretch => "stretch",
            Self::Smooth => "smooth",
            Self::Sharpen => "sharpen",
            Self::Edge => "edge",
            Self::BandMath => "band_math",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StretchOptions {
    /// Lower and upper percentiles.
    #[serde(default = "default_in_range")]
    pub in_range: (f64, f64),
}

impl Default for StretchOptions {
    fn default() -> Self {
        Self {
            in_range: default_in_range(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothOptions {
    #[serde(default = "default_kernel_size")]
    pub size: usize,
}

impl Default for SmoothOptions {
    fn default() -> Self {
        Self {
            size: default_kernel_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharpenOptions {
    #[serde(default = "default_amount")]
    pub amount: f64,
}

impl Default for SharpenOptions {
    fn default() -> Self {
        Self {
            amount: default_amount(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandMathOptions {
    pub expression: BandExpression,
    /// When set, the expression is appended to this history file.
    #[serde(default)]
    pub history_path: Option<PathBuf>,
}

/// Method-specific options, keyed by method name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingOptions {
    #[serde(default)]
    pub stretch: StretchOptions,
    #[serde(default)]
    pub smooth: SmoothOptions,
    #[serde(default)]
    pub sharpen: SharpenOptions,
    #[serde(default)]
    pub band_math: Option<BandMathOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageProcessingParams {
    pub paths: Vec<PathBuf>,
    pub methods: Vec<ProcessingMethod>,
    #[serde(default)]
    pub options: ProcessingOptions,
    #[serde(default = "default_processing_dir")]
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSaverParams {
    pub save_dir: PathBuf,
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorProcessingParams {
    #[serde(default)]
    pub input_paths: Vec<PathBuf>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationData {
    pub features: PathBuf,
    #[serde(default)]
    pub labels: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    Kmeans,
    MinimumDistance,
}

/// Wire form of a classifier entry: `{ "name": ..., "params": {...} }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierSpec {
    pub name: ClassifierKind,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KmeansParams {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

/// A classifier with its parameters decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ClassifierSpec", into = "ClassifierSpec")]
pub enum Classifier {
    Kmeans(KmeansParams),
    MinimumDistance,
}

impl Classifier {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Kmeans(_) => "kmeans",
            Self::MinimumDistance => "minimum_distance",
        }
    }

    pub fn needs_labels(&self) -> bool {
        matches!(self, Self::MinimumDistance)
    }
}

impl TryFrom<ClassifierSpec> for Classifier {
    type Error = String;

    fn try_from(spec: ClassifierSpec) -> Result<Self, Self::Error> {
        let params = match spec.params {
            Value::Null => json!({}),
            other => other,
        };
        match spec.name {
            ClassifierKind::Kmeans => {
                let params: KmeansParams = decode(params)?;
                if params.k == 0 {
                    return Err("kmeans requires k >= 1".to_string());
                }
                Ok(Self::Kmeans(params))
            }
            ClassifierKind::MinimumDistance => Ok(Self::MinimumDistance),
        }
    }
}

impl From<Classifier> for ClassifierSpec {
    fn from(classifier: Classifier) -> Self {
        match classifier {
            Classifier::Kmeans(params) => Self {
                name: ClassifierKind::Kmeans,
                params: serde_json::to_value(params).unwrap_or(Value::Null),
            },
            Classifier::MinimumDistance => Self {
                name: ClassifierKind::MinimumDistance,
                params: Value::Null,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub classifiers: Vec<Classifier>,
    #[serde(default)]
    pub compare: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationParams {
    pub data: ClassificationData,
    pub pipeline_config: PipelineConfig,
    #[serde(default = "default_classification_dir")]
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureExtractionParams {
    pub input_files: Vec<PathBuf>,
    #[serde(default = "default_features_dir")]
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    Png,
    Csv,
    Json,
    Txt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationParams {
    #[serde(default)]
    pub class_map_path: Option<PathBuf>,
    #[serde(default)]
    pub roi_mask_path: Option<PathBuf>,
    #[serde(default)]
    pub samples_file: Option<PathBuf>,
    /// Random pixels to draw from the class map into a sample table.
    #[serde(default)]
    pub num_samples: Option<usize>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Class value (as a string key) to display name.
    #[serde(default)]
    pub label_names: BTreeMap<String, String>,
    #[serde(default = "default_formats")]
    pub formats: Vec<ReportFormat>,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_evaluation_dir")]
    pub output_dir: PathBuf,
}

/// Which evaluation entry point a parameter set selects.
#[derive(Debug, Clone, Copy)]
pub enum EvaluationSource<'a> {
    Samples(&'a Path),
    ClassMap {
        class_map: &'a Path,
        roi_mask: &'a Path,
    },
    GenerateSamples {
        class_map: &'a Path,
        count: usize,
        seed: u64,
    },
}

impl EvaluationParams {
    /// Precedence: samples table, then class map with ROI mask, then class
    /// map with a sample count.
    pub fn source(&self) -> Option<EvaluationSource<'_>> {
        if let Some(samples) = &self.samples_file {
            return Some(EvaluationSource::Samples(samples));
        }
        match (&self.class_map_path, &self.roi_mask_path, self.num_samples) {
            (Some(class_map), Some(roi_mask), _) => Some(EvaluationSource::ClassMap {
                class_map,
                roi_mask,
            }),
            (Some(class_map), None, Some(count)) => Some(EvaluationSource::GenerateSamples {
                class_map,
                count,
                seed: self.seed,
            }),
            _ => None,
        }
    }
}

/// Validated parameters, one variant per task family.
#[derive(Debug, Clone)]
pub enum TaskParams {
    FileOperation(FileOperationParams),
    ImageDisplay(ImageDisplayParams),
    ImageProcessing(ImageProcessingParams),
    FileSaver(FileSaverParams),
    VectorProcessing(VectorProcessingParams),
    Classification(ClassificationParams),
    FeatureExtraction(FeatureExtractionParams),
    Evaluation(EvaluationParams),
}

impl TaskParams {
    /// Decode and validate a resolved parameter map for `family`.
    pub fn parse(family: TaskFamily, params: &ParamMap) -> Result<Self, DispatchError> {
        let value = Value::Object(params.clone());
        let decoded = match family {
            TaskFamily::FileOperation => decode(value).map(Self::FileOperation),
            TaskFamily::ImageDisplay => decode(value).map(Self::ImageDisplay),
            TaskFamily::ImageProcessing => decode(value).map(Self::ImageProcessing),
            TaskFamily::FileSaver => decode(value).map(Self::FileSaver),
            TaskFamily::VectorProcessing => decode(value).map(Self::VectorProcessing),
            TaskFamily::Classification => decode(value).map(Self::Classification),
            TaskFamily::FeatureExtraction => decode(value).map(Self::FeatureExtraction),
            TaskFamily::Evaluation => decode(value).map(Self::Evaluation),
        };
        decoded
            .and_then(|params| params.validate().map(|()| params))
            .map_err(|reason| DispatchError::InvalidParameters {
                family: family.to_string(),
                reason,
            })
    }

    /// Point band-math history at `path` when the options leave it unset.
    pub fn with_history_path(mut self, path: &Path) -> Self {
        if let Self::ImageProcessing(p) = &mut self {
            if let Some(band_math) = &mut p.options.band_math {
                band_math
                    .history_path
                    .get_or_insert_with(|| path.to_path_buf());
            }
        }
        self
    }

    pub fn family(&self) -> TaskFamily {
        match self {
            Self::FileOperation(_) => TaskFamily::FileOperation,
            Self::ImageDisplay(_) => TaskFamily::ImageDisplay,
            Self::ImageProcessing(_) => TaskFamily::ImageProcessing,
            Self::FileSaver(_) => TaskFamily::FileSaver,
            Self::VectorProcessing(_) => TaskFamily::VectorProcessing,
            Self::Classification(_) => TaskFamily::Classification,
            Self::FeatureExtraction(_) => TaskFamily::FeatureExtraction,
            Self::Evaluation(_) => TaskFamily::Evaluation,
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            Self::FileOperation(p) => require(!p.input_paths.is_empty(), "input_paths is empty"),
            Self::ImageDisplay(p) => {
                require(!p.paths.is_empty(), "paths is empty")?;
                require(!p.bands.is_empty(), "bands is empty")?;
                require(
                    p.bands.iter().all(|&b| b >= 1),
                    "bands are 1-based; 0 is not a band",
                )
            }
            Self::ImageProcessing(p) => {
                require(!p.paths.is_empty(), "paths is empty")?;
                require(!p.methods.is_empty(), "methods is empty")?;
                let (lo, hi) = p.options.stretch.in_range;
                require(
                    (0.0..=100.0).contains(&lo) && (0.0..=100.0).contains(&hi) && lo < hi,
                    "stretch in_range must satisfy 0 <= low < high <= 100",
                )?;
                require(
                    p.options.smooth.size % 2 == 1,
                    "smooth size must be odd",
                )?;
                require(
                    !p.methods.contains(&ProcessingMethod::BandMath)
                        || p.options.band_math.is_some(),
                    "band_math requires options.band_math.expression",
                )
            }
            Self::FileSaver(p) => require(!p.paths.is_empty(), "paths is empty"),
            Self::VectorProcessing(p) => require(
                !p.input_paths.is_empty() || p.output_dir.is_some(),
                "either input_paths or output_dir is required",
            ),
            Self::Classification(p) => {
                let pipeline = &p.pipeline_config;
                require(!pipeline.classifiers.is_empty(), "no classifiers configured")?;
                match pipeline.classifiers.iter().find(|c| c.needs_labels()) {
                    Some(c) if p.data.labels.is_none() => {
                        Err(format!("{} requires data.labels", c.name()))
                    }
                    _ => Ok(()),
                }
            }
            Self::FeatureExtraction(p) => {
                require(!p.input_files.is_empty(), "input_files is empty")
            }
            Self::Evaluation(p) => {
                require(p.num_samples != Some(0), "num_samples must be at least 1")?;
                require(
                    p.source().is_some(),
                    "samples_file, class_map_path with roi_mask_path, or class_map_path with num_samples is required",
                )?;
                require(!p.prefix.trim().is_empty(), "prefix is empty")
            }
        }
    }
}

fn require(condition: bool, reason: &str) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(reason.to_string())
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, String> {
    serde_json::from_value(value).map_err(|e| e.to_string())
}

fn default_in_range() -> (f64, f64) {
    (2.0, 98.0)
}

fn default_kernel_size() -> usize {
    3
}

fn default_amount() -> f64 {
    1.0
}

fn default_k() -> usize {
    5
}

fn default_max_iter() -> usize {
    100
}

fn default_seed() -> u64 {
    42
}

fn default_formats() -> Vec<ReportFormat> {
    vec![ReportFormat::Csv, ReportFormat::Json, ReportFormat::Txt]
}

fn default_prefix() -> String {
    "confusion_matrix".to_string()
}

fn default_display_dir() -> PathBuf {
    PathBuf::from("results/display")
}

fn default_processing_dir() -> PathBuf {
    PathBuf::from("results/processing")
}

fn default_classification_dir() -> PathBuf {
    PathBuf::from("results/classification")
}

fn default_features_dir() -> PathBuf {
    PathBuf::from("results/features")
}

fn default_evaluation_dir() -> PathBuf {
    PathBuf::from("results/evaluation")
}
