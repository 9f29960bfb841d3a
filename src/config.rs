//! Configuration types.
//!
//! One default parameter map per task family, the expression-history path
//! and the dispatch queue capacity. Built-in defaults can be overlaid by a
//! JSON file:
//!
//! ```json
//! {
//!   "defaults": { "image_display": { "bands": [4, 3, 2] } },
//!   "history_path": "data/expressions.json",
//!   "queue_capacity": 4
//! }
//! ```
//!
//! Family entries in the file replace the built-in entry for that family.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::error::ConfigError;
use crate::worker::TaskFamily;

/// Environment variable naming a JSON configuration file.
pub const CONFIG_ENV: &str = "GEOWORKER_CONFIG";

/// Environment variable overriding the expression-history path.
pub const HISTORY_ENV: &str = "GEOWORKER_HISTORY";

/// Environment variable overriding the dispatch queue capacity.
pub const QUEUE_ENV: &str = "GEOWORKER_QUEUE_CAPACITY";

/// A family's default parameters.
pub type ParamMap = Map<String, Value>;

/// Process-wide parameter store.
#[derive(Debug, Clone)]
pub struct Config {
    defaults: BTreeMap<TaskFamily, ParamMap>,
    history_path: PathBuf,
    /// Maximum dispatches waiting behind the active worker.
    pub queue_capacity: usize,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    defaults: BTreeMap<TaskFamily, ParamMap>,
    history_path: Option<PathBuf>,
    queue_capacity: Option<usize>,
}

impl Config {
    /// Overlay a JSON document on the built-in defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(text)?;
        let mut config = Self::default();
        for (family, params) in file.defaults {
            config.defaults.insert(family, params);
        }
        if let Some(path) = file.history_path {
            config.history_path = path;
        }
        if let Some(capacity) = file.queue_capacity {
            config.queue_capacity = capacity;
        }
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Build from the environment: `GEOWORKER_CONFIG` names an optional
    /// file, `GEOWORKER_HISTORY` overrides the history path and
    /// `GEOWORKER_QUEUE_CAPACITY` the queue capacity.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        if let Some(path) = std::env::var_os(HISTORY_ENV) {
            config.history_path = PathBuf::from(path);
        }
        if let Ok(raw) = std::env::var(QUEUE_ENV) {
            config.queue_capacity =
                raw.trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                        key: QUEUE_ENV.to_string(),
                        message: e.to_string(),
                    })?;
        }
        Ok(config)
    }

    /// Default parameters for a family (empty if none configured).
    pub fn defaults(&self, family: TaskFamily) -> ParamMap {
        self.defaults.get(&family).cloned().unwrap_or_default()
    }

    /// Set one default parameter, e.g. after a directory dialog resolves.
    pub fn set_default(&mut self, family: TaskFamily, key: impl Into<String>, value: Value) {
        self.defaults
            .entry(family)
            .or_default()
            .insert(key.into(), value);
    }

    /// Replace a family's defaults wholesale.
    pub fn set_defaults(&mut self, family: TaskFamily, params: ParamMap) {
        self.defaults.insert(family, params);
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    pub fn set_history_path(&mut self, path: impl Into<PathBuf>) {
        self.history_path = path.into();
    }
}

fn object(value: Value) -> ParamMap {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut defaults = BTreeMap::new();
        defaults.insert(
            TaskFamily::FileOperation,
            object(json!({ "input_paths": [] })),
        );
        defaults.insert(
            TaskFamily::ImageDisplay,
            object(json!({
                "paths": [],
                "bands": [3, 2, 1],
                "output_dir": "results/display"
            })),
        );
        defaults.insert(
            TaskFamily::ImageProcessing,
            object(json!({
                "paths": [],
                "methods": ["stretch"],
                "options": { "stretch": { "in_range": [2.0, 98.0] } },
                "output_dir": "results/processing"
            })),
        );
        defaults.insert(
            TaskFamily::FileSaver,
            object(json!({ "paths": [], "save_dir": "results/saved" })),
        );
        defaults.insert(
            TaskFamily::VectorProcessing,
            object(json!({ "input_paths": [], "output_dir": "results/vector" })),
        );
        defaults.insert(
            TaskFamily::Classification,
            object(json!({
                "pipeline_config": {
                    "classifiers": [{ "name": "kmeans", "params": { "k": 5 } }],
                    "compare": false
                },
                "output_dir": "results/classification"
            })),
        );
        defaults.insert(
            TaskFamily::FeatureExtraction,
            object(json!({ "input_files": [], "output_dir": "results/features" })),
        );
        defaults.insert(
            TaskFamily::Evaluation,
            object(json!({
                "output_dir": "results/evaluation",
                "formats": ["csv", "json", "txt"],
                "prefix": "confusion_matrix"
            })),
        );

        Self {
            defaults,
            history_path: PathBuf::from("data/expression_history.json"),
            queue_capacity: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_family_has_defaults() {
        let config = Config::default();
        for family in TaskFamily::ALL {
            assert!(
                config.defaults.contains_key(&family),
                "missing defaults for {family}"
            );
        }
    }

    #[test]
    fn file_overlays_defaults() {
        let config = Config::from_json(
            r#"{
                "defaults": { "image_display": { "bands": [4] } },
                "queue_capacity": 2
            }"#,
        )
        .unwrap();
        assert_eq!(config.defaults(TaskFamily::ImageDisplay)["bands"], json!([4]));
        assert!(!config.defaults(TaskFamily::ImageDisplay).contains_key("output_dir"));
        assert!(config.defaults(TaskFamily::Evaluation).contains_key("prefix"));
        assert_eq!(config.queue_capacity, 2);
        assert_eq!(
            config.history_path(),
            Path::new("data/expression_history.json")
        );
    }

    #[test]
    fn unknown_family_in_file_rejected() {
        let err = Config::from_json(r#"{ "defaults": { "band_math": {} } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn set_default_mutates_one_key() {
        let mut config = Config::default();
        config.set_default(TaskFamily::FileSaver, "save_dir", json!("/tmp/out"));
        let defaults = config.defaults(TaskFamily::FileSaver);
        assert_eq!(defaults["save_dir"], json!("/tmp/out"));
        assert_eq!(defaults["paths"], json!([]));
    }

    #[test]
    fn from_file_missing_is_read_error() {
        let err = Config::from_file(Path::new("/no/such/config.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
