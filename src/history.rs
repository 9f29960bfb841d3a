//! Persisted band-math expression history.
//!
//! The file is a JSON array of strings. A missing file reads as an empty
//! history.

use std::path::{Path, PathBuf};

use crate::error::HistoryError;

#[derive(Debug, Clone)]
pub struct ExpressionHistory {
    path: PathBuf,
}

impl ExpressionHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<String>, HistoryError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io_error(source)),
        };
        serde_json::from_str(&text).map_err(|source| HistoryError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Overwrite the file with `entries`, creating parent directories.
    pub fn save(&self, entries: &[String]) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }
        let json = serde_json::to_string_pretty(entries).map_err(|source| HistoryError::Parse {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&self.path, json).map_err(|source| self.io_error(source))
    }

    /// Append `expression` unless it repeats the most recent entry.
    /// Returns whether the history changed.
    pub fn push(&self, expression: &str) -> Result<bool, HistoryError> {
        let expression = expression.trim();
        let mut entries = self.load()?;
        if expression.is_empty() || entries.last().is_some_and(|last| last == expression) {
            return Ok(false);
        }
        entries.push(expression.to_string());
        self.save(&entries)?;
        tracing::debug!(path = %self.path.display(), "Expression history updated");
        Ok(true)
    }

    fn io_error(&self, source: std::io::Error) -> HistoryError {
        HistoryError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let history = ExpressionHistory::new(dir.path().join("history.json"));
        assert!(history.load().unwrap().is_empty());
    }

    #[test]
    fn push_appends_and_skips_repeat() {
        let dir = tempfile::tempdir().unwrap();
        let history = ExpressionHistory::new(dir.path().join("nested/history.json"));

        assert!(history.push("(b4 - b3) / (b4 + b3)").unwrap());
        assert!(!history.push("(b4 - b3) / (b4 + b3)").unwrap());
        assert!(history.push("b2 * 2").unwrap());
        assert!(history.push("(b4 - b3) / (b4 + b3)").unwrap());

        assert_eq!(
            history.load().unwrap(),
            ["(b4 - b3) / (b4 + b3)", "b2 * 2", "(b4 - b3) / (b4 + b3)"]
        );
    }

    #[test]
    fn save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let history = ExpressionHistory::new(dir.path().join("history.json"));
        history.save(&["a".to_string(), "b".to_string()]).unwrap();
        history.save(&["c".to_string()]).unwrap();
        assert_eq!(history.load().unwrap(), ["c"]);
    }

    #[test]
    fn invalid_json_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "{\"not\": \"a list\"}").unwrap();
        let err = ExpressionHistory::new(path).load().unwrap_err();
        assert!(matches!(err, HistoryError::Parse { .. }));
    }
}
