use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::writer::SaveTarget;

/// Errors loading or validating a [`SaveConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Save pipeline configuration. Missing fields fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    /// Folder the artifact is written into. Created on first save.
    pub folder: PathBuf,
    /// Artifact file name inside `folder`.
    pub filename: String,
    /// zstd level for the reference codec.
    pub compression_level: i32,
    /// Thread name of the background save worker.
    pub worker_name: String,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("saves"),
            filename: "snapshot.cbor.zst".into(),
            compression_level: 3,
            worker_name: "snapreg-save".into(),
        }
    }
}

impl SaveConfig {
    /// Load from a `.json`, `.yaml` or `.yml` file and validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let config: Self = match ext.as_str() {
            "json" => serde_json::from_str(&text)?,
            "yaml" | "yml" => serde_yaml::from_str(&text)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_owned())),
        };
        config.validate()?;
        tracing::debug!(path = %path.display(), ?config, "loaded save config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.filename.is_empty() {
            return Err(ConfigError::Invalid("filename is empty".into()));
        }
        if Path::new(&self.filename).components().count() != 1 {
            return Err(ConfigError::Invalid(format!(
                "filename `{}` must not contain path separators",
                self.filename
            )));
        }
        if !zstd::compression_level_range().contains(&self.compression_level) {
            return Err(ConfigError::Invalid(format!(
                "compression level {} out of range",
                self.compression_level
            )));
        }
        Ok(())
    }

    pub fn target(&self) -> SaveTarget {
        SaveTarget::new(self.folder.clone(), self.filename.clone())
    }
}
