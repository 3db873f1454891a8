//! Runtime configuration: which estimator serves predictions.
//!
//! ```toml
//! [estimator]
//! kind = "model"
//! artifact = "models/yield.toml"
//! ```

use crate::artifact::{ArtifactError, ModelEstimator};
use crate::estimator::{Estimator, HeuristicEstimator};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorKind {
    #[default]
    Heuristic,
    Model,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub kind: EstimatorKind,
    /// Required when `kind` is `model`.
    pub artifact: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub estimator: EstimatorConfig,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("The model estimator is selected but no artifact path is configured.")]
    MissingArtifact,
    #[error("Failed to load the configured model artifact: {0}")]
    Artifact(#[from] ArtifactError),
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Points the configuration at a model artifact, selecting the model estimator.
    pub fn with_artifact(mut self, path: PathBuf) -> Self {
        self.estimator.kind = EstimatorKind::Model;
        self.estimator.artifact = Some(path);
        self
    }

    /// Instantiates the configured estimator. Artifact I/O happens here, once.
    pub fn build_estimator(&self) -> Result<Arc<dyn Estimator>, ConfigError> {
        match self.estimator.kind {
            EstimatorKind::Heuristic => Ok(Arc::new(HeuristicEstimator)),
            EstimatorKind::Model => {
                let path = self
                    .estimator
                    .artifact
                    .as_deref()
                    .ok_or(ConfigError::MissingArtifact)?;
                Ok(Arc::new(ModelEstimator::load(path)?))
            }
        }
    }
}
