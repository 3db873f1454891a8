use crate::estimator::{EstimationError, EstimationResult, Estimator, FeatureMismatch};
use crate::vector::{FeatureName, FeatureValue, FeatureVector, canonical_name};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

// --- Public Data Structures ---
// These structs define the human-readable format of a trained model artifact
// when serialized to a TOML file.

/// Connects a head's linear predictor to its output scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkFunction {
    /// The prediction is the linear predictor itself.
    #[default]
    Identity,
    /// The prediction is `exp` of the linear predictor, for strictly positive targets.
    Log,
}

/// One fitted linear head: an intercept plus one coefficient per declared feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearHead {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
    #[serde(default)]
    pub link: LinkFunction,
}

impl LinearHead {
    fn evaluate(&self, head: &'static str, row: ArrayView1<f64>) -> Result<f64, EstimationError> {
        if self.coefficients.len() != row.len() {
            return Err(EstimationError::HeadShape {
                head,
                coefficients: self.coefficients.len(),
                features: row.len(),
            });
        }
        let eta = self.intercept + ArrayView1::from(&self.coefficients[..]).dot(&row);
        Ok(match self.link {
            LinkFunction::Identity => eta,
            // Clamp to keep exp() finite
            LinkFunction::Log => eta.clamp(-700.0, 700.0).exp(),
        })
    }
}

/// Numeric codes for the levels of one categorical feature.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryEncoding {
    pub levels: HashMap<String, f64>,
    /// Code used for levels not seen during training.
    #[serde(default)]
    pub unknown: f64,
}

impl CategoryEncoding {
    pub fn encode(&self, level: &str) -> f64 {
        self.levels.get(level).copied().unwrap_or(self.unknown)
    }
}

/// The top-level, self-contained, trained model artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The feature order every head's coefficients follow.
    pub feature_names: Vec<String>,
    #[serde(default)]
    pub categories: HashMap<String, CategoryEncoding>,
    pub production: LinearHead,
    #[serde(rename = "yield")]
    pub crop_yield: LinearHead,
    pub price: LinearHead,
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Failed to read or write artifact file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML artifact file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize artifact to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("The artifact declares no features.")]
    NoFeatures,
    #[error("The artifact declares feature '{0}' more than once.")]
    DuplicateFeature(String),
    #[error("The '{head}' head has {found} coefficients, but the artifact declares {expected} features.")]
    CoefficientCount {
        head: &'static str,
        found: usize,
        expected: usize,
    },
    #[error("The '{head}' head contains a non-finite parameter.")]
    NonFiniteParameter { head: &'static str },
    #[error("A category encoding is given for '{0}', which is not a declared feature.")]
    OrphanEncoding(String),
    #[error("Categorical feature '{0}' has no category encoding.")]
    MissingEncoding(String),
}

impl ModelArtifact {
    fn heads(&self) -> [(&'static str, &LinearHead); 3] {
        [
            ("production", &self.production),
            ("yield", &self.crop_yield),
            ("price", &self.price),
        ]
    }

    /// Rewrites legacy column names onto the canonical schema names.
    pub fn canonicalize(&mut self) {
        for name in &mut self.feature_names {
            *name = canonical_name(name);
        }
        self.categories = std::mem::take(&mut self.categories)
            .into_iter()
            .map(|(name, encoding)| (canonical_name(&name), encoding))
            .collect();
    }

    /// Checks the internal consistency of the bundle, independent of any vector.
    pub fn validate(&self) -> Result<(), ArtifactError> {
        if self.feature_names.is_empty() {
            return Err(ArtifactError::NoFeatures);
        }
        let mut seen = HashSet::with_capacity(self.feature_names.len());
        for name in &self.feature_names {
            if !seen.insert(name.as_str()) {
                return Err(ArtifactError::DuplicateFeature(name.clone()));
            }
        }
        for (head, params) in self.heads() {
            if params.coefficients.len() != self.feature_names.len() {
                return Err(ArtifactError::CoefficientCount {
                    head,
                    found: params.coefficients.len(),
                    expected: self.feature_names.len(),
                });
            }
            if !params.intercept.is_finite() || params.coefficients.iter().any(|c| !c.is_finite()) {
                return Err(ArtifactError::NonFiniteParameter { head });
            }
        }
        if let Some(orphan) = self.categories.keys().find(|name| !seen.contains(name.as_str())) {
            return Err(ArtifactError::OrphanEncoding(orphan.clone()));
        }
        if let Some(unencoded) = self.feature_names.iter().find(|name| {
            FeatureName::parse(name).is_some_and(FeatureName::is_categorical)
                && !self.categories.contains_key(name.as_str())
        }) {
            return Err(ArtifactError::MissingEncoding(unencoded.clone()));
        }
        Ok(())
    }

    /// The inference entry point: one row of values in `feature_names` order.
    ///
    /// A row or head whose length disagrees with `feature_names` is an error, so an
    /// artifact built in code without `validate` cannot panic here.
    pub fn infer(&self, row: &[&FeatureValue]) -> Result<EstimationResult, EstimationError> {
        if row.len() != self.feature_names.len() {
            return Err(EstimationError::RowLength {
                expected: self.feature_names.len(),
                found: row.len(),
            });
        }
        let mut encoded = Array1::<f64>::zeros(self.feature_names.len());
        for ((slot, name), value) in encoded.iter_mut().zip(&self.feature_names).zip(row) {
            *slot = match (value, self.categories.get(name)) {
                (FeatureValue::Numeric(x), _) => *x,
                (FeatureValue::Category(level), Some(encoding)) => encoding.encode(level),
                (FeatureValue::Category(_), None) => {
                    return Err(EstimationError::WrongKind {
                        name: name.clone(),
                        expected: "numeric",
                    });
                }
            };
        }

        let view = encoded.view();
        let production = self.production.evaluate("production", view)?.max(0.0);
        let crop_yield = self.crop_yield.evaluate("yield", view)?.max(0.0);
        let price = self.price.evaluate("price", view)?;
        EstimationResult::checked(production, crop_yield, price)
    }

    /// Saves the artifact in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads, canonicalizes and validates an artifact from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let toml_string = fs::read_to_string(path)?;
        let mut artifact: Self = toml::from_str(&toml_string)?;
        artifact.canonicalize();
        artifact.validate()?;
        log::info!(
            "Loaded model artifact '{}' with {} features",
            path.display(),
            artifact.feature_names.len()
        );
        Ok(artifact)
    }
}

/// The artifact in service together with where it came from and any latched fault.
/// All three change under one lock so a reader never pairs a new artifact with an old
/// source or fault.
struct ArtifactState {
    artifact: Arc<ModelArtifact>,
    source: Option<PathBuf>,
    fault: Option<FeatureMismatch>,
}

/// An estimator backed by a trained artifact.
///
/// The artifact is held behind an `Arc` that predictions clone, so a reload swaps
/// in a complete replacement while in-flight predictions finish on their snapshot.
/// A feature mismatch faults the instance until the next successful reload. A
/// mismatch seen on a snapshot that has since been replaced is not latched.
pub struct ModelEstimator {
    state: RwLock<ArtifactState>,
}

impl ModelEstimator {
    fn with_state(artifact: ModelArtifact, source: Option<PathBuf>) -> Self {
        Self {
            state: RwLock::new(ArtifactState {
                artifact: Arc::new(artifact),
                source,
                fault: None,
            }),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ArtifactState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ArtifactState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let artifact = ModelArtifact::load(path)?;
        Ok(Self::with_state(artifact, Some(path.to_path_buf())))
    }

    pub fn from_artifact(mut artifact: ModelArtifact) -> Result<Self, ArtifactError> {
        artifact.canonicalize();
        artifact.validate()?;
        Ok(Self::with_state(artifact, None))
    }

    /// The path the artifact in service was loaded from. `None` after `replace`.
    pub fn source(&self) -> Option<PathBuf> {
        self.read_state().source.clone()
    }

    /// A consistent snapshot of the current artifact.
    pub fn artifact(&self) -> Arc<ModelArtifact> {
        Arc::clone(&self.read_state().artifact)
    }

    pub fn fault(&self) -> Option<FeatureMismatch> {
        self.read_state().fault.clone()
    }

    /// Loads a complete artifact from `path` and swaps it in, clearing any fault.
    /// On error the current artifact stays in service.
    pub fn reload(&self, path: &Path) -> Result<(), ArtifactError> {
        let fresh = ModelArtifact::load(path)?;
        self.install(fresh, Some(path.to_path_buf()));
        Ok(())
    }

    /// Validates `artifact` and swaps it in, clearing any fault.
    pub fn replace(&self, mut artifact: ModelArtifact) -> Result<(), ArtifactError> {
        artifact.canonicalize();
        artifact.validate()?;
        self.install(artifact, None);
        Ok(())
    }

    fn install(&self, artifact: ModelArtifact, source: Option<PathBuf>) {
        let mut state = self.write_state();
        state.artifact = Arc::new(artifact);
        state.source = source;
        state.fault = None;
        drop(state);
        log::info!("Model artifact swapped in");
    }

    /// Latches `mismatch` if `snapshot` is still the artifact in service.
    fn record_fault(&self, snapshot: &Arc<ModelArtifact>, mismatch: &FeatureMismatch) {
        let mut state = self.write_state();
        if !Arc::ptr_eq(&state.artifact, snapshot) {
            log::debug!("Ignoring mismatch against a replaced artifact: {mismatch}");
            return;
        }
        state.fault = Some(mismatch.clone());
        drop(state);
        log::warn!("Model estimator faulted: {mismatch}");
    }
}

impl Estimator for ModelEstimator {
    fn name(&self) -> &'static str {
        "model"
    }

    fn verify_schema(&self, schema: &[&str]) -> Result<(), FeatureMismatch> {
        let artifact = self.artifact();
        let declared = artifact.feature_names.iter().map(String::as_str);
        match FeatureMismatch::between(declared, schema.iter().copied()) {
            None => Ok(()),
            Some(mismatch) => {
                self.record_fault(&artifact, &mismatch);
                Err(mismatch)
            }
        }
    }

    fn predict(&self, vector: &FeatureVector) -> Result<EstimationResult, EstimationError> {
        let artifact = {
            let state = self.read_state();
            if let Some(fault) = &state.fault {
                return Err(fault.clone().into());
            }
            Arc::clone(&state.artifact)
        };

        let declared = artifact.feature_names.iter().map(String::as_str);
        if let Some(mismatch) = FeatureMismatch::between(declared, vector.names()) {
            self.record_fault(&artifact, &mismatch);
            return Err(mismatch.into());
        }

        let row = vector.project(&artifact.feature_names).map_err(|missing| {
            EstimationError::from(FeatureMismatch {
                missing,
                unexpected: Vec::new(),
            })
        })?;
        artifact.infer(&row)
    }
}
