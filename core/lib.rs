#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

pub mod artifact;
pub mod config;
pub mod estimator;
pub mod features;
pub mod observation;
pub mod service;
pub mod store;
pub mod summary;
pub mod vector;

#[path = "../shared/export.rs"]
pub mod export;

pub use artifact::{ArtifactError, ModelArtifact, ModelEstimator};
pub use estimator::{EstimationError, EstimationResult, Estimator, FeatureMismatch, HeuristicEstimator};
pub use features::DerivedFeatures;
pub use observation::{Observation, ObservationInput, ValidationError};
pub use service::{PredictionError, PredictionService};
pub use store::{InMemoryStore, ObservationStore, RecordId, StoredRecord};
pub use vector::{FeatureName, FeatureValue, FeatureVector, VectorError};
