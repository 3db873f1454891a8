// ========================================================================================
//
//                               The Prediction Service
//
// ========================================================================================
//
// The only entry point external collaborators call. A request flows through a fixed
// sequence of stages: validation, feature derivation, vector assembly, estimation and,
// only once all of those have succeeded, persistence. A failure at any stage leaves the
// store exactly as it was.

use crate::estimator::{EstimationError, EstimationResult, Estimator, FeatureMismatch, HeuristicEstimator};
use crate::features::DerivedFeatures;
use crate::observation::{Observation, ObservationInput, ValidationError};
use crate::store::{InMemoryStore, ObservationStore, RecordId, StoreError, StoredRecord};
use crate::summary::{self, PredictionSummary};
use crate::vector::{self, VectorError};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::sync::Arc;
use thiserror::Error;

/// A persisted estimate: record id, observation, result and creation time.
pub type Prediction = StoredRecord;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The builder saw a value that validation should have rejected. A caller bug.
    #[error(transparent)]
    InvalidObservation(#[from] VectorError),
    #[error("{0}")]
    FeatureMismatch(FeatureMismatch),
    #[error("Estimation failed: {0}")]
    EstimationFailure(EstimationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<EstimationError> for PredictionError {
    fn from(err: EstimationError) -> Self {
        match err {
            EstimationError::FeatureMismatch(mismatch) => PredictionError::FeatureMismatch(mismatch),
            other => PredictionError::EstimationFailure(other),
        }
    }
}

impl From<FeatureMismatch> for PredictionError {
    fn from(mismatch: FeatureMismatch) -> Self {
        PredictionError::FeatureMismatch(mismatch)
    }
}

pub struct PredictionService {
    estimator: Arc<dyn Estimator>,
    store: Arc<dyn ObservationStore>,
}

impl PredictionService {
    /// Wires an estimator to a store after checking the estimator accepts the feature schema.
    pub fn new(
        estimator: Arc<dyn Estimator>,
        store: Arc<dyn ObservationStore>,
    ) -> Result<Self, PredictionError> {
        estimator.verify_schema(&vector::schema())?;
        log::info!("Prediction service ready with the '{}' estimator", estimator.name());
        Ok(Self { estimator, store })
    }

    /// The reference estimator backed by a fresh in-memory store.
    pub fn with_heuristic() -> Self {
        Self {
            estimator: Arc::new(HeuristicEstimator),
            store: Arc::new(InMemoryStore::new()),
        }
    }

    pub fn estimator(&self) -> &dyn Estimator {
        self.estimator.as_ref()
    }

    fn run(&self, input: &ObservationInput) -> Result<(Observation, EstimationResult), PredictionError> {
        let observation = input.validate()?;
        let derived = DerivedFeatures::derive(&observation);
        let features = vector::build(&observation, &derived).map_err(|err| match err {
            // Valid inputs can still overflow once combined.
            VectorError::NonFinite { feature, value } if feature.is_derived() => {
                PredictionError::EstimationFailure(EstimationError::NonFinite {
                    target: feature.as_str(),
                    value,
                })
            }
            other => PredictionError::InvalidObservation(other),
        })?;
        let result = self.estimator.predict(&features)?;
        log::debug!("Estimated {observation} with '{}': {result:?}", self.estimator.name());
        Ok((observation, result))
    }

    /// Runs every stage except persistence.
    pub fn evaluate(&self, input: &ObservationInput) -> Result<EstimationResult, PredictionError> {
        self.run(input).map(|(_, result)| result)
    }

    /// Validates, estimates and persists one observation.
    ///
    /// Two calls with identical input produce two records with equal results.
    pub fn estimate(&self, input: &ObservationInput) -> Result<Prediction, PredictionError> {
        let (observation, result) = self.run(input)?;
        Ok(self.store.insert(observation, result, Utc::now())?)
    }

    /// Estimates independent inputs in parallel. Results are in input order.
    pub fn estimate_batch(
        &self,
        inputs: &[ObservationInput],
    ) -> Vec<Result<Prediction, PredictionError>> {
        self.estimate_batch_with(inputs, |_| {})
    }

    /// Like `estimate_batch`, calling `on_done` from the worker thread as each input finishes.
    pub fn estimate_batch_with<F>(
        &self,
        inputs: &[ObservationInput],
        on_done: F,
    ) -> Vec<Result<Prediction, PredictionError>>
    where
        F: Fn(&Result<Prediction, PredictionError>) + Sync + Send,
    {
        inputs
            .par_iter()
            .map(|input| {
                let outcome = self.estimate(input);
                on_done(&outcome);
                outcome
            })
            .collect()
    }

    pub fn get(&self, id: RecordId) -> Result<Prediction, PredictionError> {
        Ok(self.store.get(id)?)
    }

    pub fn delete(&self, id: RecordId) -> Result<Prediction, PredictionError> {
        let removed = self.store.delete(id)?;
        log::info!("Deleted record {id}: {}", removed.observation);
        Ok(removed)
    }

    /// Every stored record: newest year first, then country, then id.
    pub fn records(&self) -> Vec<Prediction> {
        self.store.records()
    }

    /// Number of stored records.
    pub fn total(&self) -> usize {
        self.store.len()
    }

    /// The `n` most recently created records, newest first.
    pub fn recent(&self, n: usize) -> Vec<Prediction> {
        summary::most_recent(&self.store.records(), n)
    }

    pub fn summary(&self, since: DateTime<Utc>) -> PredictionSummary {
        summary::summarize(&self.store.records(), since)
    }

    pub fn top_crops(&self, n: usize) -> Vec<(String, usize)> {
        summary::top_crops(&self.store.records(), n)
    }
}
