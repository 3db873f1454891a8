//! Persistence for accepted observations and their estimates.
//!
//! A record is written only after estimation has succeeded, so every stored
//! observation carries a complete estimate. The store assigns identifiers and
//! timestamps; callers never supply them.

use crate::estimator::EstimationResult;
use crate::observation::Observation;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

pub type RecordId = u64;

/// One persisted observation together with the estimate computed for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: RecordId,
    #[serde(flatten)]
    pub observation: Observation,
    #[serde(flatten)]
    pub estimate: EstimationResult,
    pub created_at: DateTime<Utc>,
}

impl StoredRecord {
    /// Listing order: newest year first, then country alphabetically, then id.
    pub fn listing_order(&self, other: &Self) -> CmpOrdering {
        other
            .observation
            .year
            .cmp(&self.observation.year)
            .then_with(|| self.observation.country.cmp(&other.observation.country))
            .then_with(|| self.id.cmp(&other.id))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("No record with id {0} exists in the store")]
    NotFound(RecordId),
}

/// Storage seam used by the prediction service.
pub trait ObservationStore: Send + Sync {
    fn insert(
        &self,
        observation: Observation,
        estimate: EstimationResult,
        created_at: DateTime<Utc>,
    ) -> Result<StoredRecord, StoreError>;

    fn get(&self, id: RecordId) -> Result<StoredRecord, StoreError>;

    fn delete(&self, id: RecordId) -> Result<StoredRecord, StoreError>;

    /// Every record, in listing order.
    fn records(&self) -> Vec<StoredRecord>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A concurrent in-process store. Identifiers are never reused, even after deletion.
#[derive(Debug)]
pub struct InMemoryStore {
    records: DashMap<RecordId, StoredRecord>,
    next_id: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            records: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObservationStore for InMemoryStore {
    fn insert(
        &self,
        observation: Observation,
        estimate: EstimationResult,
        created_at: DateTime<Utc>,
    ) -> Result<StoredRecord, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = StoredRecord {
            id,
            observation,
            estimate,
            created_at,
        };
        self.records.insert(id, record.clone());
        log::debug!("Stored record {id}: {}", record.observation);
        Ok(record)
    }

    fn get(&self, id: RecordId) -> Result<StoredRecord, StoreError> {
        self.records
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    fn delete(&self, id: RecordId) -> Result<StoredRecord, StoreError> {
        self.records
            .remove(&id)
            .map(|(_, record)| record)
            .ok_or(StoreError::NotFound(id))
    }

    fn records(&self) -> Vec<StoredRecord> {
        let mut all: Vec<StoredRecord> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(StoredRecord::listing_order);
        all
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}
