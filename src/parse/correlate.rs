//! Correlation of parsed records to targets.

use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

use super::ParseAnomaly;
use crate::storage::{ResultBatch, ResultRecord, StoreError, Target, TargetStore};

/// A record whose address matches no known target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{origin}: no target with address {address}")]
pub struct CorrelationError {
    pub address: String,
    pub origin: String,
}

/// Outcome of a committed correlation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelationReport {
    /// Records written to the store.
    pub appended: usize,
    pub errors: Vec<CorrelationError>,
    pub anomalies: Vec<ParseAnomaly>,
}

/// Matches records to targets and stages them for a single commit.
///
/// Lookups go through the store session handed in; a target is looked up
/// once per address. Nothing is written until [`Correlator::commit`].
pub struct Correlator<'a> {
    store: &'a dyn TargetStore,
    batch: ResultBatch,
    targets: HashMap<String, Option<Target>>,
    errors: Vec<CorrelationError>,
    anomalies: Vec<ParseAnomaly>,
}

impl<'a> Correlator<'a> {
    pub fn new(store: &'a dyn TargetStore) -> Self {
        Self {
            store,
            batch: ResultBatch::new(),
            targets: HashMap::new(),
            errors: Vec::new(),
            anomalies: Vec::new(),
        }
    }

    /// Stage `record` for the target with `address`.
    ///
    /// Returns `false` and records a [`CorrelationError`] when no target
    /// matches. Store failures are returned as errors.
    pub async fn append(
        &mut self,
        address: &str,
        origin: &str,
        record: ResultRecord,
    ) -> Result<bool, StoreError> {
        let target = match self.targets.get(address) {
            Some(cached) => cached.clone(),
            None => {
                let found = self.store.find_target_by_address(address).await?;
                self.targets.insert(address.to_string(), found.clone());
                found
            }
        };

        match target {
            Some(target) => {
                debug!(address, origin, target = target.id, "correlated record");
                self.batch.append_result(&target, record);
                Ok(true)
            }
            None => {
                let error = CorrelationError {
                    address: address.to_string(),
                    origin: origin.to_string(),
                };
                warn!(error = %error, "dropping uncorrelated record");
                self.errors.push(error);
                Ok(false)
            }
        }
    }

    /// Record a non-fatal parse anomaly.
    pub fn note_anomaly(&mut self, anomaly: ParseAnomaly) {
        warn!(anomaly = %anomaly, "parse anomaly");
        self.anomalies.push(anomaly);
    }

    /// Records staged so far.
    pub fn staged(&self) -> usize {
        self.batch.len()
    }

    /// Write every staged record as one unit.
    pub async fn commit(self) -> Result<CorrelationReport, StoreError> {
        let appended = if self.batch.is_empty() {
            0
        } else {
            self.store.commit(self.batch).await?
        };
        Ok(CorrelationReport {
            appended,
            errors: self.errors,
            anomalies: self.anomalies,
        })
    }
}
