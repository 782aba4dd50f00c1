//! In-memory target store.
//!
//! Provides a thread-safe in-memory backend for testing and dry runs.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use super::{
    CompletionMarker, ExploitMatch, ResultBatch, ResultRecord, ScanResult, StoreConnector,
    StoreError, Target, TargetStore,
};
use crate::core::types::{InstanceKey, ResultTable};

#[derive(Default)]
struct Tables {
    targets: Vec<Target>,
    scan_results: Vec<ScanResult>,
    exploit_matches: Vec<ExploitMatch>,
    markers: HashMap<InstanceKey, CompletionMarker>,
    next_target_id: i64,
    next_scan_id: i64,
    next_exploit_id: i64,
}

/// In-memory store backend.
///
/// Ids are assigned from per-table counters that only increase, matching
/// SQLite `AUTOINCREMENT`. Data is not persisted across restarts.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions handed out by a [`MemoryConnector`].
    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of times `close` was called.
    pub fn sessions_closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetStore for InMemoryStore {
    async fn find_target_by_address(&self, address: &str) -> Result<Option<Target>, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tables
            .targets
            .iter()
            .find(|t| t.has_address(address))
            .cloned())
    }

    async fn add_target(
        &self,
        address: IpAddr,
        hostname: Option<String>,
    ) -> Result<Target, StoreError> {
        let mut tables = self.tables.write().map_err(|_| StoreError::LockPoisoned)?;
        let rendered = address.to_string();
        if let Some(existing) = tables.targets.iter().find(|t| t.has_address(&rendered)) {
            return Ok(existing.clone());
        }

        tables.next_target_id += 1;
        let target = Target {
            id: tables.next_target_id,
            ipv4_address: match address {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            },
            ipv6_address: match address {
                IpAddr::V6(v6) => Some(v6),
                IpAddr::V4(_) => None,
            },
            hostname,
        };
        tables.targets.push(target.clone());
        Ok(target)
    }

    async fn list_targets(&self) -> Result<Vec<Target>, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tables.targets.clone())
    }

    async fn commit(&self, batch: ResultBatch) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().map_err(|_| StoreError::LockPoisoned)?;

        // Validate up front so a bad entry leaves the tables untouched.
        for (target_id, _) in batch.entries() {
            if !tables.targets.iter().any(|t| t.id == *target_id) {
                return Err(StoreError::NotFound(format!("target id {}", target_id)));
            }
        }

        let count = batch.len();
        let now = Utc::now();
        for (target_id, record) in batch.into_entries() {
            match record {
                ResultRecord::ServiceScan { protocol, text } => {
                    tables.next_scan_id += 1;
                    let id = tables.next_scan_id;
                    tables.scan_results.push(ScanResult {
                        id,
                        target_id,
                        protocol,
                        text,
                        created_at: now,
                    });
                }
                ResultRecord::Exploit(record) => {
                    tables.next_exploit_id += 1;
                    let id = tables.next_exploit_id;
                    tables.exploit_matches.push(ExploitMatch {
                        id,
                        target_id,
                        record,
                        created_at: now,
                    });
                }
            }
        }
        Ok(count)
    }

    async fn scan_results(&self, target_id: i64) -> Result<Vec<ScanResult>, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tables
            .scan_results
            .iter()
            .filter(|r| r.target_id == target_id)
            .cloned()
            .collect())
    }

    async fn exploit_matches(&self, target_id: i64) -> Result<Vec<ExploitMatch>, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tables
            .exploit_matches
            .iter()
            .filter(|m| m.target_id == target_id)
            .cloned()
            .collect())
    }

    async fn exploit_matches_since(
        &self,
        baseline_id: i64,
    ) -> Result<Vec<ExploitMatch>, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tables
            .exploit_matches
            .iter()
            .filter(|m| m.id > baseline_id)
            .cloned()
            .collect())
    }

    async fn highest_id(&self, table: ResultTable) -> Result<i64, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(match table {
            ResultTable::Targets => tables.next_target_id,
            ResultTable::ScanResults => tables.next_scan_id,
            ResultTable::ExploitMatches => tables.next_exploit_id,
        })
    }

    async fn get_marker(&self, key: &InstanceKey) -> Result<Option<CompletionMarker>, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tables.markers.get(key).cloned())
    }

    async fn save_marker(&self, marker: CompletionMarker) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(|_| StoreError::LockPoisoned)?;
        match tables.markers.get(&marker.key) {
            Some(existing) if existing.high_id > marker.high_id => Ok(()),
            _ => {
                tables.markers.insert(marker.key.clone(), marker);
                Ok(())
            }
        }
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out sessions backed by one shared [`InMemoryStore`].
#[derive(Clone)]
pub struct MemoryConnector {
    store: Arc<InMemoryStore>,
}

impl MemoryConnector {
    /// Create a connector over `store`.
    pub fn new(store: Arc<InMemoryStore>) -> Self {
        Self { store }
    }

    /// The shared store, for inspection.
    pub fn store(&self) -> &Arc<InMemoryStore> {
        &self.store
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn open(&self) -> Result<Arc<dyn TargetStore>, StoreError> {
        self.store.opened.fetch_add(1, Ordering::SeqCst);
        let session: Arc<dyn TargetStore> = self.store.clone();
        Ok(session)
    }
}
