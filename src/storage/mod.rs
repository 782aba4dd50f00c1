//! Target store abstraction.
//!
//! Hosts, their service scan results, their exploit matches and the
//! completion markers of high-water-mark tasks all live here. The trait has
//! pluggable backends (in-memory, SQLite).

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::{InMemoryStore, MemoryConnector};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConnector, SqliteStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use thiserror::Error;

use crate::core::types::{InstanceKey, ResultTable};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A duplicate key was detected.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Store lock was poisoned.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// The session was already closed.
    #[error("store session is closed")]
    Closed,

    /// A stored value could not be decoded.
    #[error("corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },

    /// Generic store error.
    #[error("store error: {0}")]
    Other(String),
}

/// A host the pipeline knows about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub ipv4_address: Option<Ipv4Addr>,
    pub ipv6_address: Option<Ipv6Addr>,
    pub hostname: Option<String>,
}

impl Target {
    /// True when `address` is exactly this target's IPv4 or IPv6 address.
    pub fn has_address(&self, address: &str) -> bool {
        match address.parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => self.ipv4_address == Some(v4),
            Ok(IpAddr::V6(v6)) => self.ipv6_address == Some(v6),
            Err(_) => false,
        }
    }

    /// The preferred display address.
    pub fn address(&self) -> Option<IpAddr> {
        self.ipv4_address
            .map(IpAddr::V4)
            .or(self.ipv6_address.map(IpAddr::V6))
    }
}

/// Service detection output stored against a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub id: i64,
    pub target_id: i64,
    pub protocol: Option<String>,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// One exploit reference parsed from lookup output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExploitRecord {
    pub kind: String,
    pub title: String,
    pub path: String,
}

/// An exploit reference stored against a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExploitMatch {
    pub id: i64,
    pub target_id: i64,
    pub record: ExploitRecord,
    pub created_at: DateTime<Utc>,
}

/// Persisted evidence that a high-water-mark task instance completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub key: InstanceKey,
    pub table: ResultTable,
    /// Highest id in `table` before the instance ran.
    pub baseline_id: i64,
    /// Highest id in `table` once the instance finished.
    pub high_id: i64,
    pub completed_at: DateTime<Utc>,
}

/// A result waiting to be appended to a target's collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultRecord {
    ServiceScan {
        protocol: Option<String>,
        text: String,
    },
    Exploit(ExploitRecord),
}

/// Results collected during one correlation pass, committed as a unit.
#[derive(Debug, Clone, Default)]
pub struct ResultBatch {
    entries: Vec<(i64, ResultRecord)>,
}

impl ResultBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `record` for appending to `target`'s results.
    pub fn append_result(&mut self, target: &Target, record: ResultRecord) {
        self.entries.push((target.id, record));
    }

    /// Number of queued records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queued records as `(target_id, record)` pairs.
    pub fn entries(&self) -> &[(i64, ResultRecord)] {
        &self.entries
    }

    pub(crate) fn into_entries(self) -> Vec<(i64, ResultRecord)> {
        self.entries
    }
}

/// Store session used by a single task instance.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Find the target whose IPv4 or IPv6 address equals `address`.
    async fn find_target_by_address(&self, address: &str) -> Result<Option<Target>, StoreError>;

    /// Insert a target for `address`, or return the existing one.
    async fn add_target(
        &self,
        address: IpAddr,
        hostname: Option<String>,
    ) -> Result<Target, StoreError>;

    /// List all targets ordered by id.
    async fn list_targets(&self) -> Result<Vec<Target>, StoreError>;

    /// Append every record in `batch`. Either all records land or none do.
    async fn commit(&self, batch: ResultBatch) -> Result<usize, StoreError>;

    /// Scan results for a target, oldest first.
    async fn scan_results(&self, target_id: i64) -> Result<Vec<ScanResult>, StoreError>;

    /// Exploit matches for a target, oldest first.
    async fn exploit_matches(&self, target_id: i64) -> Result<Vec<ExploitMatch>, StoreError>;

    /// Exploit matches with an id above `baseline_id`.
    async fn exploit_matches_since(
        &self,
        baseline_id: i64,
    ) -> Result<Vec<ExploitMatch>, StoreError>;

    /// Highest primary key in `table`, or 0 when empty.
    async fn highest_id(&self, table: ResultTable) -> Result<i64, StoreError>;

    /// Completion marker recorded for `key`, if any.
    async fn get_marker(&self, key: &InstanceKey) -> Result<Option<CompletionMarker>, StoreError>;

    /// Record a completion marker. A marker never moves backwards.
    async fn save_marker(&self, marker: CompletionMarker) -> Result<(), StoreError>;

    /// Release the session. Safe to call more than once.
    async fn close(&self);
}

/// Opens store sessions; one per task instance.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Acquire a session.
    async fn open(&self) -> Result<Arc<dyn TargetStore>, StoreError>;
}
