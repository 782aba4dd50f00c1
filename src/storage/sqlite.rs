//! SQLite target store.
//!
//! Provides persistent storage using a SQLite database file.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use super::{
    CompletionMarker, ExploitMatch, ExploitRecord, ResultBatch, ResultRecord, ScanResult,
    StoreConnector, StoreError, Target, TargetStore,
};
use crate::core::types::{InstanceKey, ResultTable};

/// SQLite store backend.
///
/// Each instance owns its own connection pool; [`TargetStore::close`]
/// drains it.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and migrate it.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StoreError::Other(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(map_sqlx)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Other(e.to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(map_sqlx)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }
}

fn map_sqlx(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolClosed => StoreError::Closed,
        sqlx::Error::Database(e) if e.is_unique_violation() => {
            StoreError::DuplicateKey(e.message().to_string())
        }
        other => StoreError::Other(other.to_string()),
    }
}

fn parse_time(table: &'static str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            table,
            reason: format!("bad timestamp '{}': {}", raw, e),
        })
}

type TargetRow = (i64, Option<String>, Option<String>, Option<String>);

fn target_from_row(row: TargetRow) -> Result<Target, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        table: "targets",
        reason,
    };
    let ipv4_address = row
        .1
        .map(|s| s.parse::<Ipv4Addr>())
        .transpose()
        .map_err(|e| corrupt(e.to_string()))?;
    let ipv6_address = row
        .2
        .map(|s| s.parse::<Ipv6Addr>())
        .transpose()
        .map_err(|e| corrupt(e.to_string()))?;
    Ok(Target {
        id: row.0,
        ipv4_address,
        ipv6_address,
        hostname: row.3,
    })
}

type ExploitRow = (i64, i64, String, String, String, String);

fn exploit_from_row(row: ExploitRow) -> Result<ExploitMatch, StoreError> {
    Ok(ExploitMatch {
        id: row.0,
        target_id: row.1,
        record: ExploitRecord {
            kind: row.2,
            title: row.3,
            path: row.4,
        },
        created_at: parse_time("exploit_matches", &row.5)?,
    })
}

#[async_trait]
impl TargetStore for SqliteStore {
    async fn find_target_by_address(&self, address: &str) -> Result<Option<Target>, StoreError> {
        // Addresses are stored in canonical form; compare like for like.
        let Ok(ip) = address.parse::<IpAddr>() else {
            return Ok(None);
        };
        let canonical = ip.to_string();
        let row: Option<TargetRow> = sqlx::query_as(
            "SELECT id, ipv4_address, ipv6_address, hostname FROM targets \
             WHERE ipv4_address = ? OR ipv6_address = ? ORDER BY id LIMIT 1",
        )
        .bind(&canonical)
        .bind(&canonical)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.map(target_from_row).transpose()
    }

    async fn add_target(
        &self,
        address: IpAddr,
        hostname: Option<String>,
    ) -> Result<Target, StoreError> {
        let rendered = address.to_string();
        if let Some(existing) = self.find_target_by_address(&rendered).await? {
            return Ok(existing);
        }

        let (ipv4, ipv6) = match address {
            IpAddr::V4(_) => (Some(rendered.clone()), None),
            IpAddr::V6(_) => (None, Some(rendered.clone())),
        };

        let result = sqlx::query(
            "INSERT INTO targets (ipv4_address, ipv6_address, hostname, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(ipv4)
        .bind(ipv6)
        .bind(&hostname)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(Target {
            id: result.last_insert_rowid(),
            ipv4_address: match address {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            },
            ipv6_address: match address {
                IpAddr::V6(v6) => Some(v6),
                IpAddr::V4(_) => None,
            },
            hostname,
        })
    }

    async fn list_targets(&self) -> Result<Vec<Target>, StoreError> {
        let rows: Vec<TargetRow> = sqlx::query_as(
            "SELECT id, ipv4_address, ipv6_address, hostname FROM targets ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.into_iter().map(target_from_row).collect()
    }

    async fn commit(&self, batch: ResultBatch) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let target_ids: BTreeSet<i64> = batch.entries().iter().map(|(id, _)| *id).collect();
        for target_id in target_ids {
            let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM targets WHERE id = ?")
                .bind(target_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx)?;
            if count == 0 {
                // Dropping `tx` rolls back.
                return Err(StoreError::NotFound(format!("target id {}", target_id)));
            }
        }

        let count = batch.len();
        let now = Utc::now().to_rfc3339();
        for (target_id, record) in batch.into_entries() {
            match record {
                ResultRecord::ServiceScan { protocol, text } => {
                    sqlx::query(
                        "INSERT INTO scan_results (target_id, protocol, text, created_at) VALUES (?, ?, ?, ?)",
                    )
                    .bind(target_id)
                    .bind(protocol)
                    .bind(text)
                    .bind(&now)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx)?;
                }
                ResultRecord::Exploit(record) => {
                    sqlx::query(
                        "INSERT INTO exploit_matches (target_id, type, title, path, created_at) VALUES (?, ?, ?, ?, ?)",
                    )
                    .bind(target_id)
                    .bind(record.kind)
                    .bind(record.title)
                    .bind(record.path)
                    .bind(&now)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx)?;
                }
            }
        }

        tx.commit().await.map_err(map_sqlx)?;
        Ok(count)
    }

    async fn scan_results(&self, target_id: i64) -> Result<Vec<ScanResult>, StoreError> {
        let rows: Vec<(i64, i64, Option<String>, String, String)> = sqlx::query_as(
            "SELECT id, target_id, protocol, text, created_at FROM scan_results WHERE target_id = ? ORDER BY id",
        )
        .bind(target_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.into_iter()
            .map(|row| {
                Ok(ScanResult {
                    id: row.0,
                    target_id: row.1,
                    protocol: row.2,
                    text: row.3,
                    created_at: parse_time("scan_results", &row.4)?,
                })
            })
            .collect()
    }

    async fn exploit_matches(&self, target_id: i64) -> Result<Vec<ExploitMatch>, StoreError> {
        let rows: Vec<ExploitRow> = sqlx::query_as(
            "SELECT id, target_id, type, title, path, created_at FROM exploit_matches WHERE target_id = ? ORDER BY id",
        )
        .bind(target_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.into_iter().map(exploit_from_row).collect()
    }

    async fn exploit_matches_since(
        &self,
        baseline_id: i64,
    ) -> Result<Vec<ExploitMatch>, StoreError> {
        let rows: Vec<ExploitRow> = sqlx::query_as(
            "SELECT id, target_id, type, title, path, created_at FROM exploit_matches WHERE id > ? ORDER BY id",
        )
        .bind(baseline_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.into_iter().map(exploit_from_row).collect()
    }

    async fn highest_id(&self, table: ResultTable) -> Result<i64, StoreError> {
        // Table names come from a closed enum, never from input.
        let sql = format!("SELECT COALESCE(MAX(id), 0) FROM {}", table.as_str());
        let (id,): (i64,) = sqlx::query_as(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(id)
    }

    async fn get_marker(&self, key: &InstanceKey) -> Result<Option<CompletionMarker>, StoreError> {
        let row: Option<(String, String, i64, i64, String)> = sqlx::query_as(
            "SELECT instance_key, table_name, baseline_id, high_id, completed_at \
             FROM completion_markers WHERE instance_key = ?",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let table = ResultTable::from_name(&row.1).ok_or_else(|| StoreError::Corrupt {
            table: "completion_markers",
            reason: format!("unknown table '{}'", row.1),
        })?;
        Ok(Some(CompletionMarker {
            key: InstanceKey::from_raw(row.0),
            table,
            baseline_id: row.2,
            high_id: row.3,
            completed_at: parse_time("completion_markers", &row.4)?,
        }))
    }

    async fn save_marker(&self, marker: CompletionMarker) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO completion_markers (instance_key, table_name, baseline_id, high_id, completed_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(instance_key) DO UPDATE SET
                table_name = excluded.table_name,
                baseline_id = excluded.baseline_id,
                high_id = excluded.high_id,
                completed_at = excluded.completed_at
            WHERE excluded.high_id >= completion_markers.high_id
            "#,
        )
        .bind(marker.key.as_str())
        .bind(marker.table.as_str())
        .bind(marker.baseline_id)
        .bind(marker.high_id)
        .bind(marker.completed_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Opens a fresh [`SqliteStore`] on the configured database file per session.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    /// Create a connector for the database at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StoreConnector for SqliteConnector {
    async fn open(&self) -> Result<Arc<dyn TargetStore>, StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Other(format!("{}: {}", parent.display(), e)))?;
        }
        let store: Arc<dyn TargetStore> = Arc::new(SqliteStore::new(&self.path).await?);
        Ok(store)
    }
}
