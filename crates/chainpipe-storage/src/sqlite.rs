//! SQLite storage backend for ChainPipe.
//!
//! Every record is stored as a JSON document next to the columns its lookups
//! filter or order on. Uses `sqlx` with WAL mode for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use chainpipe_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./chainpipe.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainpipe_core::error::IndexerError;
use chainpipe_core::model::{
    AccountActivitySeq, BlockSeq, GovernanceActivitySeq, Job, ProposalAgg, Report, ReportKind,
    Syncable, SystemEvent, SystemEventKind, ValidatorAgg, ValidatorGroupAgg, ValidatorGroupSeq,
    ValidatorSeq,
};
use chainpipe_core::store::{
    AccountActivitySeqStore, BlockSeqStore, GovernanceActivitySeqStore, JobStore, ProposalAggStore,
    RawHeightStore, ReportStore, SyncableStore, SystemEventStore, ValidatorAggStore,
    ValidatorGroupAggStore, ValidatorGroupSeqStore, ValidatorSeqStore,
};
use chainpipe_core::types::{Height, RawHeightData};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS syncables (
        height        INTEGER PRIMARY KEY,
        index_version INTEGER NOT NULL,
        processed     INTEGER NOT NULL,
        doc           TEXT    NOT NULL
    );",
    "CREATE INDEX IF NOT EXISTS idx_syncables_version ON syncables (index_version);",
    "CREATE TABLE IF NOT EXISTS reports (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        kind          TEXT    NOT NULL,
        index_version INTEGER NOT NULL,
        completed     INTEGER NOT NULL,
        doc           TEXT    NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS jobs (
        height   INTEGER PRIMARY KEY,
        finished INTEGER NOT NULL,
        doc      TEXT    NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS block_seqs (
        height INTEGER PRIMARY KEY,
        time   INTEGER NOT NULL,
        doc    TEXT    NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS validator_seqs (
        height  INTEGER NOT NULL,
        address TEXT    NOT NULL,
        time    INTEGER NOT NULL,
        doc     TEXT    NOT NULL,
        PRIMARY KEY (height, address)
    );",
    "CREATE INDEX IF NOT EXISTS idx_validator_seqs_address ON validator_seqs (address, height);",
    "CREATE TABLE IF NOT EXISTS validator_group_seqs (
        height  INTEGER NOT NULL,
        address TEXT    NOT NULL,
        time    INTEGER NOT NULL,
        doc     TEXT    NOT NULL,
        PRIMARY KEY (height, address)
    );",
    "CREATE TABLE IF NOT EXISTS account_activity_seqs (
        height  INTEGER NOT NULL,
        tx_hash TEXT    NOT NULL,
        address TEXT    NOT NULL,
        kind    TEXT    NOT NULL,
        doc     TEXT    NOT NULL,
        PRIMARY KEY (height, tx_hash, address, kind)
    );",
    "CREATE TABLE IF NOT EXISTS governance_activity_seqs (
        height      INTEGER NOT NULL,
        tx_hash     TEXT    NOT NULL,
        proposal_id INTEGER NOT NULL,
        account     TEXT    NOT NULL,
        kind        TEXT    NOT NULL,
        doc         TEXT    NOT NULL,
        PRIMARY KEY (height, tx_hash, proposal_id, account, kind)
    );",
    "CREATE TABLE IF NOT EXISTS validator_aggs (
        address TEXT PRIMARY KEY,
        doc     TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS validator_group_aggs (
        address TEXT PRIMARY KEY,
        doc     TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS proposal_aggs (
        proposal_id INTEGER PRIMARY KEY,
        doc         TEXT    NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS system_events (
        height INTEGER NOT NULL,
        actor  TEXT    NOT NULL,
        kind   TEXT    NOT NULL,
        doc    TEXT    NOT NULL,
        PRIMARY KEY (height, actor, kind)
    );",
    "CREATE INDEX IF NOT EXISTS idx_system_events_actor ON system_events (actor, height);",
    "CREATE TABLE IF NOT EXISTS raw_heights (
        height INTEGER PRIMARY KEY,
        doc    TEXT    NOT NULL
    );",
];

fn db_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

fn to_doc<T: Serialize>(value: &T) -> Result<String, IndexerError> {
    serde_json::to_string(value).map_err(|e| IndexerError::Storage(e.to_string()))
}

fn from_doc<T: DeserializeOwned>(row: &SqliteRow) -> Result<T, IndexerError> {
    let doc: String = row.get("doc");
    serde_json::from_str(&doc).map_err(|e| IndexerError::Storage(format!("corrupt document: {e}")))
}

fn from_docs<T: DeserializeOwned>(rows: &[SqliteRow]) -> Result<Vec<T>, IndexerError> {
    rows.iter().map(from_doc).collect()
}

/// SQLite-backed storage for every indexer repository.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./chainpipe.db"`) or a full
    /// SQLite URL (`"sqlite:./chainpipe.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.contains("mode=") || path.contains(":memory:") {
            path.to_string()
        } else if path.starts_with("sqlite:") {
            let sep = if path.contains('?') { '&' } else { '?' };
            format!("{path}{sep}mode=rwc")
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(db_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// A single connection is used so every query sees the same database.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }

    async fn fetch_optional_doc<T: DeserializeOwned>(
        &self,
        sql: &str,
        key: i64,
    ) -> Result<Option<T>, IndexerError> {
        let row = sqlx::query(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(from_doc).transpose()
    }

    async fn delete_before(&self, table: &str, cutoff: DateTime<Utc>) -> Result<u64, IndexerError> {
        let result = sqlx::query(&format!("DELETE FROM {table} WHERE time < ?"))
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        debug!(table, removed = result.rows_affected(), "purged old rows");
        Ok(result.rows_affected())
    }
}

// ─── Bookkeeping ──────────────────────────────────────────────────────────────

#[async_trait]
impl SyncableStore for SqliteStorage {
    async fn find_by_height(&self, height: Height) -> Result<Option<Syncable>, IndexerError> {
        self.fetch_optional_doc("SELECT doc FROM syncables WHERE height = ?", height as i64)
            .await
    }

    async fn find_most_recent(&self) -> Result<Option<Syncable>, IndexerError> {
        let row = sqlx::query("SELECT doc FROM syncables ORDER BY height DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(from_doc).transpose()
    }

    async fn find_most_recent_processed(&self) -> Result<Option<Syncable>, IndexerError> {
        let row = sqlx::query(
            "SELECT doc FROM syncables WHERE processed = 1 ORDER BY height DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(from_doc).transpose()
    }

    async fn find_first_by_different_index_version(
        &self,
        version: u64,
    ) -> Result<Option<Syncable>, IndexerError> {
        self.fetch_optional_doc(
            "SELECT doc FROM syncables WHERE index_version != ? ORDER BY height ASC LIMIT 1",
            version as i64,
        )
        .await
    }

    async fn find_most_recent_by_different_index_version(
        &self,
        version: u64,
    ) -> Result<Option<Syncable>, IndexerError> {
        self.fetch_optional_doc(
            "SELECT doc FROM syncables WHERE index_version != ? ORDER BY height DESC LIMIT 1",
            version as i64,
        )
        .await
    }

    async fn find_smallest_index_version(&self) -> Result<Option<u64>, IndexerError> {
        let row = sqlx::query("SELECT MIN(index_version) AS v FROM syncables")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        let v: Option<i64> = row.get("v");
        Ok(v.map(|v| v as u64))
    }

    async fn create_or_update(&self, syncable: &Syncable) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT OR REPLACE INTO syncables (height, index_version, processed, doc)
             VALUES (?, ?, ?, ?)",
        )
        .bind(syncable.height as i64)
        .bind(syncable.index_version as i64)
        .bind(syncable.is_processed())
        .bind(to_doc(syncable)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn set_processed_at_for_range(
        &self,
        report_id: u64,
        start: Height,
        end: Height,
    ) -> Result<u64, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let rows = sqlx::query("SELECT doc FROM syncables WHERE height BETWEEN ? AND ?")
            .bind(start as i64)
            .bind(end as i64)
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?;

        let mut touched = 0;
        for mut syncable in from_docs::<Syncable>(&rows)? {
            syncable.processed_at = None;
            syncable.report_id = Some(report_id);
            sqlx::query("UPDATE syncables SET processed = 0, doc = ? WHERE height = ?")
                .bind(to_doc(&syncable)?)
                .bind(syncable.height as i64)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            touched += 1;
        }
        tx.commit().await.map_err(db_err)?;

        debug!(report_id, start, end, touched, "syncables reset for reindex");
        Ok(touched)
    }
}

fn report_from_row(row: &SqliteRow) -> Result<Report, IndexerError> {
    let mut report: Report = from_doc(row)?;
    report.id = row.get::<i64, _>("id") as u64;
    Ok(report)
}

#[async_trait]
impl ReportStore for SqliteStorage {
    async fn create(&self, report: Report) -> Result<Report, IndexerError> {
        let result = sqlx::query(
            "INSERT INTO reports (kind, index_version, completed, doc) VALUES (?, ?, ?, ?)",
        )
        .bind(report.kind.as_str())
        .bind(report.index_version as i64)
        .bind(report.is_completed())
        .bind(to_doc(&report)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let report = Report {
            id: result.last_insert_rowid() as u64,
            ..report
        };
        debug!(id = report.id, kind = %report.kind, "report created");
        Ok(report)
    }

    async fn save(&self, report: &Report) -> Result<(), IndexerError> {
        let result = sqlx::query(
            "UPDATE reports SET kind = ?, index_version = ?, completed = ?, doc = ? WHERE id = ?",
        )
        .bind(report.kind.as_str())
        .bind(report.index_version as i64)
        .bind(report.is_completed())
        .bind(to_doc(report)?)
        .bind(report.id as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(IndexerError::NotFound(format!("report {}", report.id)));
        }
        Ok(())
    }

    async fn find_not_completed_by_index_version(
        &self,
        version: u64,
        kinds: &[ReportKind],
    ) -> Result<Option<Report>, IndexerError> {
        let rows = sqlx::query(
            "SELECT id, kind, doc FROM reports
             WHERE index_version = ? AND completed = 0 ORDER BY id DESC",
        )
        .bind(version as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        for row in &rows {
            let kind: String = row.get("kind");
            if kinds.iter().any(|k| k.as_str() == kind) {
                return report_from_row(row).map(Some);
            }
        }
        Ok(None)
    }

    async fn delete_not_completed_by_kinds(&self, kinds: &[ReportKind]) -> Result<u64, IndexerError> {
        let mut removed = 0;
        for kind in kinds {
            let result = sqlx::query("DELETE FROM reports WHERE completed = 0 AND kind = ?")
                .bind(kind.as_str())
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }

    async fn find_most_recent(&self) -> Result<Option<Report>, IndexerError> {
        let row = sqlx::query("SELECT id, doc FROM reports ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(report_from_row).transpose()
    }
}

#[async_trait]
impl JobStore for SqliteStorage {
    async fn find_unfinished(&self) -> Result<Vec<Job>, IndexerError> {
        let rows = sqlx::query("SELECT doc FROM jobs WHERE finished = 0 ORDER BY height")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        from_docs(&rows)
    }

    async fn find_last(&self) -> Result<Option<Job>, IndexerError> {
        let row = sqlx::query("SELECT doc FROM jobs ORDER BY height DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(from_doc).transpose()
    }

    async fn create_many(&self, jobs: &[Job]) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for job in jobs {
            sqlx::query("INSERT OR IGNORE INTO jobs (height, finished, doc) VALUES (?, ?, ?)")
                .bind(job.height as i64)
                .bind(job.is_finished())
                .bind(to_doc(job)?)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn update(&self, job: &Job) -> Result<(), IndexerError> {
        sqlx::query("INSERT OR REPLACE INTO jobs (height, finished, doc) VALUES (?, ?, ?)")
            .bind(job.height as i64)
            .bind(job.is_finished())
            .bind(to_doc(job)?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

// ─── Sequences ────────────────────────────────────────────────────────────────

#[async_trait]
impl BlockSeqStore for SqliteStorage {
    async fn upsert(&self, seq: &BlockSeq) -> Result<(), IndexerError> {
        sqlx::query("INSERT OR REPLACE INTO block_seqs (height, time, doc) VALUES (?, ?, ?)")
            .bind(seq.height as i64)
            .bind(seq.time.timestamp_millis())
            .bind(to_doc(seq)?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn find_by_height(&self, height: Height) -> Result<Option<BlockSeq>, IndexerError> {
        self.fetch_optional_doc("SELECT doc FROM block_seqs WHERE height = ?", height as i64)
            .await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, IndexerError> {
        self.delete_before("block_seqs", cutoff).await
    }
}

#[async_trait]
impl ValidatorSeqStore for SqliteStorage {
    async fn bulk_upsert(&self, seqs: &[ValidatorSeq]) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for seq in seqs {
            sqlx::query(
                "INSERT OR REPLACE INTO validator_seqs (height, address, time, doc)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(seq.height as i64)
            .bind(&seq.address)
            .bind(seq.time.timestamp_millis())
            .bind(to_doc(seq)?)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn find_by_height(&self, height: Height) -> Result<Vec<ValidatorSeq>, IndexerError> {
        let rows = sqlx::query("SELECT doc FROM validator_seqs WHERE height = ? ORDER BY address")
            .bind(height as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        from_docs(&rows)
    }

    async fn find_last_by_address(
        &self,
        address: &str,
        before: Height,
        limit: usize,
    ) -> Result<Vec<ValidatorSeq>, IndexerError> {
        let rows = sqlx::query(
            "SELECT doc FROM validator_seqs
             WHERE address = ? AND height < ? ORDER BY height DESC LIMIT ?",
        )
        .bind(address)
        .bind(before as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        from_docs(&rows)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, IndexerError> {
        self.delete_before("validator_seqs", cutoff).await
    }
}

#[async_trait]
impl ValidatorGroupSeqStore for SqliteStorage {
    async fn bulk_upsert(&self, seqs: &[ValidatorGroupSeq]) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for seq in seqs {
            sqlx::query(
                "INSERT OR REPLACE INTO validator_group_seqs (height, address, time, doc)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(seq.height as i64)
            .bind(&seq.address)
            .bind(seq.time.timestamp_millis())
            .bind(to_doc(seq)?)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn find_by_height(&self, height: Height) -> Result<Vec<ValidatorGroupSeq>, IndexerError> {
        let rows = sqlx::query(
            "SELECT doc FROM validator_group_seqs WHERE height = ? ORDER BY address",
        )
        .bind(height as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        from_docs(&rows)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, IndexerError> {
        self.delete_before("validator_group_seqs", cutoff).await
    }
}

#[async_trait]
impl AccountActivitySeqStore for SqliteStorage {
    async fn bulk_upsert(&self, seqs: &[AccountActivitySeq]) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for seq in seqs {
            sqlx::query(
                "INSERT OR REPLACE INTO account_activity_seqs (height, tx_hash, address, kind, doc)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(seq.height as i64)
            .bind(&seq.tx_hash)
            .bind(&seq.address)
            .bind(&seq.kind)
            .bind(to_doc(seq)?)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn find_by_height(&self, height: Height) -> Result<Vec<AccountActivitySeq>, IndexerError> {
        let rows = sqlx::query("SELECT doc FROM account_activity_seqs WHERE height = ?")
            .bind(height as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        from_docs(&rows)
    }

    async fn find_by_height_and_kind(
        &self,
        height: Height,
        kind: &str,
    ) -> Result<Vec<AccountActivitySeq>, IndexerError> {
        let rows = sqlx::query("SELECT doc FROM account_activity_seqs WHERE height = ? AND kind = ?")
            .bind(height as i64)
            .bind(kind)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        from_docs(&rows)
    }
}

#[async_trait]
impl GovernanceActivitySeqStore for SqliteStorage {
    async fn bulk_upsert(&self, seqs: &[GovernanceActivitySeq]) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for seq in seqs {
            sqlx::query(
                "INSERT OR REPLACE INTO governance_activity_seqs
                 (height, tx_hash, proposal_id, account, kind, doc) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(seq.height as i64)
            .bind(&seq.tx_hash)
            .bind(seq.proposal_id as i64)
            .bind(&seq.account)
            .bind(&seq.kind)
            .bind(to_doc(seq)?)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn find_by_height(&self, height: Height) -> Result<Vec<GovernanceActivitySeq>, IndexerError> {
        let rows = sqlx::query("SELECT doc FROM governance_activity_seqs WHERE height = ?")
            .bind(height as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        from_docs(&rows)
    }
}

// ─── Aggregates ───────────────────────────────────────────────────────────────

#[async_trait]
impl ValidatorAggStore for SqliteStorage {
    async fn find_by_address(&self, address: &str) -> Result<Option<ValidatorAgg>, IndexerError> {
        let row = sqlx::query("SELECT doc FROM validator_aggs WHERE address = ?")
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(from_doc).transpose()
    }

    async fn upsert(&self, agg: &ValidatorAgg) -> Result<(), IndexerError> {
        sqlx::query("INSERT OR REPLACE INTO validator_aggs (address, doc) VALUES (?, ?)")
            .bind(&agg.address)
            .bind(to_doc(agg)?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl ValidatorGroupAggStore for SqliteStorage {
    async fn find_by_address(&self, address: &str) -> Result<Option<ValidatorGroupAgg>, IndexerError> {
        let row = sqlx::query("SELECT doc FROM validator_group_aggs WHERE address = ?")
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(from_doc).transpose()
    }

    async fn upsert(&self, agg: &ValidatorGroupAgg) -> Result<(), IndexerError> {
        sqlx::query("INSERT OR REPLACE INTO validator_group_aggs (address, doc) VALUES (?, ?)")
            .bind(&agg.address)
            .bind(to_doc(agg)?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl ProposalAggStore for SqliteStorage {
    async fn find_by_proposal_id(&self, proposal_id: u64) -> Result<Option<ProposalAgg>, IndexerError> {
        self.fetch_optional_doc(
            "SELECT doc FROM proposal_aggs WHERE proposal_id = ?",
            proposal_id as i64,
        )
        .await
    }

    async fn upsert(&self, agg: &ProposalAgg) -> Result<(), IndexerError> {
        sqlx::query("INSERT OR REPLACE INTO proposal_aggs (proposal_id, doc) VALUES (?, ?)")
            .bind(agg.proposal_id as i64)
            .bind(to_doc(agg)?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

// ─── System events / raw cache ────────────────────────────────────────────────

#[async_trait]
impl SystemEventStore for SqliteStorage {
    async fn bulk_upsert(&self, events: &[SystemEvent]) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for event in events {
            sqlx::query(
                "INSERT OR REPLACE INTO system_events (height, actor, kind, doc) VALUES (?, ?, ?, ?)",
            )
            .bind(event.height as i64)
            .bind(&event.actor)
            .bind(event.kind.as_str())
            .bind(to_doc(event)?)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn find_by_height(&self, height: Height) -> Result<Vec<SystemEvent>, IndexerError> {
        let rows = sqlx::query("SELECT doc FROM system_events WHERE height = ? ORDER BY actor, kind")
            .bind(height as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        from_docs(&rows)
    }

    async fn find_by_actor(
        &self,
        actor: &str,
        kinds: &[SystemEventKind],
        min_height: Height,
    ) -> Result<Vec<SystemEvent>, IndexerError> {
        let rows = sqlx::query(
            "SELECT doc FROM system_events WHERE actor = ? AND height >= ? ORDER BY height",
        )
        .bind(actor)
        .bind(min_height as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let events: Vec<SystemEvent> = from_docs(&rows)?;
        Ok(events
            .into_iter()
            .filter(|e| kinds.is_empty() || kinds.contains(&e.kind))
            .collect())
    }
}

#[async_trait]
impl RawHeightStore for SqliteStorage {
    async fn save(&self, data: &RawHeightData) -> Result<(), IndexerError> {
        sqlx::query("INSERT OR REPLACE INTO raw_heights (height, doc) VALUES (?, ?)")
            .bind(data.height as i64)
            .bind(to_doc(data)?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        debug!(height = data.height, "raw height cached");
        Ok(())
    }

    async fn find_by_height(&self, height: Height) -> Result<Option<RawHeightData>, IndexerError> {
        self.fetch_optional_doc("SELECT doc FROM raw_heights WHERE height = ?", height as i64)
            .await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
