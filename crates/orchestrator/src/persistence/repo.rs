#![forbid(unsafe_code)]

use crate::domain::{
    ContainmentRecord, ContainmentState, EnforcementHandle, Signature, TransitionRecord,
};
use crate::error::Error;
use crate::persistence::LedgerStore;
use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SqliteLedgerStore {
    path: PathBuf,
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    /// Open (creating if needed) a ledger backed by a SQLite database file and
    /// bring its schema up to date.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .synchronous(SqliteSynchronous::Full)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        debug!(path = %path.display(), "ledger opened");
        Ok(Self { path, pool })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn commit_transition(&self, transition: &TransitionRecord) -> Result<bool, Error> {
        let signature = transition.signature.to_hex();
        let handle = transition.handle.as_ref().map(|h| h.as_str().to_owned());
        let at = to_millis(transition.at);

        let mut tx = self.pool.begin().await?;

        // A missing row counts as unblocked, so only a transition out of the
        // unblocked state may create one.
        let updated = match transition.from {
            ContainmentState::Unblocked => sqlx::query(
                "INSERT INTO containment_records (signature, state, handle, diagnostic, updated_at) \
                 VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT(signature) DO UPDATE SET \
                 state = excluded.state, handle = excluded.handle, \
                 diagnostic = excluded.diagnostic, updated_at = excluded.updated_at \
                 WHERE containment_records.state = ?",
            )
            .bind(&signature)
            .bind(transition.to.as_str())
            .bind(&handle)
            .bind(&transition.diagnostic)
            .bind(at)
            .bind(transition.from.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected(),
            ContainmentState::Blocked => sqlx::query(
                "UPDATE containment_records \
                 SET state = ?, handle = ?, diagnostic = ?, updated_at = ? \
                 WHERE signature = ? AND state = ?",
            )
            .bind(transition.to.as_str())
            .bind(&handle)
            .bind(&transition.diagnostic)
            .bind(at)
            .bind(&signature)
            .bind(transition.from.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected(),
        };

        if updated == 0 {
            tx.rollback().await?;
            debug!(%signature, from = %transition.from, "stored state moved on, commit skipped");
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO containment_transitions \
             (signature, from_state, to_state, handle, diagnostic, at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&signature)
        .bind(transition.from.as_str())
        .bind(transition.to.as_str())
        .bind(&handle)
        .bind(&transition.diagnostic)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(%signature, to = %transition.to, "transition persisted");
        Ok(true)
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn load(&self, signature: &Signature) -> Result<Option<ContainmentRecord>, Error> {
        let row = sqlx::query(
            "SELECT signature, state, handle, diagnostic, updated_at \
             FROM containment_records WHERE signature = ?",
        )
        .bind(signature.to_hex())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn commit(&self, transition: &TransitionRecord) -> Result<bool, Error> {
        self.commit_transition(transition).await
    }

    async fn history(&self, signature: &Signature) -> Result<Vec<TransitionRecord>, Error> {
        let rows = sqlx::query(
            "SELECT signature, from_state, to_state, handle, diagnostic, at \
             FROM containment_transitions WHERE signature = ? ORDER BY id",
        )
        .bind(signature.to_hex())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(transition_from_row).collect()
    }

    async fn records(&self) -> Result<Vec<ContainmentRecord>, Error> {
        let rows = sqlx::query(
            "SELECT signature, state, handle, diagnostic, updated_at \
             FROM containment_records ORDER BY signature",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!(path = %self.path.display(), "ledger closed");
    }
}

fn record_from_row(row: &SqliteRow) -> Result<ContainmentRecord, Error> {
    Ok(ContainmentRecord {
        signature: row.try_get::<String, _>("signature")?.parse()?,
        state: row.try_get::<String, _>("state")?.parse()?,
        handle: row
            .try_get::<Option<String>, _>("handle")?
            .map(EnforcementHandle::new),
        diagnostic: row.try_get("diagnostic")?,
        updated_at: from_millis(row.try_get("updated_at")?),
    })
}

fn transition_from_row(row: &SqliteRow) -> Result<TransitionRecord, Error> {
    Ok(TransitionRecord {
        signature: row.try_get::<String, _>("signature")?.parse()?,
        from: row.try_get::<String, _>("from_state")?.parse()?,
        to: row.try_get::<String, _>("to_state")?.parse()?,
        handle: row
            .try_get::<Option<String>, _>("handle")?
            .map(EnforcementHandle::new),
        diagnostic: row.try_get("diagnostic")?,
        at: from_millis(row.try_get("at")?),
    })
}

fn to_millis(time: SystemTime) -> i64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn from_millis(millis: i64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_millis(millis.max(0) as u64)
}
