use std::path::Path;

use anyhow::{Context, Result, bail};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::sync::RwLock;
use tracing::warn;

use sms_proto::Sms;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS history (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    country      TEXT    NOT NULL,
    sender       TEXT    NOT NULL,
    record_time  INTEGER NOT NULL,
    phone        TEXT    NOT NULL,
    message      TEXT    NOT NULL,
    time         INTEGER NOT NULL DEFAULT 0,
    sent_time    INTEGER NOT NULL DEFAULT 0,
    ack_observed INTEGER NOT NULL DEFAULT 0
)";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HistoryRecord {
    pub id: i64,
    pub country: String,
    pub sender: String,
    pub record_time: i64,
    pub phone: String,
    pub message: String,
    pub time: i64,
    pub sent_time: i64,
    pub ack_observed: bool,
}

/// Durable ledger of every sent and received SMS.
///
/// All operations take the advisory lock in read mode; the pool serializes
/// the actual SQLite writes underneath.
#[derive(Debug)]
pub struct History {
    pool: SqlitePool,
    lock: RwLock<()>,
}

impl History {
    /// Opens an existing ledger. The database file must already exist;
    /// creation is the explicit `-i` initialization step.
    pub async fn connect(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(false);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| {
                format!("failed to open history database {}", path.display())
            })?;

        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&pool)
            .await
            .context("history database ping failed")?;

        Ok(Self { pool, lock: RwLock::new(()) })
    }

    /// One-shot initialization: creates the database file and the
    /// `history` table, then closes again.
    pub async fn create_database(path: &Path) -> Result<()> {
        if path.exists() {
            bail!("database file {} already exists", path.display());
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| {
                format!("failed to create history database {}", path.display())
            })?;

        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .context("failed to create history table")?;

        pool.close().await;
        Ok(())
    }

    pub async fn get_all(
        &self,
        country: &str,
        descending: bool,
    ) -> Result<Vec<HistoryRecord>> {
        let _guard = self.lock.read().await;

        let query = if descending {
            "SELECT * FROM history WHERE country = ? ORDER BY id DESC"
        } else {
            "SELECT * FROM history WHERE country = ? ORDER BY id ASC"
        };

        sqlx::query_as::<_, HistoryRecord>(query)
            .bind(country)
            .fetch_all(&self.pool)
            .await
            .context("failed to query history")
    }

    /// Records one SMS. Returns the new row id, or -1 after logging when
    /// the insert fails; callers proceed either way and a later
    /// `update_sent(-1, ..)` is a no-op.
    pub async fn insert(
        &self,
        country: &str,
        sender: &str,
        sms: &Sms,
    ) -> i64 {
        let _guard = self.lock.read().await;

        let record_time = chrono::Utc::now().timestamp();
        let time = sms.time_unix();

        let result = sqlx::query(
            "INSERT INTO history (country, sender, record_time, phone, message, time, sent_time, ack_observed) \
             VALUES (?, ?, ?, ?, ?, ?, 0, 0)",
        )
        .bind(country)
        .bind(sender)
        .bind(record_time)
        .bind(&sms.phone)
        .bind(&sms.message)
        .bind(time)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => done.last_insert_rowid(),
            Err(err) => {
                warn!(
                    "insert history failed: country={}, sender={}, phone={}, error={}",
                    country, sender, sms.phone, err
                );
                -1
            }
        }
    }

    /// Finalizes a send attempt: stamps `sent_time` with now and records
    /// whether an ACK was actually observed. At most one update per row.
    pub async fn update_sent(
        &self,
        id: i64,
        ack_observed: bool,
    ) -> bool {
        if id <= 0 {
            return false;
        }

        let _guard = self.lock.read().await;

        let result = sqlx::query(
            "UPDATE history SET sent_time = ?, ack_observed = ? WHERE id = ?",
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(ack_observed)
        .bind(id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => true,
            Ok(done) => {
                warn!(
                    "update history sent failed: id={}, rows_affected={}",
                    id,
                    done.rows_affected()
                );
                false
            }
            Err(err) => {
                warn!("update history sent failed: id={}, error={}", id, err);
                false
            }
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[cfg(test)]
    pub(crate) async fn open_in_memory() -> Self {
        let options = SqliteConnectOptions::new().in_memory(true);
        // A single immortal connection: a recycled connection would get a
        // fresh empty in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .expect("open in-memory sqlite");
        sqlx::query(SCHEMA).execute(&pool).await.expect("create schema");
        Self { pool, lock: RwLock::new(()) }
    }
}
