//! Persistent ledger backed by `SQLite`.
//!
//! Rows carry a monotonically increasing `touched` counter; the row with the
//! smallest counter is the least recently used. Every mutation runs inside a
//! transaction while holding a process-local write lock, so `add` is an
//! atomic test-and-set even with several pooled connections.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqliteConnection;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{Ledger, LedgerError, Result, entry_size};
use crate::config::LedgerConfig;
use crate::db::Database;

const NEXT_TOUCH: &str = "(SELECT COALESCE(MAX(touched), 0) + 1 FROM ledger)";

/// On-disk ledger surviving process restarts.
#[derive(Debug)]
pub struct SqliteLedger {
    db: Database,
    write_lock: Mutex<()>,
    max_items: Option<usize>,
    size_limit_bytes: Option<u64>,
    closed: AtomicBool,
}

impl SqliteLedger {
    /// Opens (creating if needed) `ledger.db` under `config.dir`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Directory`] if the directory cannot be created,
    /// or [`LedgerError::Open`] if the database cannot be opened.
    #[instrument(skip(config), fields(dir = %config.dir.display()))]
    pub async fn open(config: &LedgerConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.dir)
            .await
            .map_err(|source| LedgerError::Directory {
                path: config.dir.display().to_string(),
                source,
            })?;
        let db = Database::open(&config.db_path()).await?;
        Ok(Self::with_database(
            db,
            config.max_items,
            config.size_limit_bytes,
        ))
    }

    /// Creates a ledger over an in-memory database (tests and dry runs).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Open`] if the database cannot be created.
    pub async fn in_memory(max_items: Option<usize>, size_limit_bytes: Option<u64>) -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self::with_database(db, max_items, size_limit_bytes))
    }

    /// Wraps an already opened database.
    #[must_use]
    pub fn with_database(
        db: Database,
        max_items: Option<usize>,
        size_limit_bytes: Option<u64>,
    ) -> Self {
        Self {
            db,
            write_lock: Mutex::new(()),
            max_items: max_items.map(|max| max.max(1)),
            size_limit_bytes,
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the summed size of all entries in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the query fails.
    pub async fn total_bytes(&self) -> Result<u64> {
        self.ensure_open()?;
        let (total,): (i64,) = sqlx::query_as("SELECT COALESCE(SUM(size_bytes), 0) FROM ledger")
            .fetch_one(self.db.pool())
            .await?;
        Ok(u64::try_from(total).unwrap_or_default())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(LedgerError::Closed)
        } else {
            Ok(())
        }
    }

    /// Deletes the coldest rows until both ceilings hold, never the newest.
    async fn evict(&self, conn: &mut SqliteConnection) -> Result<u64> {
        let mut evicted = 0u64;

        if let Some(max_items) = self.max_items {
            let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ledger")
                .fetch_one(&mut *conn)
                .await?;
            let max_items = i64::try_from(max_items).unwrap_or(i64::MAX);
            if count > max_items {
                let result = sqlx::query(
                    "DELETE FROM ledger WHERE key IN \
                     (SELECT key FROM ledger ORDER BY touched ASC LIMIT ?)",
                )
                .bind(count - max_items)
                .execute(&mut *conn)
                .await?;
                evicted += result.rows_affected();
            }
        }

        if let Some(limit) = self.size_limit_bytes {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            loop {
                let (count, total): (i64, i64) =
                    sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM ledger")
                        .fetch_one(&mut *conn)
                        .await?;
                if total <= limit || count <= 1 {
                    break;
                }
                let result = sqlx::query(
                    "DELETE FROM ledger WHERE key = \
                     (SELECT key FROM ledger ORDER BY touched ASC LIMIT 1)",
                )
                .execute(&mut *conn)
                .await?;
                evicted += result.rows_affected();
            }
        }

        if evicted > 0 {
            debug!(evicted, "evicted least recently used entries");
        }
        Ok(evicted)
    }
}

async fn touch(conn: &mut SqliteConnection, key: &str) -> Result<()> {
    sqlx::query(&format!(
        "UPDATE ledger SET touched = {NEXT_TOUCH} WHERE key = ?"
    ))
    .bind(key)
    .execute(conn)
    .await?;
    Ok(())
}

async fn fetch_value(conn: &mut SqliteConnection, key: &str) -> Result<Option<Value>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM ledger WHERE key = ?")
        .bind(key)
        .fetch_optional(conn)
        .await?;
    row.map(|(text,)| decode(key, &text)).transpose()
}

/// Inserts `key` if absent. Returns whether a row was written.
async fn insert_new(conn: &mut SqliteConnection, key: &str, encoded: &str) -> Result<bool> {
    let result = sqlx::query(&format!(
        "INSERT INTO ledger (key, value, touched, size_bytes) \
         VALUES (?, ?, {NEXT_TOUCH}, ?) ON CONFLICT(key) DO NOTHING"
    ))
    .bind(key)
    .bind(encoded)
    .bind(size_param(key, encoded))
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

fn size_param(key: &str, encoded: &str) -> i64 {
    i64::try_from(entry_size(key, encoded)).unwrap_or(i64::MAX)
}

fn decode(key: &str, text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|source| LedgerError::Value {
        key: key.to_string(),
        source,
    })
}

#[async_trait]
impl Ledger for SqliteLedger {
    #[instrument(skip(self))]
    async fn add(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        let _guard = self.write_lock.lock().await;
        let mut tx = self.db.pool().begin().await?;

        let inserted = insert_new(&mut tx, key, "true").await?;
        if inserted {
            self.evict(&mut tx).await?;
        } else {
            touch(&mut tx, key).await?;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_open()?;
        let _guard = self.write_lock.lock().await;
        let mut tx = self.db.pool().begin().await?;

        let value = fetch_value(&mut tx, key).await?;
        if value.is_some() {
            touch(&mut tx, key).await?;
        }

        tx.commit().await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.ensure_open()?;
        let encoded = value.to_string();
        let _guard = self.write_lock.lock().await;
        let mut tx = self.db.pool().begin().await?;

        sqlx::query(&format!(
            "INSERT INTO ledger (key, value, touched, size_bytes) \
             VALUES (?, ?, {NEXT_TOUCH}, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, \
             touched = excluded.touched, size_bytes = excluded.size_bytes"
        ))
        .bind(key)
        .bind(&encoded)
        .bind(size_param(key, &encoded))
        .execute(&mut *tx)
        .await?;
        self.evict(&mut tx).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM ledger WHERE key = ?")
            .bind(key)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn len(&self) -> Result<usize> {
        self.ensure_open()?;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ledger")
            .fetch_one(self.db.pool())
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn clear(&self) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM ledger")
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        let rows: Vec<(String,)> = sqlx::query_as("SELECT key FROM ledger ORDER BY touched DESC")
            .fetch_all(self.db.pool())
            .await?;
        Ok(rows.into_iter().map(|(key,)| key).collect())
    }

    async fn get_or_add(&self, key: &str, value: Value) -> Result<Option<Value>> {
        self.ensure_open()?;
        let encoded = value.to_string();
        let _guard = self.write_lock.lock().await;
        let mut tx = self.db.pool().begin().await?;

        let existing = fetch_value(&mut tx, key).await?;
        if existing.is_some() {
            touch(&mut tx, key).await?;
        } else {
            insert_new(&mut tx, key, &encoded).await?;
            self.evict(&mut tx).await?;
        }

        tx.commit().await?;
        Ok(existing)
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _guard = self.write_lock.lock().await;
            self.db.close().await;
        }
        Ok(())
    }
}
