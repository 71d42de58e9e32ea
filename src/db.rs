//! `SQLite` pool behind the persistent ledger.
//!
//! Pragmas go through [`SqliteConnectOptions`], so every pooled connection
//! runs in WAL mode with the same busy timeout, not just the first one.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use thiserror::Error;
use tracing::{debug, instrument};

/// Connections per ledger file. Writers are serialized by the ledger.
const MAX_CONNECTIONS: u32 = 4;

/// Wait on a locked file before failing with `SQLITE_BUSY`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Failures opening a ledger database.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("failed to open ledger database: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("failed to migrate ledger schema: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Pooled connections to one `ledger.db` with the schema applied.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the file at `db_path` and migrates it.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the file cannot be opened, or
    /// [`DbError::Migration`] if the schema cannot be applied.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn open(db_path: &Path) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;
        Self::migrated(pool).await
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open).
    pub async fn open_in_memory() -> Result<Self, DbError> {
        // Every `:memory:` connection is its own database: keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::new().in_memory(true))
            .await?;
        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self, DbError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!("ledger schema up to date");
        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) async fn close(&self) {
        self.pool.close().await;
    }
}
