//! Size-bounded deduplication ledger.
//!
//! A ledger is a key/value membership store with least-recently-used
//! eviction. Pollers call [`Ledger::add`] as an atomic test-and-set: the
//! first caller for a key gets `true`, everyone after gets `false`.
//!
//! Two variants share the contract:
//! - [`SqliteLedger`] persists to `ledger.db` and survives restarts
//! - [`MemoryLedger`] is volatile
//!
//! [`open_ledger`] picks one from a [`LedgerConfig`].

mod error;
mod memory;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, instrument};

pub use error::{LedgerDbErrorKind, LedgerError};
pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;

use crate::config::LedgerConfig;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Storage contract for deduplication state.
///
/// All operations are internally synchronized. Recency is refreshed by
/// `add` (new or existing key), `get` and `set`.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Inserts `key` with value `true` if absent. Returns whether it was new.
    async fn add(&self, key: &str) -> Result<bool>;

    /// Returns the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Removes `key`. Returns whether it was present.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Returns the number of stored keys.
    async fn len(&self) -> Result<usize>;

    /// Returns true if no keys are stored.
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Removes every key.
    async fn clear(&self) -> Result<()>;

    /// Returns all keys, most recently used first.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Returns the existing value for `key`, or stores `value` and returns
    /// `None`, in one atomic step.
    async fn get_or_add(&self, key: &str, value: Value) -> Result<Option<Value>>;

    /// Releases storage resources. Further calls fail with
    /// [`LedgerError::Closed`] where the variant can detect it.
    async fn close(&self) -> Result<()>;
}

/// Opens the ledger variant selected by `config`.
///
/// Creates the directory for a persistent ledger and clears existing
/// entries when `clear_on_start` is set.
///
/// # Errors
///
/// Returns [`LedgerError`] if the directory or database cannot be prepared.
#[instrument(skip(config), fields(dir = %config.dir.display(), persistent = config.persistent))]
pub async fn open_ledger(config: &LedgerConfig) -> Result<Arc<dyn Ledger>> {
    let ledger: Arc<dyn Ledger> = if config.persistent {
        Arc::new(SqliteLedger::open(config).await?)
    } else {
        Arc::new(MemoryLedger::new(config.max_items, config.size_limit_bytes))
    };

    if config.clear_on_start {
        ledger.clear().await?;
        info!("cleared ledger on start");
    }

    info!(
        entries = ledger.len().await?,
        max_items = ?config.max_items,
        size_limit_bytes = ?config.size_limit_bytes,
        "ledger ready"
    );
    Ok(ledger)
}

/// Size accounted for one entry: key bytes plus serialized value bytes.
pub(crate) fn entry_size(key: &str, encoded_value: &str) -> u64 {
    (key.len() + encoded_value.len()) as u64
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_volatile_ledger() {
        let config = LedgerConfig::default().with_persistent(false);
        let ledger = open_ledger(&config).await.unwrap();
        assert!(ledger.add("a").await.unwrap());
        assert!(!ledger.add("a").await.unwrap());
        assert_eq!(ledger.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_open_persistent_creates_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("nested").join("ledger");
        let config = LedgerConfig::default().with_dir(&dir);

        let ledger = open_ledger(&config).await.unwrap();
        assert!(ledger.add("k").await.unwrap());
        ledger.close().await.unwrap();

        assert!(dir.join("ledger.db").exists());
    }

    #[tokio::test]
    async fn test_clear_on_start_drops_entries() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig::default().with_dir(temp_dir.path());

        let ledger = open_ledger(&config).await.unwrap();
        ledger.add("old").await.unwrap();
        ledger.close().await.unwrap();

        let ledger = open_ledger(&config.clone().with_clear_on_start(true))
            .await
            .unwrap();
        assert!(ledger.is_empty().await.unwrap());
    }

    #[test]
    fn test_entry_size() {
        assert_eq!(entry_size("abc", "true"), 7);
    }
}
