//! Volatile in-process ledger.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{Ledger, LedgerError, Result, entry_size};

#[derive(Debug)]
struct Entry {
    value: Value,
    tick: u64,
    size: u64,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    /// Recency index: tick → key, oldest first.
    order: BTreeMap<u64, String>,
    next_tick: u64,
    total_bytes: u64,
    closed: bool,
}

impl State {
    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn touch(&mut self, key: &str) {
        let tick = self.bump();
        if let Some(entry) = self.entries.get_mut(key) {
            self.order.remove(&entry.tick);
            entry.tick = tick;
            self.order.insert(tick, key.to_string());
        }
    }

    fn insert(&mut self, key: &str, value: Value) {
        let size = entry_size(key, &value.to_string());
        let tick = self.bump();
        if let Some(old) = self.entries.insert(
            key.to_string(),
            Entry {
                value,
                tick,
                size,
            },
        ) {
            self.order.remove(&old.tick);
            self.total_bytes -= old.size;
        }
        self.order.insert(tick, key.to_string());
        self.total_bytes += size;
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.order.remove(&entry.tick);
                self.total_bytes -= entry.size;
                true
            }
            None => false,
        }
    }

    /// Evicts coldest entries until both ceilings hold. The most recent
    /// entry is never evicted.
    fn evict(&mut self, max_items: Option<usize>, size_limit: Option<u64>) -> usize {
        let mut evicted = 0;
        while self.entries.len() > 1
            && (max_items.is_some_and(|max| self.entries.len() > max)
                || size_limit.is_some_and(|limit| self.total_bytes > limit))
        {
            let Some((_, key)) = self.order.pop_first() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&key) {
                self.total_bytes -= entry.size;
                evicted += 1;
            }
        }
        evicted
    }
}

/// In-memory ledger with the same contract and eviction as the SQLite one.
///
/// # Example
///
/// ```
/// use newswatch_core::ledger::{Ledger, MemoryLedger};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let ledger = MemoryLedger::new(Some(2), None);
/// assert!(ledger.add("a").await?);
/// assert!(ledger.add("b").await?);
/// assert!(ledger.add("c").await?); // evicts "a"
/// assert_eq!(ledger.keys().await?, vec!["c", "b"]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryLedger {
    state: Mutex<State>,
    max_items: Option<usize>,
    size_limit_bytes: Option<u64>,
}

impl MemoryLedger {
    /// Creates an empty ledger. `None` disables the respective ceiling.
    #[must_use]
    pub fn new(max_items: Option<usize>, size_limit_bytes: Option<u64>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_items: max_items.map(|max| max.max(1)),
            size_limit_bytes,
        }
    }

    /// Creates an unbounded ledger.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(None, None)
    }

    /// Returns the summed size of all entries in bytes.
    pub async fn total_bytes(&self) -> u64 {
        self.state.lock().await.total_bytes
    }

    fn insert_and_evict(&self, state: &mut State, key: &str, value: Value) {
        state.insert(key, value);
        let evicted = state.evict(self.max_items, self.size_limit_bytes);
        if evicted > 0 {
            debug!(evicted, "evicted least recently used entries");
        }
    }
}

fn ensure_open(state: &State) -> Result<()> {
    if state.closed {
        Err(LedgerError::Closed)
    } else {
        Ok(())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    #[instrument(skip(self))]
    async fn add(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        ensure_open(&state)?;
        if state.entries.contains_key(key) {
            state.touch(key);
            return Ok(false);
        }
        self.insert_and_evict(&mut state, key, Value::Bool(true));
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut state = self.state.lock().await;
        ensure_open(&state)?;
        state.touch(key);
        Ok(state.entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut state = self.state.lock().await;
        ensure_open(&state)?;
        self.insert_and_evict(&mut state, key, value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        ensure_open(&state)?;
        Ok(state.remove(key))
    }

    async fn len(&self) -> Result<usize> {
        let state = self.state.lock().await;
        ensure_open(&state)?;
        Ok(state.entries.len())
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        ensure_open(&state)?;
        state.entries.clear();
        state.order.clear();
        state.total_bytes = 0;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        ensure_open(&state)?;
        Ok(state.order.values().rev().cloned().collect())
    }

    async fn get_or_add(&self, key: &str, value: Value) -> Result<Option<Value>> {
        let mut state = self.state.lock().await;
        ensure_open(&state)?;
        if let Some(existing) = state.entries.get(key).map(|entry| entry.value.clone()) {
            state.touch(key);
            return Ok(Some(existing));
        }
        self.insert_and_evict(&mut state, key, value);
        Ok(None)
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.entries.clear();
        state.order.clear();
        state.total_bytes = 0;
        Ok(())
    }
}
