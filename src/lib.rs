//! Newswatch Core Library
//!
//! Continuously polls news feeds, press-release pages, filings and
//! calendars, deduplicates what it sees, and fans new items out to
//! independent consumers.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`fetch`] - Throttled HTTP session with retries and conditional GETs
//! - [`ledger`] - Size-bounded deduplication store (`SQLite` or in-memory)
//! - [`poller`] - Source adapters and the adaptive polling loop
//! - [`bus`] - In-process broker and router with coordinated startup/shutdown
//! - [`context`] - Shared collaborators built once at startup
//! - [`config`] - Environment-driven configuration
//! - [`db`] - `SQLite` pool and schema for the persistent ledger

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bus;
pub mod config;
pub mod context;
pub mod db;
pub mod fetch;
pub mod ledger;
pub mod poller;
pub mod shutdown;
pub mod user_agent;

// Re-export commonly used types
pub use bus::{Channel, InMemoryBroker, Message, MessageBroker, Router, RouterContext};
pub use config::{ConfigError, LedgerConfig};
pub use context::{AppContext, ContextError};
pub use fetch::{FetchClient, FetchConfig, FetchError, FetchOutcome, RetryPolicy};
pub use ledger::{Ledger, LedgerError, MemoryLedger, SqliteLedger, open_ledger};
pub use poller::{FeedSource, PolledItem, Poller, PollerConfig, Source};
pub use shutdown::ShutdownSignal;
