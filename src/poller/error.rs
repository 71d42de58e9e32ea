//! Error types for source adapters and the polling loop.

use thiserror::Error;

use crate::fetch::FetchError;
use crate::ledger::LedgerError;

/// A raw payload could not be turned into items.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The feed document is not valid Atom/RSS.
    #[error("invalid feed from {source_name}: {message}")]
    Feed {
        source_name: String,
        message: String,
    },

    /// The payload kind does not match what the source expects.
    #[error("{source_name} cannot parse a {found} payload")]
    UnexpectedPayload {
        source_name: String,
        found: &'static str,
    },

    /// A parsing collaborator rejected the payload.
    #[error("{source_name}: {message}")]
    Collaborator {
        source_name: String,
        message: String,
    },
}

impl ParseError {
    pub fn collaborator(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collaborator {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

/// Why a poll cycle failed.
#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Dedup state could not be read or written. Never swallowed.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The sink refused a new item.
    #[error("sink {sink} rejected item {item_id}: {reason}")]
    Sink {
        sink: String,
        item_id: String,
        reason: String,
    },
}
