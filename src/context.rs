//! Process-wide collaborators, constructed once and passed down.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::bus::{Channel, InMemoryBroker, MessageBroker, Router};
use crate::config::{ConfigError, LedgerConfig};
use crate::fetch::{FetchClient, FetchError};
use crate::ledger::{self, Ledger, LedgerError};
use crate::poller::{BusSink, ItemSink, PollError, Poller, PollerConfig, Source};
use crate::shutdown::ShutdownSignal;

/// Startup failures.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("failed to build HTTP session: {0}")]
    Fetch(#[from] FetchError),
}

/// Shared ledger, broker, HTTP session, configuration and shutdown signal.
///
/// Cheap to clone; every clone refers to the same collaborators.
#[derive(Clone)]
pub struct AppContext {
    ledger: Arc<dyn Ledger>,
    broker: Arc<dyn MessageBroker>,
    client: FetchClient,
    ledger_config: LedgerConfig,
    poller_defaults: PollerConfig,
    shutdown: ShutdownSignal,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("ledger_config", &self.ledger_config)
            .field("poller_defaults", &self.poller_defaults)
            .finish_non_exhaustive()
    }
}

impl AppContext {
    /// Opens the ledger and builds the shared HTTP session.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] if the poller defaults are invalid, the
    /// ledger cannot be opened, or the HTTP session cannot be built.
    pub async fn build(
        ledger_config: LedgerConfig,
        poller_defaults: PollerConfig,
    ) -> Result<Self, ContextError> {
        poller_defaults.validate()?;
        let ledger = ledger::open_ledger(&ledger_config).await?;
        let client = FetchClient::new(poller_defaults.fetch_config())?;
        info!(
            persistent = ledger_config.persistent,
            user_agent = %client.user_agent(),
            "application context ready"
        );
        Ok(Self {
            ledger,
            broker: Arc::new(InMemoryBroker::new()),
            client,
            ledger_config,
            poller_defaults,
            shutdown: ShutdownSignal::new(),
        })
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    #[must_use]
    pub fn broker(&self) -> &Arc<dyn MessageBroker> {
        &self.broker
    }

    #[must_use]
    pub fn client(&self) -> &FetchClient {
        &self.client
    }

    #[must_use]
    pub fn ledger_config(&self) -> &LedgerConfig {
        &self.ledger_config
    }

    #[must_use]
    pub fn poller_defaults(&self) -> &PollerConfig {
        &self.poller_defaults
    }

    #[must_use]
    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Sink publishing onto `channel` of the shared broker.
    #[must_use]
    pub fn bus_sink(&self, channel: Channel) -> Arc<dyn ItemSink> {
        Arc::new(BusSink::new(Arc::clone(&self.broker), channel))
    }

    /// Poller for `source` on the shared ledger with its own HTTP session,
    /// using the default poller configuration.
    ///
    /// Each poller gets a separate throttle, so a source that is rate limited
    /// or backing off never delays the others.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Fetch`] if the HTTP client cannot be built.
    pub fn poller(
        &self,
        source: Arc<dyn Source>,
        sink: Arc<dyn ItemSink>,
    ) -> Result<Poller, PollError> {
        Poller::new(
            source,
            Arc::clone(&self.ledger),
            sink,
            self.poller_defaults.clone(),
        )
    }

    /// Like [`poller`](Self::poller), but on the shared HTTP session.
    ///
    /// Every poller built this way waits on the same throttle.
    #[must_use]
    pub fn shared_poller(&self, source: Arc<dyn Source>, sink: Arc<dyn ItemSink>) -> Poller {
        Poller::with_client(
            source,
            Arc::clone(&self.ledger),
            sink,
            self.poller_defaults.clone(),
            self.client.clone(),
        )
    }

    /// Router over the shared broker.
    #[must_use]
    pub fn router<S>(&self, state: S) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        Router::new(Arc::clone(&self.broker), state)
    }

    /// Closes the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the ledger fails to close cleanly.
    pub async fn close(&self) -> Result<(), LedgerError> {
        self.ledger.close().await
    }
}
