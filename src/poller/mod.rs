//! Source adapters and the loop that drives them.
//!
//! A [`Source`] knows how to fetch and parse one upstream. [`Poller`] runs
//! the shared cycle around it:
//!
//! 1. fetch the raw payload (errors back the interval off)
//! 2. parse it, unless the source answered "not modified"
//! 3. keep only ids the [`Ledger`] has not seen
//! 4. optionally attach article text, then emit to the [`ItemSink`]
//! 5. sleep for the adaptive interval, or until shutdown
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use newswatch_core::bus::{Channel, InMemoryBroker};
//! use newswatch_core::ledger::MemoryLedger;
//! use newswatch_core::poller::{BusSink, FeedSource, Poller, PollerConfig};
//! use newswatch_core::ShutdownSignal;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = Arc::new(InMemoryBroker::new());
//! let poller = Poller::new(
//!     Arc::new(FeedSource::new("wire", "https://wire.test/rss")),
//!     Arc::new(MemoryLedger::unbounded()),
//!     Arc::new(BusSink::new(broker, Channel::News)),
//!     PollerConfig::default(),
//! )?;
//! poller.run(ShutdownSignal::new()).await;
//! # Ok(())
//! # }
//! ```

mod api;
mod config;
mod error;
mod extract;
mod feed;
mod html;
mod interval;
mod item;
mod sink;
mod source;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

pub use api::{ApiSource, JsonParser};
pub use config::PollerConfig;
pub use error::{ParseError, PollError};
pub use extract::{
    DetailExtractor, HtmlTextExtractor, extract_primary_text_from_html, strip_markup, strip_tags,
};
pub use feed::{CATEGORIES_EXTENSION, FeedEntryMapper, FeedSource};
pub use html::{HtmlParser, HtmlSource};
pub use interval::{AdaptiveInterval, MIN_SLEEP};
pub use item::PolledItem;
pub use sink::{BusSink, ItemSink, QueueSink};
pub use source::{RawPayload, Source};

use crate::fetch::FetchClient;
use crate::ledger::Ledger;
use crate::shutdown::ShutdownSignal;

/// Counts for one completed cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// The source answered "not modified"; nothing was parsed.
    pub not_modified: bool,
    /// Items the parser produced.
    pub candidates: usize,
    /// Items not seen before.
    pub new_items: usize,
    /// New items the sink accepted.
    pub emitted: usize,
}

/// Drives one [`Source`] through fetch, dedup and emit cycles.
pub struct Poller {
    source: Arc<dyn Source>,
    ledger: Arc<dyn Ledger>,
    sink: Arc<dyn ItemSink>,
    client: FetchClient,
    config: PollerConfig,
    interval: AdaptiveInterval,
}

impl Poller {
    /// Creates a poller with its own HTTP session built from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Fetch`] if the HTTP client cannot be built.
    pub fn new(
        source: Arc<dyn Source>,
        ledger: Arc<dyn Ledger>,
        sink: Arc<dyn ItemSink>,
        config: PollerConfig,
    ) -> Result<Self, PollError> {
        let client = FetchClient::new(config.fetch_config())?;
        Ok(Self::with_client(source, ledger, sink, config, client))
    }

    /// Creates a poller that uses an existing HTTP session.
    #[must_use]
    pub fn with_client(
        source: Arc<dyn Source>,
        ledger: Arc<dyn Ledger>,
        sink: Arc<dyn ItemSink>,
        config: PollerConfig,
        client: FetchClient,
    ) -> Self {
        let interval = AdaptiveInterval::new(&config);
        Self {
            source,
            ledger,
            sink,
            client,
            config,
            interval,
        }
    }

    #[must_use]
    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    #[must_use]
    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    #[must_use]
    pub fn interval(&self) -> &AdaptiveInterval {
        &self.interval
    }

    /// Runs one fetch → filter → react cycle and adjusts the interval.
    ///
    /// A parse failure counts as an empty cycle. The interval resets only
    /// when the sink accepted at least one item.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Fetch`] or [`PollError::Ledger`] when the cycle
    /// failed, and [`PollError::Sink`] when new items arrived but none could
    /// be emitted. The error hook has already run and the interval backed off.
    #[instrument(skip(self), fields(source = %self.source.name()))]
    pub async fn poll_once(&mut self) -> Result<CycleReport, PollError> {
        match self.cycle().await {
            Ok(report) => {
                if report.emitted > 0 {
                    self.interval.on_new_items();
                } else {
                    self.source.on_idle();
                    self.interval.on_idle();
                }
                debug!(
                    candidates = report.candidates,
                    new_items = report.new_items,
                    next_interval_ms = self.interval.current().as_millis(),
                    "cycle complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.source.on_error(&e);
                self.interval.on_error();
                warn!(
                    error = %e,
                    next_interval_ms = self.interval.current().as_millis(),
                    "cycle failed"
                );
                Err(e)
            }
        }
    }

    async fn cycle(&self) -> Result<CycleReport, PollError> {
        let name = self.source.name();
        let mut report = CycleReport::default();

        let started = Instant::now();
        let raw = self.source.fetch_raw(&self.client).await?;
        let fetch_elapsed = started.elapsed();

        let started = Instant::now();
        let candidates = if let RawPayload::NotModified = raw {
            report.not_modified = true;
            Vec::new()
        } else {
            match self.source.parse_items(raw) {
                Ok(items) => items,
                Err(e) => {
                    warn!(error = %e, "parse failed, treating as no items");
                    Vec::new()
                }
            }
        };
        report.candidates = candidates.len();
        let parse_elapsed = started.elapsed();

        let mut fresh = Vec::new();
        for item in candidates {
            match self.ledger.add(item.id()).await {
                Ok(true) => fresh.push(item),
                Ok(false) => {}
                Err(e) => {
                    error!(item_id = %item.id(), error = %e, "ledger add failed");
                    return Err(e.into());
                }
            }
        }
        report.new_items = fresh.len();

        let started = Instant::now();
        let mut emitted = Vec::with_capacity(fresh.len());
        let mut sink_failure = None;
        for item in fresh {
            let item = self.attach_detail(item).await;
            let id = item.id().to_string();
            match self.sink.emit(name, Arc::new(item.clone())).await {
                Ok(()) => {
                    info!(item_id = %id, title = %item.title(), "new item");
                    emitted.push(item);
                }
                Err(e) => {
                    // Forget the id so the next cycle offers the item again.
                    warn!(item_id = %id, sink = %self.sink.name(), error = %e, "emit failed");
                    if let Err(e) = self.ledger.delete(&id).await {
                        warn!(item_id = %id, error = %e, "could not forget unemitted item");
                    }
                    sink_failure = Some(e);
                }
            }
        }
        if emitted.is_empty()
            && let Some(e) = sink_failure
        {
            return Err(e);
        }
        report.emitted = emitted.len();
        let react_elapsed = started.elapsed();

        if !emitted.is_empty() {
            self.source.on_new_items(&emitted);
        }

        if self.config.timing {
            debug!(
                fetch_ms = fetch_elapsed.as_millis(),
                parse_ms = parse_elapsed.as_millis(),
                react_ms = react_elapsed.as_millis(),
                "cycle timing"
            );
        }
        Ok(report)
    }

    /// Best-effort detail extraction. Failures leave the item as it was.
    async fn attach_detail(&self, item: PolledItem) -> PolledItem {
        if self.config.skip_extraction {
            return item;
        }
        let started = Instant::now();
        let result = self
            .source
            .extract_detail(&self.client, &item, self.config.article_timeout)
            .await;
        if self.config.timing {
            debug!(item_id = %item.id(), extract_ms = started.elapsed().as_millis(), "extract timing");
        }
        match result {
            Ok(Some(detail)) => item.with_detail(detail),
            Ok(None) => item,
            Err(e) => {
                warn!(item_id = %item.id(), error = %e, "detail extraction failed");
                item
            }
        }
    }

    /// Polls until `shutdown` is triggered. The sleep between cycles is cut
    /// short by shutdown; an in-flight cycle is not.
    pub async fn run(mut self, shutdown: ShutdownSignal) {
        info!(
            source = %self.source.name(),
            interval_ms = self.config.poll_interval.as_millis(),
            max_interval_ms = self.config.max_poll_interval.as_millis(),
            user_agent = %self.config.user_agent,
            min_request_interval_ms = self.config.min_request_interval.as_millis(),
            jitter = self.config.jitter_fraction,
            skip_extraction = self.config.skip_extraction,
            "poller starting"
        );

        while !shutdown.is_triggered() {
            // Errors were logged and fed to the interval already.
            let _ = self.poll_once().await;

            let sleep = self.interval.sleep_duration();
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(sleep) => {}
            }
        }
        info!(source = %self.source.name(), "poller stopped");
    }

    /// Applies explicit overrides, then [`run`](Self::run)s.
    ///
    /// A new user agent rebuilds the HTTP session.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Fetch`] if the rebuilt HTTP client cannot be
    /// created. Nothing is polled in that case.
    pub async fn run_with_overrides(
        mut self,
        shutdown: ShutdownSignal,
        poll_interval: Option<Duration>,
        user_agent: Option<String>,
    ) -> Result<(), PollError> {
        if let Some(poll_interval) = poll_interval {
            self.config = self.config.with_poll_interval(poll_interval);
        }
        if let Some(user_agent) = user_agent {
            self.config = self.config.with_user_agent(user_agent);
            self.client = FetchClient::new(self.config.fetch_config())?;
        }
        self.interval = AdaptiveInterval::new(&self.config);
        self.run(shutdown).await;
        Ok(())
    }
}
