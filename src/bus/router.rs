//! Router: runs handlers and producers against a broker under one lifecycle.
//!
//! Nodes are registered up front, then [`Router::run`] consumes the router:
//!
//! 1. every worker subscribes to its channel, then all nodes meet at a
//!    startup barrier sized to the node count; the router is ready once it
//!    trips
//! 2. workers loop on a receive bounded by the poll timeout, publishing
//!    handler results to the output channel; on a timeout they exit if
//!    shutdown was requested
//! 3. producers run once after the barrier and publish their result
//! 4. `run` returns once every node and every unit spawned through
//!    [`RouterContext::spawn`] has exited, with a [`RouterReport`]
//!
//! Handler errors are logged and the worker keeps going. Producer errors and
//! panics are collected in the report; siblings keep running.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{Barrier, mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use super::{Channel, Message, MessageBroker};
use crate::shutdown::ShutdownSignal;

/// How long a worker waits for a message before re-checking shutdown.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Output of a handler or producer invocation.
pub type NodeResult = anyhow::Result<Option<Message>>;

/// Errors surfaced by the router API.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The router has stopped accepting supervised units.
    #[error("router is not running; cannot spawn '{0}'")]
    NotRunning(String),
}

/// A subscriber: receives each message of its channel.
trait Handler<S>: Send + Sync + 'static {
    fn call(&self, ctx: RouterContext<S>, message: Arc<Message>) -> BoxFuture<'static, NodeResult>;
}

impl<S, F, Fut> Handler<S> for F
where
    F: Fn(RouterContext<S>, Arc<Message>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = NodeResult> + Send + 'static,
{
    fn call(&self, ctx: RouterContext<S>, message: Arc<Message>) -> BoxFuture<'static, NodeResult> {
        Box::pin(self(ctx, message))
    }
}

/// A producer: runs once after startup.
trait Producer<S>: Send + Sync + 'static {
    fn call(&self, ctx: RouterContext<S>) -> BoxFuture<'static, NodeResult>;
}

impl<S, F, Fut> Producer<S> for F
where
    F: Fn(RouterContext<S>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = NodeResult> + Send + 'static,
{
    fn call(&self, ctx: RouterContext<S>) -> BoxFuture<'static, NodeResult> {
        Box::pin(self(ctx))
    }
}

struct SpawnRequest {
    name: String,
    future: BoxFuture<'static, anyhow::Result<()>>,
    ttl: Option<Duration>,
}

/// Handle given to every handler, producer and spawned unit.
pub struct RouterContext<S> {
    state: S,
    broker: Arc<dyn MessageBroker>,
    shutdown: ShutdownSignal,
    spawner: mpsc::UnboundedSender<SpawnRequest>,
}

impl<S: Clone> Clone for RouterContext<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            broker: Arc::clone(&self.broker),
            shutdown: self.shutdown.clone(),
            spawner: self.spawner.clone(),
        }
    }
}

impl<S> fmt::Debug for RouterContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterContext")
            .field("shutdown", &self.shutdown.is_triggered())
            .finish_non_exhaustive()
    }
}

impl<S> RouterContext<S> {
    /// Shared state passed to [`Router::new`].
    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn broker(&self) -> &Arc<dyn MessageBroker> {
        &self.broker
    }

    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Asks every node to wind down.
    pub fn request_shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Publishes directly, bypassing the node's output channel.
    pub async fn publish(&self, channel: Channel, message: Message) -> usize {
        self.broker.publish(channel, Arc::new(message)).await
    }

    /// Runs `future` under the router's supervision; `run` waits for it.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::NotRunning`] if the router has already exited.
    pub fn spawn<F>(&self, name: impl Into<String>, future: F) -> Result<(), RouterError>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.submit(name.into(), Box::pin(future), None)
    }

    /// Like [`spawn`](Self::spawn), cancelling the unit after `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::NotRunning`] if the router has already exited.
    pub fn spawn_with_ttl<F>(
        &self,
        name: impl Into<String>,
        future: F,
        ttl: Duration,
    ) -> Result<(), RouterError>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.submit(name.into(), Box::pin(future), Some(ttl))
    }

    fn submit(
        &self,
        name: String,
        future: BoxFuture<'static, anyhow::Result<()>>,
        ttl: Option<Duration>,
    ) -> Result<(), RouterError> {
        self.spawner
            .send(SpawnRequest { name, future, ttl })
            .map_err(|rejected| RouterError::NotRunning(rejected.0.name))
    }
}

struct Route<S> {
    listen_to: Channel,
    publish_to: Option<Channel>,
    handler: Arc<dyn Handler<S>>,
    ttl: Option<Duration>,
}

struct ProducerRoute<S> {
    name: String,
    publish_to: Channel,
    producer: Arc<dyn Producer<S>>,
    ttl: Option<Duration>,
}

/// Observes startup of a router that is (about to be) running.
#[derive(Debug, Clone)]
pub struct Readiness {
    arrivals: Arc<AtomicUsize>,
    ready: watch::Receiver<bool>,
    expected: usize,
}

impl Readiness {
    /// Nodes that have reached the startup barrier so far.
    #[must_use]
    pub fn arrivals(&self) -> usize {
        self.arrivals.load(Ordering::SeqCst)
    }

    /// Number of nodes the barrier waits for.
    #[must_use]
    pub fn expected(&self) -> usize {
        self.expected
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Waits until the startup barrier has tripped.
    pub async fn wait_until_ready(&mut self) {
        // Err means the router was dropped; nothing left to wait for.
        let _ = self.ready.wait_for(|ready| *ready).await;
    }
}

/// A node or unit that ended abnormally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    pub name: String,
    pub error: String,
}

/// Aggregate outcome of [`Router::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterReport {
    /// Registered nodes that were started.
    pub nodes: usize,
    /// Units started through [`RouterContext::spawn`].
    pub spawned: usize,
    /// Nodes and units cancelled by their ttl.
    pub expired: usize,
    pub failures: Vec<NodeFailure>,
}

impl RouterReport {
    /// True when nothing failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, name: String, joined: Result<UnitExit, JoinError>) {
        match joined {
            Ok(UnitExit::Completed) => debug!(node = %name, "node exited"),
            Ok(UnitExit::Expired) => {
                debug!(node = %name, "node lifetime expired");
                self.expired += 1;
            }
            Ok(UnitExit::Failed(error)) => {
                error!(node = %name, error = %error, "node failed");
                self.failures.push(NodeFailure {
                    name,
                    error: format!("{error:#}"),
                });
            }
            Err(join_error) => {
                let error = if join_error.is_panic() {
                    "panicked".to_string()
                } else {
                    join_error.to_string()
                };
                error!(node = %name, %error, "node aborted");
                self.failures.push(NodeFailure { name, error });
            }
        }
    }
}

enum UnitExit {
    Completed,
    Expired,
    Failed(anyhow::Error),
}

async fn with_ttl<F>(future: F, ttl: Option<Duration>) -> UnitExit
where
    F: Future<Output = anyhow::Result<()>>,
{
    let result = match ttl {
        Some(ttl) => match tokio::time::timeout(ttl, future).await {
            Ok(result) => result,
            Err(_) => return UnitExit::Expired,
        },
        None => future.await,
    };
    match result {
        Ok(()) => UnitExit::Completed,
        Err(error) => UnitExit::Failed(error),
    }
}

/// Binds handlers and producers to a broker.
///
/// `S` is extra state cloned into every [`RouterContext`].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use newswatch_core::bus::{Channel, InMemoryBroker, Message, Router};
/// use newswatch_core::ShutdownSignal;
///
/// # async fn example() {
/// let mut router = Router::new(Arc::new(InMemoryBroker::new()), ());
/// router.route(Channel::News, Some(Channel::Earnings), |_ctx, message: Arc<Message>| async move {
///     Ok(message.as_item().map(|item| Message::event("tagger", "earnings", item.title().into())))
/// });
/// let report = router.run(ShutdownSignal::new()).await;
/// assert!(report.is_clean());
/// # }
/// ```
pub struct Router<S> {
    broker: Arc<dyn MessageBroker>,
    state: S,
    routes: Vec<Route<S>>,
    producers: Vec<ProducerRoute<S>>,
    poll_timeout: Duration,
    arrivals: Arc<AtomicUsize>,
    ready_tx: watch::Sender<bool>,
}

impl<S> fmt::Debug for Router<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("workers", &self.routes.len())
            .field("producers", &self.producers.len())
            .field("poll_timeout", &self.poll_timeout)
            .finish_non_exhaustive()
    }
}

impl<S> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new(broker: Arc<dyn MessageBroker>, state: S) -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            broker,
            state,
            routes: Vec::new(),
            producers: Vec::new(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            arrivals: Arc::new(AtomicUsize::new(0)),
            ready_tx,
        }
    }

    /// Overrides the worker receive timeout (and so the shutdown latency).
    #[must_use]
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Registers a worker on `listen_to`. Non-`None` handler results are
    /// published to `publish_to` when one is bound.
    pub fn route<F, Fut>(
        &mut self,
        listen_to: Channel,
        publish_to: Option<Channel>,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(RouterContext<S>, Arc<Message>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = NodeResult> + Send + 'static,
    {
        self.push_route(listen_to, publish_to, Arc::new(handler), None)
    }

    /// Like [`route`](Self::route), cancelling the worker after `ttl`.
    pub fn route_with_ttl<F, Fut>(
        &mut self,
        listen_to: Channel,
        publish_to: Option<Channel>,
        handler: F,
        ttl: Duration,
    ) -> &mut Self
    where
        F: Fn(RouterContext<S>, Arc<Message>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = NodeResult> + Send + 'static,
    {
        self.push_route(listen_to, publish_to, Arc::new(handler), Some(ttl))
    }

    /// Registers a producer whose non-`None` result goes to `publish_to`.
    pub fn producer<F, Fut>(
        &mut self,
        name: impl Into<String>,
        publish_to: Channel,
        producer: F,
    ) -> &mut Self
    where
        F: Fn(RouterContext<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = NodeResult> + Send + 'static,
    {
        self.push_producer(name.into(), publish_to, Arc::new(producer), None)
    }

    /// Like [`producer`](Self::producer), cancelling it after `ttl`.
    pub fn producer_with_ttl<F, Fut>(
        &mut self,
        name: impl Into<String>,
        publish_to: Channel,
        producer: F,
        ttl: Duration,
    ) -> &mut Self
    where
        F: Fn(RouterContext<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = NodeResult> + Send + 'static,
    {
        self.push_producer(name.into(), publish_to, Arc::new(producer), Some(ttl))
    }

    fn push_route(
        &mut self,
        listen_to: Channel,
        publish_to: Option<Channel>,
        handler: Arc<dyn Handler<S>>,
        ttl: Option<Duration>,
    ) -> &mut Self {
        self.routes.push(Route {
            listen_to,
            publish_to,
            handler,
            ttl,
        });
        self
    }

    fn push_producer(
        &mut self,
        name: String,
        publish_to: Channel,
        producer: Arc<dyn Producer<S>>,
        ttl: Option<Duration>,
    ) -> &mut Self {
        self.producers.push(ProducerRoute {
            name,
            publish_to,
            producer,
            ttl,
        });
        self
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.worker_count() + self.producer_count()
    }

    /// Returns a handle observing startup; take it before calling `run`.
    #[must_use]
    pub fn readiness(&self) -> Readiness {
        Readiness {
            arrivals: Arc::clone(&self.arrivals),
            ready: self.ready_tx.subscribe(),
            expected: self.node_count(),
        }
    }

    /// Runs every node until shutdown and returns once all have exited.
    #[instrument(skip_all, fields(workers = self.worker_count(), producers = self.producer_count()))]
    pub async fn run(self, shutdown: ShutdownSignal) -> RouterReport {
        let mut report = RouterReport {
            nodes: self.node_count(),
            ..RouterReport::default()
        };

        if report.nodes == 0 {
            warn!("no routes registered, nothing to run");
            self.ready_tx.send_replace(true);
            return report;
        }

        let barrier = Arc::new(Barrier::new(report.nodes));
        let ready_tx = Arc::new(self.ready_tx);
        let (spawn_tx, mut spawn_rx) = mpsc::unbounded_channel();
        let ctx = RouterContext {
            state: self.state,
            broker: Arc::clone(&self.broker),
            shutdown,
            spawner: spawn_tx,
        };
        let startup = Startup {
            barrier,
            arrivals: self.arrivals,
            ready_tx,
        };

        let mut units = JoinSet::new();
        let mut names = HashMap::new();

        for (index, route) in self.routes.into_iter().enumerate() {
            let name = format!("worker[{}]#{index}", route.listen_to);
            let ttl = route.ttl;
            let worker = run_worker(route, ctx.clone(), startup.clone(), self.poll_timeout);
            let handle = units.spawn(with_ttl(worker, ttl));
            names.insert(handle.id(), name);
        }

        for producer in self.producers {
            let name = format!("producer[{}]", producer.name);
            let ttl = producer.ttl;
            let task = run_producer(producer, ctx.clone(), startup.clone());
            let handle = units.spawn(with_ttl(task, ttl));
            names.insert(handle.id(), name);
        }

        // Units hold the only remaining senders; the channel closes once all
        // of them are gone.
        drop(ctx);
        drop(startup);

        info!(nodes = report.nodes, "router started");

        loop {
            tokio::select! {
                Some(request) = spawn_rx.recv() => {
                    let SpawnRequest { name, future, ttl } = request;
                    debug!(unit = %name, ?ttl, "spawning supervised unit");
                    report.spawned += 1;
                    let handle = units.spawn(with_ttl(future, ttl));
                    names.insert(handle.id(), format!("unit[{name}]"));
                }
                Some(joined) = units.join_next_with_id() => {
                    let (id, exit) = match joined {
                        Ok((id, exit)) => (id, Ok(exit)),
                        Err(join_error) => (join_error.id(), Err(join_error)),
                    };
                    let name = names.remove(&id).unwrap_or_else(|| format!("task-{id}"));
                    report.record(name, exit);
                }
                else => break,
            }
        }

        info!(
            failures = report.failures.len(),
            spawned = report.spawned,
            "router stopped"
        );
        report
    }
}

#[derive(Clone)]
struct Startup {
    barrier: Arc<Barrier>,
    arrivals: Arc<AtomicUsize>,
    ready_tx: Arc<watch::Sender<bool>>,
}

impl Startup {
    async fn rendezvous(&self) {
        self.arrivals.fetch_add(1, Ordering::SeqCst);
        if self.barrier.wait().await.is_leader() {
            self.ready_tx.send_replace(true);
            debug!("startup barrier tripped");
        }
    }
}

async fn run_worker<S>(
    route: Route<S>,
    ctx: RouterContext<S>,
    startup: Startup,
    poll_timeout: Duration,
) -> anyhow::Result<()>
where
    S: Clone + Send + Sync + 'static,
{
    let channel = route.listen_to;
    let mut subscription = ctx.broker.subscribe(channel).await;
    startup.rendezvous().await;
    drop(startup);

    loop {
        let message = match tokio::time::timeout(poll_timeout, subscription.recv()).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!(%channel, "subscription closed");
                break;
            }
            Err(_) => {
                if ctx.shutdown.is_triggered() {
                    break;
                }
                continue;
            }
        };

        match route.handler.call(ctx.clone(), message).await {
            Ok(Some(output)) => {
                if let Some(publish_to) = route.publish_to {
                    ctx.broker.publish(publish_to, Arc::new(output)).await;
                } else {
                    debug!(%channel, "handler output discarded, no output channel bound");
                }
            }
            Ok(None) => {}
            Err(error) => {
                error!(%channel, error = %error, "handler failed");
            }
        }
    }

    ctx.broker.unsubscribe(channel, &subscription);
    Ok(())
}

async fn run_producer<S>(
    producer: ProducerRoute<S>,
    ctx: RouterContext<S>,
    startup: Startup,
) -> anyhow::Result<()>
where
    S: Clone + Send + Sync + 'static,
{
    startup.rendezvous().await;
    drop(startup);

    if let Some(output) = producer.producer.call(ctx.clone()).await? {
        ctx.broker
            .publish(producer.publish_to, Arc::new(output))
            .await;
    }
    Ok(())
}
