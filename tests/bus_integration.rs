//! Integration tests for the broker and router lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use newswatch_core::bus::{Channel, InMemoryBroker, Message, MessageBroker, Router};
use newswatch_core::ShutdownSignal;
use serde_json::json;

#[derive(Debug, Default)]
struct Counters {
    news_a: AtomicUsize,
    news_b: AtomicUsize,
    filing: AtomicUsize,
    earnings: AtomicUsize,
}

type State = Arc<Counters>;

fn router(state: State) -> Router<State> {
    Router::new(Arc::new(InMemoryBroker::new()), state).with_poll_timeout(Duration::from_millis(50))
}

#[tokio::test]
async fn test_fan_out_and_derived_messages() {
    let counters = State::default();
    let mut router = router(Arc::clone(&counters));

    router
        .producer("wire", Channel::News, |_ctx| async {
            Ok(Some(Message::event("wire", "headline", json!({"id": 1}))))
        })
        .route(Channel::News, Some(Channel::Earnings), |ctx, message| async move {
            ctx.state().news_a.fetch_add(1, Ordering::SeqCst);
            Ok(Some(Message::event(
                "classifier",
                "earnings_beat",
                json!({"from": message.source}),
            )))
        })
        .route(Channel::News, None, |ctx, _message| async move {
            ctx.state().news_b.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        })
        .route(Channel::Filing, None, |ctx, _message| async move {
            ctx.state().filing.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        })
        .route(Channel::Earnings, None, |ctx, message| async move {
            assert_eq!(message.event_kind(), Some("earnings_beat"));
            ctx.state().earnings.fetch_add(1, Ordering::SeqCst);
            ctx.request_shutdown();
            Ok(None)
        });
    assert_eq!(router.node_count(), 5);

    let report = tokio::time::timeout(Duration::from_secs(5), router.run(ShutdownSignal::new()))
        .await
        .unwrap();

    assert!(report.is_clean(), "unexpected failures: {:?}", report.failures);
    assert_eq!(report.nodes, 5);
    assert_eq!(counters.news_a.load(Ordering::SeqCst), 1);
    assert_eq!(counters.news_b.load(Ordering::SeqCst), 1);
    assert_eq!(counters.filing.load(Ordering::SeqCst), 0);
    assert_eq!(counters.earnings.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_startup_barrier_counts_every_node() {
    let mut router = router(State::default());
    router
        .route(Channel::News, None, |_ctx, _message| async { Ok(None) })
        .route(Channel::Calendar, None, |_ctx, _message| async { Ok(None) })
        .producer("idle", Channel::News, |_ctx| async { Ok(None) });

    let mut readiness = router.readiness();
    assert!(!readiness.is_ready());

    let shutdown = ShutdownSignal::new();
    let handle = tokio::spawn(router.run(shutdown.clone()));

    tokio::time::timeout(Duration::from_secs(2), readiness.wait_until_ready())
        .await
        .unwrap();
    assert_eq!(readiness.arrivals(), 3);
    assert_eq!(readiness.expected(), 3);

    shutdown.trigger();
    let report = handle.await.unwrap();
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_shutdown_stops_workers_within_poll_timeout() {
    let broker: Arc<dyn MessageBroker> = Arc::new(InMemoryBroker::new());
    let mut router = Router::new(Arc::clone(&broker), State::default())
        .with_poll_timeout(Duration::from_millis(100));
    for _ in 0..4 {
        router.route(Channel::News, None, |_ctx, _message| async { Ok(None) });
    }
    let mut readiness = router.readiness();

    let shutdown = ShutdownSignal::new();
    let handle = tokio::spawn(router.run(shutdown.clone()));
    readiness.wait_until_ready().await;

    // Traffic before shutdown is still handled.
    let delivered = broker
        .publish(Channel::News, Arc::new(Message::event("t", "ping", json!(null))))
        .await;
    assert_eq!(delivered, 4);

    shutdown.trigger();
    let report = tokio::time::timeout(Duration::from_millis(500), handle)
        .await
        .expect("router did not stop in time")
        .unwrap();
    assert_eq!(report.nodes, 4);
    assert!(report.is_clean());
    assert_eq!(broker.publish(Channel::News, Arc::new(Message::event("t", "late", json!(null)))).await, 0);
}

#[tokio::test]
async fn test_failures_are_reported_and_siblings_keep_running() {
    let counters = State::default();
    let mut router = router(Arc::clone(&counters));
    router
        .producer("broken", Channel::News, |_ctx| async {
            Err(anyhow::anyhow!("upstream unreachable"))
        })
        .producer("ticker", Channel::Filing, |ctx| async move {
            for n in 0..3 {
                ctx.publish(Channel::Filing, Message::event("ticker", "tick", json!(n)))
                    .await;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Ok(None)
        })
        .route(Channel::Filing, None, |ctx, _message| async move {
            if ctx.state().filing.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                ctx.request_shutdown();
            }
            Ok(None)
        });

    let report = tokio::time::timeout(Duration::from_secs(5), router.run(ShutdownSignal::new()))
        .await
        .unwrap();

    assert_eq!(counters.filing.load(Ordering::SeqCst), 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].name, "producer[broken]");
    assert!(report.failures[0].error.contains("upstream unreachable"));
}
