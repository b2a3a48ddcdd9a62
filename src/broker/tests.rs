use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::*;
use crate::config::BrokerSettings;
use crate::envelope::{EventType, MessageEnvelope};
use crate::transport::{ChannelTransport, Credentials, MemoryHub, MemoryTransport};

const WAIT: Duration = Duration::from_secs(2);

async fn started_broker(hub: &MemoryHub) -> (MessageBroker, Arc<MemoryTransport>) {
    started_broker_with(hub, BrokerSettings::default()).await
}

async fn started_broker_with(
    hub: &MemoryHub,
    settings: BrokerSettings,
) -> (MessageBroker, Arc<MemoryTransport>) {
    let transport = Arc::new(MemoryTransport::new(hub));
    let broker = MessageBroker::new(transport.clone(), settings);
    broker.start(&Credentials::new("test")).await.unwrap();
    (broker, transport)
}

fn collector(name: &str) -> (Arc<dyn EnvelopeHandler>, mpsc::UnboundedReceiver<Arc<MessageEnvelope>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = handler_fn(name, move |envelope| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(envelope);
            Ok(())
        }
    });
    (handler, rx)
}

fn envelope(channel: &str, event_type: EventType, job_id: &str) -> MessageEnvelope {
    MessageEnvelope::new(channel, event_type, job_id, "pdf", json!({ "n": 1 }))
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Arc<MessageEnvelope>>) -> Arc<MessageEnvelope> {
    timeout(WAIT, rx.recv()).await.expect("timed out").expect("closed")
}

async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Arc<MessageEnvelope>>) {
    assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
}

#[tokio::test]
async fn test_publish_reaches_subscriber_unchanged() {
    let hub = MemoryHub::new();
    let (publisher, _) = started_broker(&hub).await;
    let (subscriber, _) = started_broker(&hub).await;

    let (handler, mut rx) = collector("sink");
    subscriber
        .subscribe("queue:crawler", EventFilter::All, handler)
        .unwrap();

    let sent = envelope("queue:crawler", EventType::JobCompleted, "job-1").with_correlation_id("c-1");
    publisher.publish(&sent).await.unwrap();

    let received = next(&mut rx).await;
    assert_eq!(*received, sent);
}

#[tokio::test]
async fn test_filter_only_delivers_matching_types() {
    let hub = MemoryHub::new();
    let (broker, _) = started_broker(&hub).await;

    let (handler, mut rx) = collector("failures");
    broker
        .subscribe(
            "queue:pdf",
            EventFilter::only([EventType::JobFailed]),
            handler,
        )
        .unwrap();

    broker
        .publish(&envelope("queue:pdf", EventType::JobProgress, "job-1"))
        .await
        .unwrap();
    broker
        .publish(&envelope("queue:pdf", EventType::JobFailed, "job-1"))
        .await
        .unwrap();

    assert_eq!(next(&mut rx).await.event_type, EventType::JobFailed);
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn test_other_channels_are_not_delivered() {
    let hub = MemoryHub::new();
    let (broker, _) = started_broker(&hub).await;

    let (handler, mut rx) = collector("sink");
    broker.subscribe("queue:a", EventFilter::All, handler).unwrap();

    broker
        .publish(&envelope("queue:b", EventType::JobCreated, "job-1"))
        .await
        .unwrap();
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn test_every_matching_subscription_gets_a_copy() {
    let hub = MemoryHub::new();
    let (broker, _) = started_broker(&hub).await;

    let (first, mut rx1) = collector("first");
    let (second, mut rx2) = collector("second");
    broker.subscribe("queue:a", EventFilter::All, first).unwrap();
    broker.subscribe("queue:a", EventFilter::All, second).unwrap();
    assert_eq!(broker.subscription_count(), 2);
    assert_eq!(broker.channels(), vec!["queue:a".to_string()]);

    let sent = envelope("queue:a", EventType::JobCreated, "job-1");
    broker.publish(&sent).await.unwrap();

    assert_eq!(next(&mut rx1).await.id, sent.id);
    assert_eq!(next(&mut rx2).await.id, sent.id);
}

#[tokio::test]
async fn test_malformed_payload_is_dropped() {
    let hub = MemoryHub::new();
    let (broker, _) = started_broker(&hub).await;
    let raw = MemoryTransport::new(&hub);
    raw.connect(&Credentials::new("raw")).await.unwrap();

    let (handler, mut rx) = collector("sink");
    broker.subscribe("queue:a", EventFilter::All, handler).unwrap();

    raw.publish_raw("queue:a", b"{not json".to_vec()).await.unwrap();
    raw.publish_raw("queue:a", br#"{"id":"x"}"#.to_vec())
        .await
        .unwrap();
    assert_quiet(&mut rx).await;

    // later valid envelopes still flow
    let sent = envelope("queue:a", EventType::JobCreated, "job-1");
    broker.publish(&sent).await.unwrap();
    assert_eq!(next(&mut rx).await.id, sent.id);
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent() {
    let hub = MemoryHub::new();
    let (broker, _) = started_broker(&hub).await;

    let (handler, mut rx) = collector("sink");
    let handle = broker.subscribe("queue:a", EventFilter::All, handler).unwrap();

    assert!(broker.unsubscribe(&handle));
    assert!(!broker.unsubscribe(&handle));
    assert_eq!(broker.subscription_count(), 0);
    assert!(broker.channels().is_empty());

    broker
        .publish(&envelope("queue:a", EventType::JobCreated, "job-1"))
        .await
        .unwrap();
    assert!(timeout(WAIT, rx.recv()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unsubscribing_one_keeps_the_others() {
    let hub = MemoryHub::new();
    let (broker, _) = started_broker(&hub).await;

    let (first, _rx1) = collector("first");
    let (second, mut rx2) = collector("second");
    let handle = broker.subscribe("queue:a", EventFilter::All, first).unwrap();
    broker.subscribe("queue:a", EventFilter::All, second).unwrap();
    broker.unsubscribe(&handle);

    let sent = envelope("queue:a", EventType::JobCreated, "job-1");
    broker.publish(&sent).await.unwrap();
    assert_eq!(next(&mut rx2).await.id, sent.id);
}

#[tokio::test]
async fn test_failing_and_panicking_handlers_do_not_stop_delivery() {
    let hub = MemoryHub::new();
    let (broker, _) = started_broker(&hub).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let flaky = handler_fn("flaky", move |envelope: Arc<MessageEnvelope>| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            match envelope.job_id.as_str() {
                "boom" => panic!("handler exploded"),
                "err" => Err(HandlerError::failed("nope")),
                _ => Ok(()),
            }
        }
    });
    let (healthy, mut rx) = collector("healthy");
    broker.subscribe("queue:a", EventFilter::All, flaky).unwrap();
    broker.subscribe("queue:a", EventFilter::All, healthy).unwrap();

    for job in ["boom", "err", "ok"] {
        broker
            .publish(&envelope("queue:a", EventType::JobCreated, job))
            .await
            .unwrap();
    }

    for job in ["boom", "err", "ok"] {
        assert_eq!(next(&mut rx).await.job_id, job);
    }
    timeout(WAIT, async {
        while calls.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("flaky handler saw all three envelopes");
}

#[tokio::test]
async fn test_per_channel_order_is_preserved() {
    let hub = MemoryHub::new();
    let (publisher, _) = started_broker(&hub).await;
    let (subscriber, _) = started_broker(&hub).await;

    let (handler, mut rx) = collector("ordered");
    subscriber.subscribe("queue:a", EventFilter::All, handler).unwrap();

    let jobs: Vec<String> = (0..50).map(|i| format!("job-{i}")).collect();
    for job in &jobs {
        publisher
            .publish(&envelope("queue:a", EventType::JobProgress, job))
            .await
            .unwrap();
    }
    for job in &jobs {
        assert_eq!(&next(&mut rx).await.job_id, job);
    }
}

#[tokio::test]
async fn test_slow_handler_does_not_delay_others() {
    let hub = MemoryHub::new();
    let (broker, _) = started_broker(&hub).await;

    let slow = handler_fn("slow", |_| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    });
    let (fast, mut rx) = collector("fast");
    broker.subscribe("queue:a", EventFilter::All, slow).unwrap();
    broker.subscribe("queue:a", EventFilter::All, fast).unwrap();

    for i in 0..3 {
        broker
            .publish(&envelope("queue:a", EventType::JobCreated, &format!("job-{i}")))
            .await
            .unwrap();
    }
    for i in 0..3 {
        assert_eq!(next(&mut rx).await.job_id, format!("job-{i}"));
    }
}

/// A handler that parks until the gate opens, counting calls.
fn gated(
    name: &str,
) -> (
    Arc<dyn EnvelopeHandler>,
    tokio::sync::watch::Sender<bool>,
    Arc<AtomicUsize>,
) {
    let (gate_tx, gate_rx) = tokio::sync::watch::channel(false);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handler = handler_fn(name, move |_| {
        let mut gate = gate_rx.clone();
        let counter = counter.clone();
        async move {
            let _ = gate.wait_for(|open| *open).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });
    (handler, gate_tx, calls)
}

async fn wait_for_calls(calls: &AtomicUsize, expected: usize) {
    timeout(WAIT, async {
        while calls.load(Ordering::SeqCst) < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("handler calls never reached expected count");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), expected);
}

async fn wait_until_picked_up(broker: &MessageBroker, handle: &SubscriptionHandle) {
    timeout(WAIT, async {
        while broker.queued(handle) != Some(0) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("worker never picked up the first envelope");
}

#[tokio::test]
async fn test_full_queue_drops_progress_for_that_subscription_only() {
    let hub = MemoryHub::new();
    let settings = BrokerSettings {
        subscription_queue_capacity: 2,
    };
    let (broker, _) = started_broker_with(&hub, settings).await;

    let (blocked, gate, calls) = gated("blocked");
    let (fast, mut rx) = collector("fast");
    let handle = broker.subscribe("queue:a", EventFilter::All, blocked).unwrap();
    broker.subscribe("queue:a", EventFilter::All, fast).unwrap();

    broker
        .publish(&envelope("queue:a", EventType::JobProgress, "first"))
        .await
        .unwrap();
    assert_eq!(next(&mut rx).await.job_id, "first");
    wait_until_picked_up(&broker, &handle).await;

    // the fast subscription drains as we go and loses nothing
    for i in 0..5 {
        broker
            .publish(&envelope("queue:a", EventType::JobProgress, &format!("job-{i}")))
            .await
            .unwrap();
        assert_eq!(next(&mut rx).await.job_id, format!("job-{i}"));
    }
    assert_eq!(broker.queued(&handle), Some(2));

    let _ = gate.send(true);
    wait_for_calls(&calls, 3).await;
}

#[tokio::test]
async fn test_terminal_envelopes_are_never_dropped_by_a_full_queue() {
    let hub = MemoryHub::new();
    let settings = BrokerSettings {
        subscription_queue_capacity: 2,
    };
    let (broker, _) = started_broker_with(&hub, settings).await;

    let (blocked, gate, calls) = gated("blocked");
    let handle = broker.subscribe("queue:a", EventFilter::All, blocked).unwrap();

    broker
        .publish(&envelope("queue:a", EventType::JobCreated, "first"))
        .await
        .unwrap();
    wait_until_picked_up(&broker, &handle).await;

    for i in 0..6 {
        let event_type = if i % 2 == 0 {
            EventType::JobCompleted
        } else {
            EventType::JobFailed
        };
        broker
            .publish(&envelope("queue:a", event_type, &format!("job-{i}")))
            .await
            .unwrap();
    }
    // progress past capacity is still shed
    broker
        .publish(&envelope("queue:a", EventType::JobProgress, "late"))
        .await
        .unwrap();
    assert_eq!(broker.queued(&handle), Some(6));

    let _ = gate.send(true);
    wait_for_calls(&calls, 7).await;
}

#[tokio::test]
async fn test_publish_while_transport_down_reports_envelope() {
    let hub = MemoryHub::new();
    let (broker, transport) = started_broker(&hub).await;
    transport.disconnect();

    let sent = envelope("queue:a", EventType::JobProgress, "job-1");
    match broker.publish(&sent).await {
        Err(PublishError::TransportDown { envelope_id }) => assert_eq!(envelope_id, sent.id),
        other => panic!("unexpected result: {other:?}"),
    }

    transport.reconnect();
    broker.publish(&sent).await.unwrap();
}

#[tokio::test]
async fn test_start_rejects_bad_credentials() {
    let hub = MemoryHub::with_token("secret");
    let broker = MessageBroker::new(
        Arc::new(MemoryTransport::new(&hub)),
        BrokerSettings::default(),
    );

    let err = broker.start(&Credentials::new("svc")).await.unwrap_err();
    assert!(matches!(err, BrokerError::Connection(_)));

    broker
        .start(&Credentials::new("svc").with_token("secret"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_everything() {
    let hub = MemoryHub::new();
    let (broker, _) = started_broker(&hub).await;
    let (handler, mut rx) = collector("sink");
    broker.subscribe("queue:a", EventFilter::All, handler).unwrap();

    broker.shutdown().await;
    broker.shutdown().await;

    assert!(broker.is_closed());
    assert_eq!(broker.subscription_count(), 0);
    assert!(matches!(
        broker.publish(&envelope("queue:a", EventType::JobCreated, "j")).await,
        Err(PublishError::Closed)
    ));
    let (again, _) = collector("again");
    assert!(matches!(
        broker.subscribe("queue:a", EventFilter::All, again),
        Err(BrokerError::Closed)
    ));
    assert!(timeout(WAIT, rx.recv()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_monitor_sees_every_event_type() {
    let hub = MemoryHub::new();
    let (broker, _) = started_broker(&hub).await;
    let monitor = broker.monitor();

    let (handler, mut rx) = collector("watcher");
    let handle = monitor.watch("queue:a", handler).unwrap();
    monitor.watch("queue:a", Arc::new(LogObserver)).unwrap();

    for event_type in [
        EventType::JobCreated,
        EventType::JobProgress,
        EventType::from("job.retried"),
    ] {
        broker
            .publish(&envelope("queue:a", event_type.clone(), "job-1"))
            .await
            .unwrap();
        assert_eq!(next(&mut rx).await.event_type, event_type);
    }

    assert!(monitor.unwatch(&handle));
    assert_eq!(monitor.channels(), vec!["queue:a".to_string()]);
}
