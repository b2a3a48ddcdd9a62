use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use super::frame::{ClientFrame, RelayFrame};
use super::*;

fn recorder() -> (RawCallback, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: RawCallback = Arc::new(move |bytes: &[u8]| {
        sink.lock().push(String::from_utf8_lossy(bytes).into_owned());
    });
    (callback, seen)
}

#[test]
fn test_client_frames_are_type_tagged() {
    let frame = ClientFrame::Publish {
        channel: "queue:pdf".to_string(),
        data: "{}".to_string(),
    };
    let value: serde_json::Value = serde_json::to_value(&frame).unwrap();
    assert_eq!(
        value,
        json!({ "type": "publish", "channel": "queue:pdf", "data": "{}" })
    );

    let parsed: ClientFrame =
        serde_json::from_str(r#"{"type":"subscribe","channel":"queue:crawler"}"#).unwrap();
    assert_eq!(
        parsed,
        ClientFrame::Subscribe {
            channel: "queue:crawler".to_string()
        }
    );
}

#[test]
fn test_relay_frames_parse() {
    let auth: RelayFrame = serde_json::from_str(r#"{"type":"authenticated"}"#).unwrap();
    assert_eq!(auth, RelayFrame::Authenticated {});

    let msg: RelayFrame =
        serde_json::from_str(r#"{"type":"message","channel":"queue:pdf","data":"x"}"#).unwrap();
    assert_eq!(
        msg,
        RelayFrame::Message {
            channel: "queue:pdf".to_string(),
            data: "x".to_string()
        }
    );
}

#[test]
fn test_raw_table_tracks_first_and_last_subscription() {
    let table = RawSubscriptions::new();
    let (cb, seen) = recorder();

    let (a, first_a) = table.insert("queue:pdf", cb.clone());
    let (b, first_b) = table.insert("queue:pdf", cb);
    assert!(first_a);
    assert!(!first_b);
    assert_eq!(table.len(), 2);

    assert_eq!(table.deliver("queue:pdf", b"hello"), 2);
    assert_eq!(seen.lock().len(), 2);

    assert_eq!(table.remove(a), Some(("queue:pdf".to_string(), false)));
    assert_eq!(table.remove(b), Some(("queue:pdf".to_string(), true)));
    assert_eq!(table.remove(b), None);
    assert!(table.is_empty());
}

#[tokio::test]
async fn test_memory_publish_reaches_other_endpoints() {
    let hub = MemoryHub::new();
    let publisher = MemoryTransport::new(&hub);
    let subscriber = MemoryTransport::new(&hub);
    publisher.connect(&Credentials::new("pdf")).await.unwrap();
    subscriber.connect(&Credentials::new("crawler")).await.unwrap();

    let (cb, seen) = recorder();
    subscriber.subscribe_raw("queue:pdf", cb);

    publisher.publish_raw("queue:pdf", b"one".to_vec()).await.unwrap();
    publisher.publish_raw("queue:pdf", b"two".to_vec()).await.unwrap();
    publisher.publish_raw("queue:other", b"nope".to_vec()).await.unwrap();

    assert_eq!(*seen.lock(), vec!["one".to_string(), "two".to_string()]);
    assert_eq!(hub.published(), 3);
}

#[tokio::test]
async fn test_memory_publish_while_down_is_unacknowledged() {
    let hub = MemoryHub::new();
    let transport = MemoryTransport::new(&hub);

    // never connected
    let err = transport.publish_raw("queue:pdf", b"x".to_vec()).await;
    assert!(matches!(err, Err(TransportError::Unacknowledged)));

    transport.connect(&Credentials::new("pdf")).await.unwrap();
    transport.disconnect();
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    let err = transport.publish_raw("queue:pdf", b"x".to_vec()).await;
    assert!(matches!(err, Err(TransportError::Unacknowledged)));
    assert_eq!(hub.published(), 0);
}

#[tokio::test]
async fn test_memory_subscriptions_survive_reconnect() {
    let hub = MemoryHub::new();
    let publisher = MemoryTransport::new(&hub);
    let subscriber = MemoryTransport::new(&hub);
    publisher.connect(&Credentials::new("pdf")).await.unwrap();
    subscriber.connect(&Credentials::new("crawler")).await.unwrap();

    let (cb, seen) = recorder();
    subscriber.subscribe_raw("queue:pdf", cb);

    subscriber.disconnect();
    publisher.publish_raw("queue:pdf", b"lost".to_vec()).await.unwrap();
    subscriber.reconnect();
    publisher.publish_raw("queue:pdf", b"after".to_vec()).await.unwrap();

    assert_eq!(*seen.lock(), vec!["after".to_string()]);
}

#[tokio::test]
async fn test_memory_hub_rejects_bad_token() {
    let hub = MemoryHub::with_token("s3cret");
    let transport = MemoryTransport::new(&hub);

    let err = transport.connect(&Credentials::new("pdf")).await;
    assert!(matches!(err, Err(TransportError::Connection(_))));

    let ok = transport
        .connect(&Credentials::new("pdf").with_token("s3cret"))
        .await;
    assert!(ok.is_ok());
    assert_eq!(transport.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_memory_unsubscribe_and_shutdown() {
    let hub = MemoryHub::new();
    let transport = MemoryTransport::new(&hub);
    transport.connect(&Credentials::new("pdf")).await.unwrap();

    let (cb, seen) = recorder();
    let id = transport.subscribe_raw("queue:pdf", cb);
    transport.unsubscribe_raw(id);
    transport.unsubscribe_raw(id);
    transport.publish_raw("queue:pdf", b"x".to_vec()).await.unwrap();
    assert!(seen.lock().is_empty());

    transport.shutdown().await;
    assert_eq!(transport.state(), ConnectionState::Closed);
    let err = transport.publish_raw("queue:pdf", b"x".to_vec()).await;
    assert!(matches!(err, Err(TransportError::Closed)));
    assert!(transport.connect(&Credentials::new("pdf")).await.is_err());
}

#[tokio::test]
async fn test_websocket_connect_to_nothing_fails() {
    // grab a free port, then release it so nothing is listening there
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let transport = WebSocketTransport::new(
        format!("ws://127.0.0.1:{port}"),
        crate::policies::Backoff::default(),
        3,
    );
    let err = transport.connect(&Credentials::new("pdf")).await;
    assert!(matches!(err, Err(TransportError::Connection(_))));
    assert_eq!(transport.state(), ConnectionState::Disconnected);

    let err = transport.publish_raw("queue:pdf", b"x".to_vec()).await;
    assert!(matches!(err, Err(TransportError::Unacknowledged)));
}
