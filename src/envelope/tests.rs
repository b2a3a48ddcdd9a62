use super::*;
use serde_json::json;

fn completed_envelope() -> MessageEnvelope {
    MessageEnvelope::new(
        "queue:pdf",
        EventType::JobCompleted,
        "pdf-42",
        "pdf-processing",
        json!({ "pages": 12 }),
    )
}

#[test]
fn test_known_tags_map_to_variants() {
    assert_eq!(EventType::from("job.created"), EventType::JobCreated);
    assert_eq!(EventType::from("job.progress"), EventType::JobProgress);
    assert_eq!(EventType::from("job.completed"), EventType::JobCompleted);
    assert_eq!(EventType::from("job.failed"), EventType::JobFailed);
    assert_eq!(
        EventType::from("job.archived"),
        EventType::Custom("job.archived".to_string())
    );
}

#[test]
fn test_terminal_and_once_per_job() {
    assert!(EventType::JobCompleted.is_terminal());
    assert!(EventType::JobFailed.is_terminal());
    assert!(!EventType::JobProgress.is_terminal());
    assert!(EventType::JobCreated.is_once_per_job());
    assert!(!EventType::JobProgress.is_once_per_job());
    assert!(!EventType::from("thumbnail.ready").is_once_per_job());
}

#[test]
fn test_wire_uses_flat_camel_case_fields() {
    let envelope = completed_envelope().with_correlation_id("chain-1");
    let bytes = encode(&envelope).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(value["id"], envelope.id.as_str());
    assert_eq!(value["channel"], "queue:pdf");
    assert_eq!(value["eventType"], "job.completed");
    assert_eq!(value["jobId"], "pdf-42");
    assert_eq!(value["sourceQueue"], "pdf-processing");
    assert_eq!(value["payload"]["pages"], 12);
    assert_eq!(value["timestamp"], envelope.timestamp);
    assert_eq!(value["correlationId"], "chain-1");
}

#[test]
fn test_absent_correlation_id_is_omitted() {
    let bytes = encode(&completed_envelope()).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(value.get("correlationId").is_none());
}

#[test]
fn test_decode_passes_unknown_event_type_through() {
    let raw = json!({
        "id": "e-1",
        "channel": "queue:crawler",
        "eventType": "crawl.robots-blocked",
        "jobId": "crawl-7",
        "sourceQueue": "web-crawler",
        "payload": { "host": "example.com" },
        "timestamp": 1_725_000_000_000i64
    })
    .to_string();

    let envelope = decode(raw.as_bytes()).unwrap();
    assert_eq!(
        envelope.event_type,
        EventType::Custom("crawl.robots-blocked".to_string())
    );
    assert_eq!(envelope.payload["host"], "example.com");
    assert_eq!(envelope.correlation_id, None);

    // and it goes back out with the same tag
    let again: serde_json::Value = serde_json::from_slice(&encode(&envelope).unwrap()).unwrap();
    assert_eq!(again["eventType"], "crawl.robots-blocked");
}

#[test]
fn test_decode_defaults_missing_payload_to_null() {
    let raw = r#"{"id":"e-2","channel":"queue:pdf","eventType":"job.created","jobId":"pdf-1","sourceQueue":"pdf-processing","timestamp":1}"#;
    let envelope = decode(raw.as_bytes()).unwrap();
    assert!(envelope.payload.is_null());
}

#[test]
fn test_decode_rejects_missing_required_field() {
    let raw = r#"{"id":"e-3","channel":"queue:pdf","eventType":"job.created","timestamp":1}"#;
    assert!(matches!(decode(raw.as_bytes()), Err(CodecError::Json(_))));
}

#[test]
fn test_decode_rejects_invalid_utf8() {
    let raw = [0xff, 0xfe, 0x7b];
    assert!(matches!(decode(&raw), Err(CodecError::Utf8(_))));
}

#[test]
fn test_each_envelope_gets_a_fresh_id() {
    let a = completed_envelope();
    let b = completed_envelope();
    assert_ne!(a.id, b.id);
    assert_eq!(a.job_id, b.job_id);
}
