//! Stable buffer scenarios: serialization of concurrent writers and
//! transaction log consumption by hooks.

use serde_json::json;
use stanchion_buffer::StableBuffer;
use std::sync::Arc;

/// Concurrent writers serialize: transaction windows never overlap and
/// every increment lands.
#[tokio::test]
async fn concurrent_writers_serialize() {
    let buffer = Arc::new(StableBuffer::new());

    let mut handles = Vec::new();
    for _ in 0..25 {
        let buffer = Arc::clone(&buffer);
        handles.push(tokio::spawn(async move {
            buffer
                .run(|state| {
                    let n = state
                        .get("counter")
                        .and_then(serde_json::Value::as_i64)
                        .unwrap_or(0);
                    state.insert("counter".to_string(), json!(n + 1));
                    Ok(())
                })
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(buffer.get("counter").await, Some(json!(25)));

    let logs = buffer.transaction_logs();
    assert_eq!(logs.len(), 25);
    for pair in logs.windows(2) {
        assert!(
            pair[0].finished_at <= pair[1].started_at,
            "transactions overlapped: {} finished {:?}, {} started {:?}",
            pair[0].transaction_id,
            pair[0].finished_at,
            pair[1].transaction_id,
            pair[1].started_at
        );
        assert!(pair[0].started_at <= pair[1].started_at);
    }
}

/// The JSON transaction log slice handed to hooks mirrors the records.
#[tokio::test]
async fn transaction_logs_surface_as_json() {
    let buffer = StableBuffer::new();
    buffer.set("a", json!(1)).await.unwrap();
    buffer.set("b", json!(2)).await.unwrap();

    let logs = buffer.transaction_logs_json();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0]["transactionId"], json!("tx-1"));
    assert_eq!(logs[0]["success"], json!(true));
    assert_eq!(logs[1]["stateBefore"], json!({"a": 1}));
    assert_eq!(logs[1]["stateAfter"], json!({"a": 1, "b": 2}));
}
