//! Tests for request/response correlation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use stdio_bridge::rpc::{BridgeError, Correlator, RequestId};

#[tokio::test]
async fn out_of_order_responses_reach_their_callers() {
    let correlator = Arc::new(Correlator::new(Duration::from_secs(5)));

    let waiters: Vec<_> = (1..=16)
        .map(|n| {
            let pending = correlator.register(RequestId::Number(n)).unwrap();
            tokio::spawn(async move { (n, pending.wait().await) })
        })
        .collect();

    for n in (1..=16).rev() {
        assert!(correlator.resolve(&RequestId::Number(n), json!({"id": n, "result": n * 10})));
    }

    for waiter in waiters {
        let (n, outcome) = waiter.await.unwrap();
        assert_eq!(outcome.unwrap()["result"], json!(n * 10));
    }
    assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test]
async fn late_response_after_timeout_is_dropped() {
    let correlator = Arc::new(Correlator::new(Duration::from_millis(50)));
    let id = RequestId::from("slow");
    let pending = correlator.register(id.clone()).unwrap();

    let err = pending.wait().await.unwrap_err();
    assert_eq!(err, BridgeError::RequestTimeout(Duration::from_millis(50)));
    assert_eq!(err.code(), -32603);

    assert!(!correlator.resolve(&id, json!({"id": "slow", "result": 1})));
    assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test]
async fn reject_all_fails_every_waiter_once() {
    let correlator = Arc::new(Correlator::new(Duration::from_secs(5)));
    let first = correlator.register(RequestId::Number(1)).unwrap();
    let second = correlator.register(RequestId::from("b")).unwrap();

    let exited = BridgeError::ChildExited("signal 9 (SIGKILL)".to_string());
    assert_eq!(correlator.reject_all(&exited), 2);
    assert_eq!(correlator.reject_all(&exited), 0);

    assert_eq!(first.wait().await.unwrap_err(), exited);
    assert_eq!(second.wait().await.unwrap_err(), exited);
}

#[tokio::test]
async fn abandoned_handle_frees_its_id() {
    let correlator = Arc::new(Correlator::new(Duration::from_secs(5)));
    let id = RequestId::Number(7);

    let waiter = {
        let pending = correlator.register(id.clone()).unwrap();
        tokio::spawn(pending.wait())
    };
    waiter.abort();
    let _ = waiter.await;

    assert!(!correlator.is_pending(&id));
    assert!(correlator.register(id).is_ok());
}
