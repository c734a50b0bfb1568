//! Relay integration tests
//!
//! Runs `ResponseRelay` with the real OpenAI-compatible client against a
//! mock upstream.

use std::time::{Duration, Instant};

use chat_relay::error::{GENERAL_ERROR_MESSAGE, MAX_TOKENS_MESSAGE};
use chat_relay::{Message, StreamEvent};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::common::{constants, joined_content, test_state};
use crate::mocks::MockUpstream;

#[tokio::test]
async fn test_rechunks_upstream_deltas() {
    let upstream = MockUpstream::start().await;
    upstream.mock_stream(&["Hel", "lo", " wor", "ld"], Some("stop")).await;
    let state = test_state(&upstream.uri(), &[("TOKEN_CHUNK_SIZE", "2")]);

    let events: Vec<StreamEvent> = state
        .relay
        .relay(&[Message::user("Say hello")])
        .collect()
        .await;

    assert_eq!(
        events,
        vec![
            StreamEvent::content("Hello"),
            StreamEvent::content(" world"),
            StreamEvent::content(""),
        ]
    );
    assert_eq!(state.gate.available(), 1);
}

#[tokio::test]
async fn test_request_body_sent_upstream() {
    let upstream = MockUpstream::start().await;
    upstream.mock_stream(&["ok"], Some("stop")).await;
    let state = test_state(&upstream.uri(), &[]);

    let conversation = [
        Message::user("first"),
        Message::assistant("reply"),
        Message::user("second"),
    ];
    let _: Vec<_> = state.relay.relay(&conversation).collect().await;

    let mut bodies = upstream.request_bodies().await;
    assert_eq!(bodies.len(), 1);

    let temperature = bodies[0]
        .as_object_mut()
        .and_then(|body| body.remove("temperature"))
        .and_then(|t| t.as_f64())
        .expect("temperature should be sent");
    assert!((temperature - 0.1).abs() < 1e-6);

    assert_eq!(
        bodies[0],
        json!({
            "model": constants::TEST_MODEL,
            "messages": [
                {"role": "system", "content": constants::TEST_SYSTEM_PROMPT},
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "reply"},
                {"role": "user", "content": "second"}
            ],
            "max_tokens": 64,
            "stream": true
        })
    );
}

#[tokio::test]
async fn test_truncation_warning() {
    let upstream = MockUpstream::start().await;
    upstream.mock_stream(&["cut ", "short"], Some("length")).await;
    let state = test_state(&upstream.uri(), &[]);

    let events: Vec<StreamEvent> = state.relay.relay(&[Message::user("hi")]).collect().await;

    assert_eq!(joined_content(&events), "cut short");
    let last = events.last().unwrap();
    assert_eq!(last.warning.as_deref(), Some(MAX_TOKENS_MESSAGE));
    assert_eq!(last.error, None);
    assert!(events[..events.len() - 1].iter().all(|e| e.warning.is_none()));
}

#[tokio::test]
async fn test_establishment_failure_after_retries() {
    let upstream = MockUpstream::start().await;
    upstream.mock_failure(503).await;
    let state = test_state(&upstream.uri(), &[]);

    let events: Vec<StreamEvent> = state.relay.relay(&[Message::user("hi")]).collect().await;

    assert_eq!(events, vec![StreamEvent::error(GENERAL_ERROR_MESSAGE)]);
    assert!(events.iter().all(|e| e.content.is_none()));
    assert_eq!(upstream.request_count().await, 3);
    assert_eq!(state.gate.available(), 1);
}

#[tokio::test]
async fn test_recovers_after_two_failures() {
    let upstream = MockUpstream::start().await;
    upstream.mock_failures_first(500, 2).await;
    upstream.mock_stream(&["back"], Some("stop")).await;
    let state = test_state(&upstream.uri(), &[]);

    let started = Instant::now();
    let events: Vec<StreamEvent> = state.relay.relay(&[Message::user("hi")]).collect().await;
    let elapsed = started.elapsed();

    assert_eq!(
        events,
        vec![StreamEvent::content("back"), StreamEvent::content("")]
    );
    assert_eq!(upstream.request_count().await, 3);
    // Two backoff sleeps of at least RETRY_MIN_WAIT_MS each
    assert!(elapsed >= Duration::from_millis(40), "elapsed {:?}", elapsed);
}

#[tokio::test]
async fn test_retry_count_is_configurable() {
    let upstream = MockUpstream::start().await;
    upstream.mock_failure(502).await;
    let state = test_state(&upstream.uri(), &[("RETRY_COUNT", "1")]);

    let events: Vec<StreamEvent> = state.relay.relay(&[Message::user("hi")]).collect().await;

    assert_eq!(events, vec![StreamEvent::error(GENERAL_ERROR_MESSAGE)]);
    assert_eq!(upstream.request_count().await, 1);
}

#[tokio::test]
async fn test_malformed_chunk_ends_relay_without_retry() {
    let upstream = MockUpstream::start().await;
    let body = format!(
        "data: {}\n\ndata: {{not json\n\ndata: {}\n\n",
        MockUpstream::chunk(Some("partial"), None),
        MockUpstream::chunk(Some("lost"), None)
    );
    upstream.mock_raw_stream(&body).await;
    let state = test_state(&upstream.uri(), &[]);

    let events: Vec<StreamEvent> = state.relay.relay(&[Message::user("hi")]).collect().await;

    assert_eq!(
        events,
        vec![
            StreamEvent::content("partial"),
            StreamEvent::error(GENERAL_ERROR_MESSAGE),
        ]
    );
    assert_eq!(upstream.request_count().await, 1);
    assert_eq!(state.gate.available(), 1);
}

#[tokio::test]
async fn test_concurrent_relays_share_gate() {
    let upstream = MockUpstream::start().await;
    upstream.mock_stream(&["a", "b", "c"], Some("stop")).await;
    let state = test_state(&upstream.uri(), &[("QUEUE_SIZE", "2")]);

    let relays = (0..6).map(|i| {
        let state = state.clone();
        tokio::spawn(async move {
            let events: Vec<StreamEvent> = state
                .relay
                .relay(&[Message::user(format!("question {}", i))])
                .collect()
                .await;
            events
        })
    });

    for handle in relays.collect::<Vec<_>>() {
        let events = handle.await.unwrap();
        assert_eq!(joined_content(&events), "abc");
    }

    let snapshot = state.gate.snapshot();
    assert_eq!(snapshot.available, 2);
    assert!(snapshot.peak_in_flight <= 2);
    assert_eq!(snapshot.total_acquires, 6);
    assert_eq!(snapshot.total_releases, 6);
}
