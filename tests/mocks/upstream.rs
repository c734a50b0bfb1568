//! Mock OpenAI-compatible upstream for testing
//!
//! Provides wiremock-based mocks for `POST /chat/completions` in streaming
//! mode: successful SSE streams, truncated streams, establishment failures
//! and malformed chunks.
//!
//! # Example
//!
//! ```rust,ignore
//! use crate::mocks::upstream::MockUpstream;
//!
//! #[tokio::test]
//! async fn test_with_upstream_mock() {
//!     let upstream = MockUpstream::start().await;
//!     upstream.mock_stream(&["Hel", "lo"], Some("stop")).await;
//!     // Use upstream.uri() as BASE_URL
//! }
//! ```

use serde_json::json;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::common::constants::TEST_API_TOKEN;

/// Mock upstream server wrapper
pub struct MockUpstream {
    server: MockServer,
}

impl MockUpstream {
    /// Start a new mock upstream server
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Get the mock server URI (used as BASE_URL)
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Format one chunk in the `chat.completion.chunk` shape
    pub fn chunk(content: Option<&str>, finish_reason: Option<&str>) -> String {
        let delta = match content {
            Some(text) => json!({ "content": text }),
            None => json!({}),
        };
        json!({
            "id": "chatcmpl-test",
            "object": "chat.completion.chunk",
            "created": 1706745600,
            "model": "test-model",
            "choices": [{ "index": 0, "delta": delta, "finish_reason": finish_reason }]
        })
        .to_string()
    }

    /// Build an SSE body: role chunk, one chunk per delta, a finish chunk
    /// and the `[DONE]` marker.
    pub fn sse_body(deltas: &[&str], finish_reason: Option<&str>) -> String {
        let mut body = String::new();
        body.push_str(&format!(
            "data: {}\n\n",
            json!({
                "id": "chatcmpl-test",
                "object": "chat.completion.chunk",
                "choices": [{ "index": 0, "delta": { "role": "assistant" }, "finish_reason": null }]
            })
        ));
        for delta in deltas {
            body.push_str(&format!("data: {}\n\n", Self::chunk(Some(delta), None)));
        }
        if finish_reason.is_some() {
            body.push_str(&format!("data: {}\n\n", Self::chunk(None, finish_reason)));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn sse_response(body: String) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .set_body_raw(body, "text/event-stream")
            .insert_header("Cache-Control", "no-cache")
    }

    /// Mock a successful streaming completion
    pub async fn mock_stream(&self, deltas: &[&str], finish_reason: Option<&str>) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", format!("Bearer {}", TEST_API_TOKEN).as_str()))
            .respond_with(Self::sse_response(Self::sse_body(deltas, finish_reason)))
            .mount(&self.server)
            .await;
    }

    /// Mock a stream whose body is used verbatim
    pub async fn mock_raw_stream(&self, body: &str) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(Self::sse_response(body.to_string()))
            .mount(&self.server)
            .await;
    }

    /// Mock an establishment failure for every request
    pub async fn mock_failure(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": { "message": "upstream overloaded", "type": "server_error" }
            })))
            .mount(&self.server)
            .await;
    }

    /// Mock `times` establishment failures that take precedence over any
    /// other mounted mock
    pub async fn mock_failures_first(&self, status: u16, times: u64) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(status))
            .up_to_n_times(times)
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Number of requests the upstream has received
    pub async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or(0)
    }

    /// JSON bodies of all received requests
    pub async fn request_bodies(&self) -> Vec<serde_json::Value> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter_map(|request| request.body_json().ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_body_shape() {
        let body = MockUpstream::sse_body(&["a", "b"], Some("length"));
        assert_eq!(body.matches("data: ").count(), 5);
        assert!(body.ends_with("data: [DONE]\n\n"));
        assert!(body.contains("\"finish_reason\":\"length\""));
    }
}
