//! OpenAI-compatible upstream client
//!
//! Opens one streaming `/chat/completions` call per invocation and exposes
//! the response as a lazy sequence of [`DeltaRecord`]s.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, instrument, warn};

use super::types::{CallParams, ChatCompletionChunk, ChatCompletionRequest, DeltaRecord, Message};
use crate::config::Config;
use crate::error::UpstreamError;
use crate::streaming::{SseDecoder, SseFrame};

/// Lazy, single-pass sequence of deltas from one upstream call
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<DeltaRecord, UpstreamError>> + Send>>;

/// A chat-completion endpoint that can stream deltas.
///
/// `call` resolves once the stream is established. Errors returned from
/// `call` are establishment failures. Errors yielded by the stream are
/// mid-stream failures.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Open a streaming call for the given conversation
    async fn call(
        &self,
        messages: &[Message],
        params: &CallParams,
    ) -> Result<DeltaStream, UpstreamError>;
}

/// Client for any endpoint speaking the OpenAI chat-completions protocol
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl OpenAiCompatClient {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            api_token: config.api_token.clone(),
        }
    }

    fn default_headers(&self) -> Result<HeaderMap, UpstreamError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_token))
            .map_err(|_| UpstreamError::InvalidRequest("API token is not a valid header value".to_string()))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        Ok(headers)
    }
}

#[async_trait]
impl UpstreamClient for OpenAiCompatClient {
    fn name(&self) -> &'static str {
        "openai-compat"
    }

    #[instrument(skip(self, messages, params), fields(messages = messages.len()))]
    async fn call(
        &self,
        messages: &[Message],
        params: &CallParams,
    ) -> Result<DeltaStream, UpstreamError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionRequest {
            model: params.model_id.as_deref(),
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            stream: true,
        };

        debug!(url = %url, max_tokens = params.max_tokens, "Opening upstream stream");

        let response = self
            .client
            .post(&url)
            .headers(self.default_headers()?)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(url = %url, status = status, "Upstream rejected stream request");
            return Err(UpstreamError::Status { status, body });
        }

        Ok(decode_deltas(response.bytes_stream()))
    }
}

/// Decode an SSE byte stream into delta records.
///
/// Stops at `[DONE]` or when the byte stream ends. A transport error or an
/// undecodable chunk is yielded once and ends the sequence.
pub fn decode_deltas<S>(bytes: S) -> DeltaStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        futures::pin_mut!(bytes);
        let mut decoder = SseDecoder::new();

        'outer: loop {
            let (frames, ended) = match bytes.next().await {
                Some(Ok(chunk)) => (decoder.feed(&chunk), false),
                Some(Err(e)) => {
                    yield Err(UpstreamError::Transport(e.to_string()));
                    break;
                }
                None => (decoder.finish().into_iter().collect::<Vec<_>>(), true),
            };

            for frame in frames {
                match frame {
                    SseFrame::Done => break 'outer,
                    SseFrame::Data(data) => match serde_json::from_str::<ChatCompletionChunk>(&data) {
                        Ok(chunk) => yield Ok(DeltaRecord::from(chunk)),
                        Err(e) => {
                            yield Err(UpstreamError::MalformedChunk(e.to_string()));
                            break 'outer;
                        }
                    },
                }
            }

            if ended {
                break;
            }
        }
    })
}
