//! Response relay
//!
//! Orchestrates one answer: take an admission slot, establish the upstream
//! call with retry, then forward the re-chunked events to the caller. The
//! slot is owned by the returned stream, so it is released however the
//! relay ends, including when the caller drops the stream half-way.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::aggregator::{EventStream, StreamAggregator};
use crate::config::Config;
use crate::error::{RelayError, GENERAL_ERROR_MESSAGE};
use crate::event::StreamEvent;
use crate::gate::AdmissionGate;
use crate::routes::metrics::record_relay;
use crate::upstream::{CallParams, Message, RetryPolicy, RetryingCaller, UpstreamClient};

/// Lifecycle of one relay invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    AcquiringSlot,
    Calling,
    Streaming,
    FailedTerminal,
    Done,
    ErroredMidstream,
    Cancelled,
}

impl RelayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayState::AcquiringSlot => "acquiring_slot",
            RelayState::Calling => "calling",
            RelayState::Streaming => "streaming",
            RelayState::FailedTerminal => "failed_terminal",
            RelayState::Done => "done",
            RelayState::ErroredMidstream => "errored_midstream",
            RelayState::Cancelled => "cancelled",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self,
            RelayState::FailedTerminal | RelayState::Done | RelayState::ErroredMidstream
        )
    }
}

/// Tracks the state of a relay and reports its outcome exactly once.
///
/// If the stream is dropped before reaching a terminal state the relay is
/// reported as cancelled.
struct RelayTracker {
    relay_id: Uuid,
    started: Instant,
    state: RelayState,
}

impl RelayTracker {
    fn new(relay_id: Uuid) -> Self {
        Self {
            relay_id,
            started: Instant::now(),
            state: RelayState::AcquiringSlot,
        }
    }

    fn transition(&mut self, state: RelayState) {
        debug!(
            relay_id = %self.relay_id,
            from = self.state.as_str(),
            to = state.as_str(),
            "Relay state change"
        );
        self.state = state;
    }
}

impl Drop for RelayTracker {
    fn drop(&mut self) {
        let outcome = if self.state.is_terminal() {
            self.state
        } else {
            RelayState::Cancelled
        };
        let duration = self.started.elapsed();
        record_relay(outcome.as_str(), duration.as_secs_f64());

        if outcome == RelayState::Cancelled {
            warn!(
                relay_id = %self.relay_id,
                abandoned_in = self.state.as_str(),
                "Relay abandoned by caller"
            );
        } else {
            info!(
                relay_id = %self.relay_id,
                outcome = outcome.as_str(),
                duration_ms = duration.as_millis() as u64,
                "Relay finished"
            );
        }
    }
}

/// Entry point for the rendering layer
pub struct ResponseRelay {
    gate: Arc<AdmissionGate>,
    caller: RetryingCaller,
    aggregator: StreamAggregator,
    system_prompt: String,
    params: CallParams,
}

impl ResponseRelay {
    pub fn new(
        gate: Arc<AdmissionGate>,
        caller: RetryingCaller,
        aggregator: StreamAggregator,
        system_prompt: impl Into<String>,
        params: CallParams,
    ) -> Self {
        Self {
            gate,
            caller,
            aggregator,
            system_prompt: system_prompt.into(),
            params,
        }
    }

    /// Build a relay from validated configuration around a shared gate
    pub fn from_config(
        config: &Config,
        gate: Arc<AdmissionGate>,
        client: Arc<dyn UpstreamClient>,
    ) -> Result<Self, RelayError> {
        Ok(Self::new(
            gate,
            RetryingCaller::new(client, RetryPolicy::from_config(config)),
            StreamAggregator::new(config.token_chunk_size)?,
            config.system_prompt.clone(),
            CallParams {
                model_id: config.model_id.clone(),
                max_tokens: config.max_tokens,
                temperature: config.temperature,
            },
        ))
    }

    pub fn gate(&self) -> &Arc<AdmissionGate> {
        &self.gate
    }

    /// Relay one answer for a snapshot of the conversation.
    ///
    /// Nothing happens until the returned stream is polled.
    pub fn relay(&self, conversation: &[Message]) -> EventStream {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(Message::system(self.system_prompt.clone()));
        messages.extend_from_slice(conversation);

        let gate = self.gate.clone();
        let caller = self.caller.clone();
        let aggregator = self.aggregator;
        let params = self.params.clone();
        let relay_id = Uuid::new_v4();

        Box::pin(async_stream::stream! {
            let mut tracker = RelayTracker::new(relay_id);

            let permit = match gate.acquire().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(relay_id = %relay_id, error = %e, "Could not acquire admission slot");
                    tracker.transition(RelayState::FailedTerminal);
                    yield StreamEvent::error(GENERAL_ERROR_MESSAGE);
                    return;
                }
            };

            tracker.transition(RelayState::Calling);
            let deltas = match caller.call_with_retry(&messages, &params).await {
                Ok(deltas) => deltas,
                Err(e) => {
                    error!(relay_id = %relay_id, error = %e, "Upstream call could not be established");
                    drop(permit);
                    tracker.transition(RelayState::FailedTerminal);
                    yield StreamEvent::error(GENERAL_ERROR_MESSAGE);
                    return;
                }
            };

            tracker.transition(RelayState::Streaming);
            let mut events = aggregator.aggregate(deltas);
            let mut failed = false;
            while let Some(event) = events.next().await {
                failed |= event.is_error();
                yield event;
            }

            drop(permit);
            tracker.transition(if failed {
                RelayState::ErroredMidstream
            } else {
                RelayState::Done
            });
        })
    }
}
