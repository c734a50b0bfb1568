//! Chat relay - streaming chat-completion relay
//!
//! Admits a bounded number of concurrent upstream calls, retries call
//! establishment with jittered backoff, and re-chunks the upstream token
//! stream into content events for a rendering layer.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod event;
pub mod gate;
pub mod relay;
pub mod routes;
pub mod streaming;
pub mod upstream;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

pub use crate::aggregator::{EventStream, StreamAggregator};
pub use crate::config::Config;
pub use crate::event::StreamEvent;
pub use crate::gate::{AdmissionGate, GatePermit};
pub use crate::relay::ResponseRelay;
pub use crate::upstream::{Message, OpenAiCompatClient, Role, UpstreamClient};

/// Application state shared across all request handlers
pub struct AppState {
    pub config: Config,
    pub start_time: Instant,
    /// The process-wide admission gate
    pub gate: Arc<AdmissionGate>,
    pub relay: Arc<ResponseRelay>,
}

impl AppState {
    /// Create application state talking to the configured endpoint
    pub fn new(config: Config) -> Result<Self> {
        // Initialize HTTP client with connection pooling
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(100)
            .timeout(config.upstream_timeout)
            .build()?;

        let client: Arc<dyn UpstreamClient> =
            Arc::new(OpenAiCompatClient::new(http_client, &config));

        Self::with_client(config, client)
    }

    /// Create application state around any upstream client
    pub fn with_client(config: Config, client: Arc<dyn UpstreamClient>) -> Result<Self> {
        let gate = Arc::new(AdmissionGate::new(config.queue_size)?);
        let relay = Arc::new(ResponseRelay::from_config(&config, gate.clone(), client)?);

        Ok(Self {
            config,
            start_time: Instant::now(),
            gate,
            relay,
        })
    }
}
