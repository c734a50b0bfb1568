//! Upstream module
//!
//! Talks to the OpenAI-compatible chat-completion endpoint.

pub mod client;
pub mod retry;
pub mod types;

pub use client::{DeltaStream, OpenAiCompatClient, UpstreamClient};
pub use retry::{RetryPolicy, RetryingCaller};
pub use types::{CallParams, DeltaRecord, FinishReason, Message, Role};
