//! Configuration management for the chat relay
//!
//! Configuration is loaded from environment variables and validated once at
//! startup. Nothing here is re-read at request time.

use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Default system prompt prepended to every conversation
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,

    /// Origin of the OpenAI-compatible endpoint (no trailing slash)
    pub base_url: String,
    /// Bearer credential for the endpoint
    pub api_token: String,
    /// Model to request; `None` lets the endpoint pick
    pub model_id: Option<String>,
    /// Upper bound on generated tokens per response
    pub max_tokens: u32,
    /// Sampling temperature forwarded as-is
    pub temperature: f32,
    /// Whole-request timeout for the HTTP client
    pub upstream_timeout: Duration,

    /// Capacity of the admission gate
    pub queue_size: usize,
    /// Total attempts for establishing an upstream call
    pub retry_count: u32,
    /// Lower bound of the randomized backoff
    pub retry_min_wait: Duration,
    /// Upper bound of the randomized backoff
    pub retry_max_wait: Duration,

    /// Number of text deltas grouped into one content event
    pub token_chunk_size: usize,
    /// Static system prompt
    pub system_prompt: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup("BASE_URL").context("BASE_URL must be set")?;
        let api_token = lookup("API_TOKEN")
            .or_else(|| lookup("API_KEY"))
            .context("API_TOKEN or API_KEY must be set")?;

        let config = Self {
            host: lookup("RELAY_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "RELAY_PORT", 8080)?,

            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            model_id: lookup("MODEL_ID").filter(|m| !m.is_empty()),
            max_tokens: parse_or(&lookup, "MAX_TOKENS", 512)?,
            temperature: parse_or(&lookup, "TEMPERATURE", 0.1)?,
            upstream_timeout: Duration::from_secs(parse_or(
                &lookup,
                "UPSTREAM_TIMEOUT_SECONDS",
                300,
            )?),

            queue_size: parse_or(&lookup, "QUEUE_SIZE", 1)?,
            retry_count: parse_or(&lookup, "RETRY_COUNT", 3)?,
            retry_min_wait: Duration::from_millis(parse_or(&lookup, "RETRY_MIN_WAIT_MS", 500)?),
            retry_max_wait: Duration::from_millis(parse_or(&lookup, "RETRY_MAX_WAIT_MS", 2000)?),

            token_chunk_size: parse_or(&lookup, "TOKEN_CHUNK_SIZE", 1)?,
            system_prompt: lookup("SYSTEM_PROMPT")
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            bail!("BASE_URL must not be empty");
        }
        if self.max_tokens == 0 {
            bail!("MAX_TOKENS must be greater than 0");
        }
        if self.queue_size == 0 {
            bail!("QUEUE_SIZE must be at least 1");
        }
        if self.retry_count == 0 {
            bail!("RETRY_COUNT must be at least 1");
        }
        if self.retry_min_wait > self.retry_max_wait {
            bail!("RETRY_MIN_WAIT_MS must not exceed RETRY_MAX_WAIT_MS");
        }
        if self.token_chunk_size == 0 {
            bail!("TOKEN_CHUNK_SIZE must be at least 1");
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", key)),
        None => Ok(default),
    }
}
