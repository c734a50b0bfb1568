//! Wire types for OpenAI-compatible chat completions

use serde::{Deserialize, Serialize};

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Parameters for a single upstream call
#[derive(Debug, Clone, PartialEq)]
pub struct CallParams {
    pub model_id: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Streaming chat completion request body
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    pub messages: &'a [Message],
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

/// Why the upstream stopped generating
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    #[serde(other)]
    Other,
}

/// Text delta inside a streaming chunk
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

/// Choice inside a streaming chunk
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

/// One `chat.completion.chunk` object
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// One incremental record of the upstream stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaRecord {
    pub text: Option<String>,
    pub finish_reason: Option<FinishReason>,
}

impl DeltaRecord {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            finish_reason: None,
        }
    }

    pub fn finished(reason: FinishReason) -> Self {
        Self {
            text: None,
            finish_reason: Some(reason),
        }
    }
}

impl From<ChatCompletionChunk> for DeltaRecord {
    fn from(chunk: ChatCompletionChunk) -> Self {
        match chunk.choices.into_iter().next() {
            Some(choice) => Self {
                text: choice.delta.content,
                finish_reason: choice.finish_reason,
            },
            None => Self::default(),
        }
    }
}
