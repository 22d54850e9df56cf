//! Language model access used for query reformulation and decomposition
//!
//! The retrieval core only needs a single blocking `chat` call. `ChatClient`
//! speaks the OpenAI-compatible chat completions protocol (OpenAI, Groq,
//! Ollama) and the Anthropic messages API.

mod client;

pub use client::ChatClient;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM configuration error: {0}")]
    Config(String),

    #[error("LLM request failed: {0}")]
    Http(String),

    #[error("LLM API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("LLM returned an empty response")]
    EmptyResponse,
}

/// Author of a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
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

/// Trait for chat language models
///
/// Implementations block the calling thread; async callers run them on a
/// blocking task.
pub trait LanguageModel: Send + Sync {
    /// Send an ordered conversation and return the assistant reply
    fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;

    /// Get the model name
    fn model_name(&self) -> &str;
}
