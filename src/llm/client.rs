//! HTTP chat client for hosted and local language models

use crate::config::LlmConfig;
use crate::llm::{ChatMessage, LanguageModel, LlmError, Role};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Wire protocol spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    /// `POST /chat/completions` with bearer auth
    ChatCompletions,
    /// `POST /v1/messages` with `x-api-key`
    AnthropicMessages,
}

/// Provider defaults: (protocol, default endpoint, needs API key)
fn provider_defaults(provider: &str) -> Option<(Protocol, &'static str, bool)> {
    match provider {
        "openai" => Some((
            Protocol::ChatCompletions,
            "https://api.openai.com/v1/chat/completions",
            true,
        )),
        "groq" => Some((
            Protocol::ChatCompletions,
            "https://api.groq.com/openai/v1/chat/completions",
            true,
        )),
        "ollama" => Some((
            Protocol::ChatCompletions,
            "http://localhost:11434/v1/chat/completions",
            false,
        )),
        "anthropic" => Some((
            Protocol::AnthropicMessages,
            "https://api.anthropic.com/v1/messages",
            true,
        )),
        _ => None,
    }
}

/// Blocking chat client
pub struct ChatClient {
    protocol: Protocol,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: Client,
}

impl ChatClient {
    /// Create a client from configuration
    ///
    /// # Errors
    /// - Unsupported provider
    /// - API key environment variable missing or empty for providers that need one
    /// - HTTP client build errors
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let (protocol, default_endpoint, needs_key) = provider_defaults(&config.provider)
            .ok_or_else(|| {
                LlmError::Config(format!(
                    "Unsupported provider: {}. Supported: openai, groq, ollama, anthropic",
                    config.provider
                ))
            })?;

        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.is_empty() => Some(key),
            _ if needs_key => {
                return Err(LlmError::Config(format!(
                    "Environment variable {} is not set",
                    config.api_key_env
                )));
            }
            _ => None,
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;

        Ok(Self {
            protocol,
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| default_endpoint.to_string()),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client,
        })
    }

    fn chat_completions(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            messages: &'a [ChatMessage],
            temperature: f32,
            max_tokens: u32,
        }

        #[derive(Deserialize)]
        struct Response {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: ResponseMessage,
        }

        #[derive(Deserialize)]
        struct ResponseMessage {
            content: Option<String>,
        }

        let mut request = self.client.post(&self.endpoint).json(&Request {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response: Response = Self::send(request)?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }

    fn anthropic_messages(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            system: Option<String>,
            messages: Vec<&'a ChatMessage>,
            temperature: f32,
            max_tokens: u32,
        }

        #[derive(Deserialize)]
        struct Response {
            content: Vec<ContentBlock>,
        }

        #[derive(Deserialize)]
        struct ContentBlock {
            #[serde(default)]
            text: Option<String>,
        }

        // System turns travel in a dedicated field
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let turns: Vec<&ChatMessage> = messages.iter().filter(|m| m.role != Role::System).collect();

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&Request {
                model: &self.model,
                system: (!system.is_empty()).then(|| system.join("\n\n")),
                messages: turns,
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            });
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response: Response = Self::send(request)?;
        let text: String = response
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect();

        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text)
    }

    fn send<T: for<'de> Deserialize<'de>>(
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<T, LlmError> {
        let response = request.send().map_err(|e| LlmError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        response.json().map_err(|e| LlmError::Http(e.to_string()))
    }
}

impl LanguageModel for ChatClient {
    fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        debug!(
            "Sending {} messages to {} ({})",
            messages.len(),
            self.model,
            self.endpoint
        );

        match self.protocol {
            Protocol::ChatCompletions => self.chat_completions(messages),
            Protocol::AnthropicMessages => self.anthropic_messages(messages),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
