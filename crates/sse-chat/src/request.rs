use serde::{Deserialize, Serialize};

use crate::error::{ChatStreamError, Result};
use crate::types::ChatMessage;

pub const DEFAULT_MODEL: &str = "gpt-5-chat";

const TEMPERATURE_RANGE: std::ops::RangeInclusive<f32> = 0.0..=2.0;
const MAX_TOKENS_RANGE: std::ops::RangeInclusive<u32> = 1..=4096;

/// JSON body POSTed to the chat endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub model: String,
    pub stream: bool,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Optional sampling parameters, validated when a request is built
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ChatOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    fn validate(&self) -> Result<()> {
        if let Some(temp) = self.temperature {
            if !TEMPERATURE_RANGE.contains(&temp) {
                return Err(ChatStreamError::InvalidRequest(format!(
                    "temperature must be within [0, 2], got {}",
                    temp
                )));
            }
        }
        if let Some(tokens) = self.max_tokens {
            if !MAX_TOKENS_RANGE.contains(&tokens) {
                return Err(ChatStreamError::InvalidRequest(format!(
                    "max_tokens must be within [1, 4096], got {}",
                    tokens
                )));
            }
        }
        Ok(())
    }
}

/// Validates a conversation history and turns it into an [`OutboundRequest`]
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    model: String,
    options: ChatOptions,
}

impl RequestBuilder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            options: ChatOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    /// Build a streaming request for `history`, preserving message order.
    ///
    /// Content is not trimmed here; a message with empty content is rejected.
    pub fn build(&self, history: &[ChatMessage]) -> Result<OutboundRequest> {
        if history.is_empty() {
            return Err(ChatStreamError::InvalidRequest(
                "message history must not be empty".to_string(),
            ));
        }
        if let Some(index) = history.iter().position(|m| m.content.is_empty()) {
            return Err(ChatStreamError::InvalidRequest(format!(
                "message {} has empty content",
                index
            )));
        }
        self.options.validate()?;

        Ok(OutboundRequest {
            model: self.model.clone(),
            stream: true,
            messages: history.to_vec(),
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
        })
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}
