use serde::{Deserialize, Serialize};

/// Status attached to error chunks synthesized for frames that could not be decoded
pub const DECODE_ERROR_STATUS: u16 = 422;

/// Payload that marks the end of the reply stream
pub const SENTINEL: &str = "[DONE]";

/// One delimited record pulled off the response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub payload: String,
}

impl RawFrame {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// Typed unit decoded from a single frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatChunk {
    /// No further chunks will arrive
    Sentinel,

    /// Incremental fragment of the reply
    Delta { content: String },

    /// The whole reply in one frame
    FinalMessage { content: String },

    /// In-band failure reported by the server, or a frame that failed to decode
    Error { status: u16, message: String },
}

impl ChatChunk {
    pub fn delta(content: impl Into<String>) -> Self {
        Self::Delta {
            content: content.into(),
        }
    }

    pub fn final_message(content: impl Into<String>) -> Self {
        Self::FinalMessage {
            content: content.into(),
        }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self::Error {
            status,
            message: message.into(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, Self::Sentinel)
    }

    /// Text this chunk contributes to the assembled reply.
    ///
    /// Error chunks render as an inline annotation so the caller sees the
    /// failure in place within the growing message.
    pub fn rendered_text(&self) -> Option<String> {
        match self {
            Self::Sentinel => None,
            Self::Delta { content } | Self::FinalMessage { content } => Some(content.clone()),
            Self::Error { status, message } => Some(format!("\n[error {}: {}]", status, message)),
        }
    }
}
