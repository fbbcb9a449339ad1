use serde::Deserialize;

use crate::types::{ChatChunk, RawFrame, DECODE_ERROR_STATUS, SENTINEL};

// Wire shapes of a frame payload. Every field is optional so that a single
// parse can tell the recognized shapes apart.

#[derive(Debug, Deserialize)]
struct ChatStreamPayload {
    #[serde(default)]
    error: Option<ErrorBody>,
    #[serde(default)]
    choices: Option<Vec<StreamChoice>>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<ContentBody>,
    #[serde(default)]
    message: Option<ContentBody>,
}

#[derive(Debug, Deserialize)]
struct ContentBody {
    #[serde(default)]
    content: Option<String>,
}

impl ChatStreamPayload {
    fn into_chunk(self) -> Option<ChatChunk> {
        if let Some(ErrorBody {
            status: Some(status),
            message: Some(message),
        }) = self.error
        {
            return Some(ChatChunk::Error { status, message });
        }

        let choice = self.choices?.into_iter().next()?;

        if let Some(delta) = choice.delta {
            return Some(ChatChunk::Delta {
                content: delta.content.unwrap_or_default(),
            });
        }
        if let Some(message) = choice.message {
            return Some(ChatChunk::FinalMessage {
                content: message.content.unwrap_or_default(),
            });
        }

        None
    }
}

/// Decode one frame into a chunk.
///
/// Never fails: a payload that matches no recognized shape comes back as an
/// error chunk carrying [`DECODE_ERROR_STATUS`], so one bad frame cannot end
/// an otherwise healthy stream.
pub fn decode(frame: &RawFrame) -> ChatChunk {
    let payload = frame.payload.trim();

    if payload == SENTINEL {
        return ChatChunk::Sentinel;
    }

    match serde_json::from_str::<ChatStreamPayload>(payload) {
        Ok(parsed) => parsed.into_chunk().unwrap_or_else(|| {
            tracing::debug!("Frame payload has no recognized chunk shape");
            ChatChunk::error(DECODE_ERROR_STATUS, "unrecognized chunk shape")
        }),
        Err(e) => {
            tracing::debug!(error = %e, "Failed to parse chat chunk");
            ChatChunk::error(DECODE_ERROR_STATUS, format!("malformed chunk: {}", e))
        }
    }
}
