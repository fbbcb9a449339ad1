use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatStreamError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("HTTP error ({status}): {body}")]
    Http { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Stream ended uncleanly in the middle of a line")]
    UncleanEnd,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChatStreamError {
    /// Whether opening the stream may be attempted again after this error
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || (500..600).contains(status),
            Self::Transport(e) => e.is_timeout(),
            Self::Timeout(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatStreamError>;
