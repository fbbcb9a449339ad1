//! # sse-chat
//!
//! Streaming chat client. Sends a conversation history to a chat endpoint,
//! reads the `text/event-stream` reply frame by frame, decodes each frame
//! into a [`ChatChunk`] and assembles the growing reply, with cancellation
//! that releases the connection immediately.
//!
//! ```rust,no_run
//! use sse_chat::{ChatMessage, ChatStreamClient, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> sse_chat::Result<()> {
//!     let mut client = ChatStreamClient::new(ClientConfig::default())?;
//!
//!     let history = vec![ChatMessage::user("你好")];
//!     let session = client.send(
//!         &history,
//!         |_chunk, text| println!("{}", text),
//!         |outcome| println!("done: {:?}", outcome.end),
//!     )?;
//!
//!     session.wait().await;
//!     Ok(())
//! }
//! ```

pub mod buffer_utils;
pub mod client;
pub mod config;
pub mod error;
pub mod request;
pub mod session;
pub mod streaming;
pub mod transport;
pub mod types;

pub use buffer_utils::{read_frames, CircularLineBuffer, FrameAssembler};
pub use client::ChatStreamClient;
pub use config::{ClientConfig, RetryConfig};
pub use error::{ChatStreamError, Result};
pub use request::{ChatOptions, OutboundRequest, RequestBuilder};
pub use session::{FailureReason, SessionEnd, SessionHandle, SessionOutcome, SessionState};
pub use streaming::decode;
pub use transport::{ByteStream, HttpTransport, Transport};
pub use types::{ChatChunk, ChatMessage, RawFrame, Role, DECODE_ERROR_STATUS, SENTINEL};
