pub mod chunk;
pub mod message;

pub use chunk::{ChatChunk, RawFrame, DECODE_ERROR_STATUS, SENTINEL};
pub use message::{ChatMessage, Role};
