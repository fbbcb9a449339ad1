use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;

use super::buffering::CircularLineBuffer;
use crate::error::{ChatStreamError, Result};
use crate::types::RawFrame;

const DATA_PREFIX: &str = "data:";

/// Collects the lines of one record until the blank line that terminates it
#[derive(Debug, Default)]
pub struct FrameAssembler {
    data_lines: Vec<String>,
    open: bool,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (terminator already stripped).
    ///
    /// Returns a frame when `line` closes a record that carried at least one
    /// `data:` line. Comments, other fields and data-less records yield nothing.
    pub fn push_line(&mut self, line: &str) -> Option<RawFrame> {
        if line.is_empty() {
            let was_open = std::mem::replace(&mut self.open, false);
            if self.data_lines.is_empty() {
                if was_open {
                    tracing::trace!("Ignoring record without data lines");
                }
                return None;
            }
            let payload = std::mem::take(&mut self.data_lines).join("\n");
            return Some(RawFrame::new(payload));
        }

        self.open = true;

        if let Some(data) = line.strip_prefix(DATA_PREFIX) {
            let data = data.strip_prefix(' ').unwrap_or(data);
            self.data_lines.push(data.to_string());
        }

        None
    }

    /// True while a record has started but its terminator has not been seen
    pub fn has_pending(&self) -> bool {
        self.open
    }
}

/// Slice a response body into frames as bytes arrive.
///
/// The sequence ends when the source ends or errors. A source error is
/// yielded once and ends the sequence. If the source closes partway
/// through a line, the final item is [`ChatStreamError::UncleanEnd`];
/// complete lines still waiting for a blank-line terminator are dropped.
pub fn read_frames<S>(source: S) -> Pin<Box<dyn Stream<Item = Result<RawFrame>> + Send>>
where
    S: Stream<Item = Result<Bytes>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut byte_chunks = Box::pin(source);
        let mut buffer = CircularLineBuffer::with_capacity(4096);
        let mut assembler = FrameAssembler::new();

        while let Some(chunk_result) = byte_chunks.next().await {
            match chunk_result {
                Ok(bytes) => {
                    buffer.extend(&bytes);

                    while let Some(line) = buffer.next_line() {
                        if let Some(frame) = assembler.push_line(&line) {
                            yield Ok(frame);
                        }
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        if !buffer.is_empty() {
            tracing::warn!(
                pending_bytes = buffer.len(),
                "Source closed in the middle of a line"
            );
            yield Err(ChatStreamError::UncleanEnd);
        } else if assembler.has_pending() {
            tracing::debug!("Source closed before record terminator, dropping incomplete frame");
        }
    })
}
