use std::sync::Arc;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::request::{ChatOptions, OutboundRequest, RequestBuilder};
use crate::session::{SessionHandle, SessionOutcome};
use crate::transport::{HttpTransport, Transport};
use crate::types::{ChatChunk, ChatMessage};

/// Streaming chat client.
///
/// Owns at most one active session. Starting a new session stops the
/// previous one first, so two streams never feed callbacks at once.
/// Dropping the client stops its current session.
pub struct ChatStreamClient {
    transport: Arc<dyn Transport>,
    request_builder: RequestBuilder,
    current: Option<SessionHandle>,
}

impl ChatStreamClient {
    /// Create a client that talks HTTP to `config.endpoint`
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(
            Arc::new(transport),
            RequestBuilder::new(config.model),
        ))
    }

    /// Create a client over any transport (in-memory sources, proxies, tests)
    pub fn with_transport(transport: Arc<dyn Transport>, request_builder: RequestBuilder) -> Self {
        Self {
            transport,
            request_builder,
            current: None,
        }
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        let builder = std::mem::take(&mut self.request_builder);
        self.request_builder = builder.with_options(options);
        self
    }

    /// Validate `history` and build the request body for it
    pub fn build_request(&self, history: &[ChatMessage]) -> Result<OutboundRequest> {
        self.request_builder.build(history)
    }

    /// Start streaming the reply to `request`.
    ///
    /// `on_chunk` receives every decoded chunk except the done marker, along
    /// with the accumulated text including that chunk. `on_done` fires exactly
    /// once when the session completes, is stopped, or fails.
    pub fn start<C, D>(&mut self, request: OutboundRequest, on_chunk: C, on_done: D) -> SessionHandle
    where
        C: FnMut(&ChatChunk, &str) + Send + 'static,
        D: FnOnce(&SessionOutcome) + Send + 'static,
    {
        if let Some(previous) = self.current.take() {
            if previous.is_active() {
                tracing::debug!(id = %previous.id(), "Stopping previous session before starting a new one");
            }
            previous.stop();
        }

        let handle = SessionHandle::spawn(
            Arc::clone(&self.transport),
            request,
            Box::new(on_chunk),
            Box::new(on_done),
        );
        self.current = Some(handle.clone());
        handle
    }

    /// Build the request for `history` and start streaming its reply
    pub fn send<C, D>(&mut self, history: &[ChatMessage], on_chunk: C, on_done: D) -> Result<SessionHandle>
    where
        C: FnMut(&ChatChunk, &str) + Send + 'static,
        D: FnOnce(&SessionOutcome) + Send + 'static,
    {
        let request = self.build_request(history)?;
        Ok(self.start(request, on_chunk, on_done))
    }

    /// Stop the current session, if any. Idempotent.
    pub fn stop(&mut self) {
        if let Some(current) = &self.current {
            current.stop();
        }
    }

    /// The most recently started session
    pub fn current(&self) -> Option<&SessionHandle> {
        self.current.as_ref()
    }

    pub fn is_streaming(&self) -> bool {
        self.current.as_ref().is_some_and(SessionHandle::is_active)
    }
}

impl Drop for ChatStreamClient {
    fn drop(&mut self) {
        self.stop();
    }
}
