//! One in-flight reply stream.
//!
//! A session owns its transport connection from `start` until it reaches a
//! terminal state:
//!
//! ```text
//! Idle -> Active -> Completed   sentinel received
//!                -> Cancelled   stop() called
//!                -> Failed      transport ended or errored before the sentinel
//! ```
//!
//! `on_done` fires exactly once per session, whichever terminal state is
//! reached, and `on_chunk` never fires after it.

use futures::StreamExt;
use std::ops::ControlFlow;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::buffer_utils::read_frames;
use crate::error::ChatStreamError;
use crate::request::OutboundRequest;
use crate::streaming::decode;
use crate::transport::Transport;
use crate::types::ChatChunk;

/// Invoked for each delivered chunk with the accumulated text so far
pub type ChunkCallback = Box<dyn FnMut(&ChatChunk, &str) + Send>;

/// Invoked once when the session ends
pub type DoneCallback = Box<dyn FnOnce(&SessionOutcome) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Why a session ended in [`SessionState::Failed`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The stream could not be opened
    Open(String),
    /// Reading the response body failed
    Read(String),
    /// The body closed partway through a line
    UncleanEnd,
    /// The body closed cleanly without sending the sentinel
    Truncated,
    /// `on_chunk` panicked; nothing further is delivered
    CallbackPanicked,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open(e) => write!(f, "failed to open stream: {}", e),
            Self::Read(e) => write!(f, "failed to read stream: {}", e),
            Self::UncleanEnd => write!(f, "stream ended in the middle of a line"),
            Self::Truncated => write!(f, "stream ended before the done marker"),
            Self::CallbackPanicked => write!(f, "chunk callback panicked"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    Completed,
    Cancelled,
    Failed(FailureReason),
}

impl SessionEnd {
    pub fn state(&self) -> SessionState {
        match self {
            Self::Completed => SessionState::Completed,
            Self::Cancelled => SessionState::Cancelled,
            Self::Failed(_) => SessionState::Failed,
        }
    }
}

/// Handed to `on_done`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub id: Uuid,
    pub end: SessionEnd,
    /// Everything appended before the session ended
    pub text: String,
}

struct Callbacks {
    on_chunk: ChunkCallback,
    on_done: Option<DoneCallback>,
}

struct Shared {
    id: Uuid,
    token: CancellationToken,
    state: watch::Sender<SessionState>,
    text: Mutex<String>,
    outcome: Mutex<Option<SessionOutcome>>,
    // Held for as long as a callback runs; every state transition happens under it.
    callbacks: Mutex<Callbacks>,
    // Thread currently running a callback, so a stop() from inside a callback
    // does not wait on the lock its own caller holds.
    in_callback: Mutex<Option<ThreadId>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn called_from_callback(&self) -> bool {
        *lock(&self.in_callback) == Some(std::thread::current().id())
    }

    /// Run a caller-supplied callback, catching a panic
    fn with_callback_marker<R>(&self, f: impl FnOnce() -> R) -> std::thread::Result<R> {
        *lock(&self.in_callback) = Some(std::thread::current().id());
        let result = catch_unwind(AssertUnwindSafe(f));
        *lock(&self.in_callback) = None;
        result
    }

    /// Append a chunk and hand it to `on_chunk`, unless the session has
    /// already been stopped. Breaks with the end the session should take.
    fn deliver(&self, chunk: ChatChunk) -> ControlFlow<SessionEnd> {
        let mut callbacks = lock(&self.callbacks);

        if self.token.is_cancelled() || self.state() != SessionState::Active {
            tracing::debug!("Dropping chunk that arrived after stop");
            return ControlFlow::Break(SessionEnd::Cancelled);
        }

        let text = {
            let mut text = lock(&self.text);
            if let Some(rendered) = chunk.rendered_text() {
                text.push_str(&rendered);
            }
            text.clone()
        };

        if let ChatChunk::Error { status, message } = &chunk {
            tracing::warn!(status, message = %message, "Error chunk in stream");
        }

        if self
            .with_callback_marker(|| (callbacks.on_chunk)(&chunk, &text))
            .is_err()
        {
            tracing::error!("Chunk callback panicked, failing session");
            return ControlFlow::Break(SessionEnd::Failed(FailureReason::CallbackPanicked));
        }
        ControlFlow::Continue(())
    }

    /// Move from Active to the terminal state for `end` and fire `on_done`.
    /// Does nothing if the session already ended.
    fn finish(&self, end: SessionEnd) {
        let mut callbacks = lock(&self.callbacks);

        if self.state() != SessionState::Active {
            return;
        }

        let outcome = SessionOutcome {
            id: self.id,
            end: end.clone(),
            text: lock(&self.text).clone(),
        };
        *lock(&self.outcome) = Some(outcome.clone());
        self.state.send_replace(end.state());
        self.token.cancel();

        let chars = outcome.text.chars().count();
        match &end {
            SessionEnd::Failed(reason) => {
                tracing::warn!(reason = %reason, chars, "Session failed");
            }
            _ => {
                tracing::info!(state = ?end.state(), chars, "Session ended");
            }
        }

        if let Some(on_done) = callbacks.on_done.take() {
            if self.with_callback_marker(|| on_done(&outcome)).is_err() {
                tracing::error!("Done callback panicked");
            }
        }
    }
}

/// Handle to one session. Clones refer to the same session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionHandle {
    fn new(on_chunk: ChunkCallback, on_done: DoneCallback) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            shared: Arc::new(Shared {
                id: Uuid::new_v4(),
                token: CancellationToken::new(),
                state,
                text: Mutex::new(String::new()),
                outcome: Mutex::new(None),
                callbacks: Mutex::new(Callbacks {
                    on_chunk,
                    on_done: Some(on_done),
                }),
                in_callback: Mutex::new(None),
            }),
        }
    }

    /// Open `request` on `transport` and stream the reply on a new tokio task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        request: OutboundRequest,
        on_chunk: ChunkCallback,
        on_done: DoneCallback,
    ) -> Self {
        let handle = Self::new(on_chunk, on_done);
        handle.shared.state.send_replace(SessionState::Active);

        let shared = Arc::clone(&handle.shared);
        let span = tracing::info_span!("chat_session", id = %shared.id, model = %request.model);
        tokio::spawn(
            async move {
                tracing::debug!(messages = request.messages.len(), "Session started");
                let end = tokio::select! {
                    biased;
                    _ = shared.token.cancelled() => SessionEnd::Cancelled,
                    end = drive(&shared, transport.as_ref(), &request) => end,
                };
                // A stop() issued from inside a callback only cancels the token.
                let end = if shared.token.is_cancelled() {
                    SessionEnd::Cancelled
                } else {
                    end
                };
                shared.finish(end);
            }
            .instrument(span),
        );

        handle
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Text appended so far: delta and message content plus error annotations
    pub fn accumulated_text(&self) -> String {
        lock(&self.shared.text).clone()
    }

    /// Final outcome, once the session has ended
    pub fn outcome(&self) -> Option<SessionOutcome> {
        lock(&self.shared.outcome).clone()
    }

    /// Cancel the session and release its connection.
    ///
    /// No-op unless the session is active. Once this returns no further chunk
    /// is delivered. When called from inside one of this session's own
    /// callbacks, `on_done` fires as soon as that callback returns.
    pub fn stop(&self) {
        if !self.is_active() {
            return;
        }

        self.shared.token.cancel();

        if self.shared.called_from_callback() {
            tracing::debug!(id = %self.shared.id, "Stop requested from a callback");
            return;
        }

        self.shared.finish(SessionEnd::Cancelled);
    }

    /// Wait until the session reaches a terminal state and `on_done` has returned
    pub async fn wait(&self) -> SessionState {
        let mut rx = self.shared.state.subscribe();
        // The sender lives in `shared`, which this handle keeps alive.
        let _ = rx.wait_for(SessionState::is_terminal).await;
        // finish() holds the callback lock until on_done returns
        drop(lock(&self.shared.callbacks));
        self.state()
    }
}

async fn drive(shared: &Shared, transport: &dyn Transport, request: &OutboundRequest) -> SessionEnd {
    let body = match transport.open(request).await {
        Ok(body) => body,
        Err(e) => return SessionEnd::Failed(FailureReason::Open(e.to_string())),
    };

    let mut frames = read_frames(body);
    let mut delivered = 0usize;

    while let Some(frame) = frames.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(ChatStreamError::UncleanEnd) => {
                return SessionEnd::Failed(FailureReason::UncleanEnd);
            }
            Err(e) => return SessionEnd::Failed(FailureReason::Read(e.to_string())),
        };

        let chunk = decode(&frame);
        if chunk.is_sentinel() {
            tracing::debug!(delivered, "Done marker received");
            return SessionEnd::Completed;
        }

        if let ControlFlow::Break(end) = shared.deliver(chunk) {
            return end;
        }
        delivered += 1;
    }

    SessionEnd::Failed(FailureReason::Truncated)
}
