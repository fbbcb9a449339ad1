#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use sse_chat::{
    ByteStream, ChatChunk, ChatStreamClient, ChatStreamError, OutboundRequest, RequestBuilder,
    SessionOutcome, Transport,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc as tokio_mpsc;

pub type Feed = mpsc::UnboundedSender<sse_chat::Result<Bytes>>;

/// Transport whose response bodies are fed by the test, one source per `open`
#[derive(Default)]
pub struct ChannelTransport {
    sources: Mutex<VecDeque<mpsc::UnboundedReceiver<sse_chat::Result<Bytes>>>>,
    pub opened: Mutex<Vec<OutboundRequest>>,
}

impl ChannelTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a body for the next `open` and return its feed
    pub fn push_source(&self) -> Feed {
        let (tx, rx) = mpsc::unbounded();
        self.sources.lock().unwrap().push_back(rx);
        tx
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn open(&self, request: &OutboundRequest) -> sse_chat::Result<ByteStream> {
        self.opened.lock().unwrap().push(request.clone());
        let source = self
            .sources
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ChatStreamError::Stream("no source queued".to_string()))?;
        Ok(Box::pin(source))
    }
}

pub fn client_over(transport: Arc<ChannelTransport>) -> ChatStreamClient {
    ChatStreamClient::with_transport(transport, RequestBuilder::new("gpt-5-chat"))
}

pub fn send(feed: &Feed, text: &str) {
    feed.unbounded_send(Ok(Bytes::from(text.to_string())))
        .expect("source already released");
}

pub fn delta_frame(content: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"choices": [{"index": 0, "delta": {"content": content}}]})
    )
}

pub const DONE_FRAME: &str = "data: [DONE]\n\n";

#[derive(Debug, Clone)]
pub enum Event {
    Chunk(ChatChunk, String),
    Done(SessionOutcome),
}

/// Records callback invocations so tests can await them in order
pub struct Recorder {
    rx: tokio_mpsc::UnboundedReceiver<Event>,
}

impl Recorder {
    pub fn new() -> (
        Self,
        impl FnMut(&ChatChunk, &str) + Send + 'static,
        impl FnOnce(&SessionOutcome) + Send + 'static,
    ) {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let chunk_tx = tx.clone();
        let on_chunk = move |chunk: &ChatChunk, text: &str| {
            let _ = chunk_tx.send(Event::Chunk(chunk.clone(), text.to_string()));
        };
        let on_done = move |outcome: &SessionOutcome| {
            let _ = tx.send(Event::Done(outcome.clone()));
        };
        (Self { rx }, on_chunk, on_done)
    }

    pub async fn next(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("timed out waiting for callback")
            .expect("callbacks dropped without firing")
    }

    pub async fn next_chunk(&mut self) -> (ChatChunk, String) {
        match self.next().await {
            Event::Chunk(chunk, text) => (chunk, text),
            other => panic!("Expected chunk, got {:?}", other),
        }
    }

    pub async fn next_done(&mut self) -> SessionOutcome {
        match self.next().await {
            Event::Done(outcome) => outcome,
            other => panic!("Expected done, got {:?}", other),
        }
    }

    /// Everything recorded so far, without waiting
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Yield until the session task has dropped the body for `feed`
pub async fn wait_released(feed: &Feed) {
    for _ in 0..100 {
        if feed.is_closed() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("body was never released");
}
