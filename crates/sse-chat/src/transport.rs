use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use std::pin::Pin;
use std::time::Duration;

use crate::config::{ClientConfig, RetryConfig};
use crate::error::{ChatStreamError, Result};
use crate::request::OutboundRequest;

/// Raw response body, delivered as it arrives
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Opens the byte stream a session reads its reply from.
///
/// Dropping the returned stream must release the underlying connection.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, request: &OutboundRequest) -> Result<ByteStream>;
}

/// POSTs the request as JSON and streams back the response body
pub struct HttpTransport {
    http_client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    retry: RetryConfig,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        if let Some(api_key) = &config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|_| ChatStreamError::Config("Invalid API key format".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            timeout: config.timeout(),
            retry: config.retry.clone(),
        })
    }

    async fn send_once(&self, request: &OutboundRequest) -> Result<reqwest::Response> {
        let pending = self.http_client.post(&self.endpoint).json(request).send();

        let response = tokio::time::timeout(self.timeout, pending)
            .await
            .map_err(|_| {
                ChatStreamError::Timeout(format!("no response headers within {:?}", self.timeout))
            })??;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            // A stalled error body must not hold up the retry loop
            let body = match tokio::time::timeout(self.timeout, response.text()).await {
                Ok(text) => text.unwrap_or_default(),
                Err(_) => {
                    tracing::debug!(status, "Error body not received in time, dropping it");
                    String::new()
                }
            };
            return Err(ChatStreamError::Http { status, body });
        }

        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, request: &OutboundRequest) -> Result<ByteStream> {
        let mut attempt = 1;
        loop {
            match self.send_once(request).await {
                Ok(response) => {
                    tracing::debug!(attempt, status = %response.status(), "Stream opened");
                    return Ok(idle_timeout(response.bytes_stream(), self.timeout));
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(attempt, ?delay, error = %e, "Opening stream failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Opening stream failed");
                    return Err(e);
                }
            }
        }
    }
}

/// Bound the wait for each body read; a stall ends the stream with a timeout error
fn idle_timeout<S>(body: S, timeout: Duration) -> ByteStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut body = Box::pin(body);
        loop {
            match tokio::time::timeout(timeout, body.next()).await {
                Ok(Some(Ok(bytes))) => yield Ok(bytes),
                Ok(Some(Err(e))) => {
                    yield Err(ChatStreamError::Transport(e));
                    return;
                }
                Ok(None) => return,
                Err(_) => {
                    yield Err(ChatStreamError::Timeout(format!("no data within {:?}", timeout)));
                    return;
                }
            }
        }
    })
}
