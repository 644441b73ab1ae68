//! HTTP transport to the device
//!
//! The device exposes a liveness path and a data path:
//!
//! - `GET /hello` → `200` while the app is serving
//! - `GET /measurement` → one measurement per request (poll mode)
//! - `GET /measurementStream` → one measurement per line, until the device
//!   goes to the background (stream mode)
//!
//! A measurement body is either a JSON envelope `{"poclo": "<tuples>"}` or
//! the raw tuple string; a body starting with `{` is treated as an envelope.
//!
//! The [`Transport`] trait is the seam the acquisition loop drives, so tests
//! can script a device without sockets. [`HttpTransport`] owns the open
//! stream (if any) exclusively; on any read failure the stream is dropped,
//! which closes the connection, and the next fetch reopens it.

use crate::config::{AcquisitionMode, EndpointConfig};
use crate::error::ConnError;
use async_trait::async_trait;
use serde::Deserialize;

/// Upper bound on one buffered stream line.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Undecoded point-tuple text from one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload(pub String);

impl RawPayload {
    /// Payload text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Connection to one device.
///
/// Implementations must leave the connection in a defined state when a call
/// fails or its future is dropped (timeout, cancellation): either still
/// usable, or torn down so the next call reconnects.
#[async_trait]
pub trait Transport: Send {
    /// Lightweight liveness check against the health path.
    async fn probe(&mut self) -> Result<(), ConnError>;

    /// Fetch one measurement payload.
    async fn fetch_one(&mut self) -> Result<RawPayload, ConnError>;

    /// Re-establish the connection after a failure.
    async fn reconnect(&mut self) -> Result<(), ConnError>;

    /// Drop any open connection state without I/O.
    fn reset(&mut self);

    /// Release the connection for good.
    async fn close(&mut self) -> Result<(), ConnError>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    poclo: String,
}

/// Unwrap a `{"poclo": ...}` envelope, or pass raw tuple text through.
pub fn unwrap_envelope(body: &str) -> Result<RawPayload, ConnError> {
    let trimmed = body.trim();
    if trimmed.starts_with('{') {
        let envelope: Envelope = serde_json::from_str(trimmed)
            .map_err(|e| ConnError::Protocol(format!("invalid measurement envelope: {}", e)))?;
        Ok(RawPayload(envelope.poclo))
    } else {
        Ok(RawPayload(trimmed.to_string()))
    }
}

// =============================================================================
// HttpTransport
// =============================================================================

/// Open streaming response plus the bytes read past the last newline.
struct LineStream {
    response: reqwest::Response,
    buffer: Vec<u8>,
}

impl LineStream {
    fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            buffer: Vec::new(),
        }
    }

    /// Next non-blank line, without its terminator.
    async fn next_line(&mut self, url: &str) -> Result<String, ConnError> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line[..pos]);
                let text = text.trim_end_matches('\r');
                if text.trim().is_empty() {
                    continue;
                }
                return Ok(text.to_string());
            }

            if self.buffer.len() > MAX_LINE_BYTES {
                return Err(ConnError::Protocol(format!(
                    "stream line exceeds {} bytes",
                    MAX_LINE_BYTES
                )));
            }

            match self.response.chunk().await {
                Ok(Some(bytes)) => self.buffer.extend_from_slice(&bytes),
                Ok(None) => return Err(ConnError::Disconnected),
                Err(e) => return Err(ConnError::unreachable(url, &e)),
            }
        }
    }
}

/// reqwest-backed transport for poll and stream modes.
pub struct HttpTransport {
    config: EndpointConfig,
    client: reqwest::Client,
    stream: Option<LineStream>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.config.endpoint())
            .field("mode", &self.config.mode)
            .field("stream_open", &self.stream.is_some())
            .finish()
    }
}

impl HttpTransport {
    /// Build a transport; no I/O happens until the first call.
    pub fn new(config: EndpointConfig) -> Result<Self, ConnError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.read_timeout())
            .no_proxy()
            .build()
            .map_err(|e| ConnError::unreachable(&config.health_url(), &e))?;

        Ok(Self {
            config,
            client,
            stream: None,
        })
    }

    /// Endpoint this transport talks to.
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// True while a streaming response is held open.
    pub fn is_stream_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn get(&self, url: &str, bounded: bool) -> Result<reqwest::Response, ConnError> {
        let mut request = self.client.get(url);
        if bounded {
            request = request.timeout(self.config.read_timeout());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ConnError::unreachable(url, &e))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ConnError::BadStatus(status.as_u16()));
        }
        Ok(response)
    }

    async fn open_stream(&self) -> Result<LineStream, ConnError> {
        let url = self.config.data_url();
        // no request timeout: it would cover the whole, endless body
        let response = self.get(&url, false).await?;
        tracing::debug!(url = %url, "measurement stream opened");
        Ok(LineStream::new(response))
    }

    async fn fetch_polled(&self) -> Result<RawPayload, ConnError> {
        let url = self.config.data_url();
        let body = self
            .get(&url, true)
            .await?
            .text()
            .await
            .map_err(|e| ConnError::unreachable(&url, &e))?;
        unwrap_envelope(&body)
    }

    async fn fetch_streamed(&mut self) -> Result<RawPayload, ConnError> {
        if self.stream.is_none() {
            self.stream = Some(self.open_stream().await?);
        }

        let url = self.config.data_url();
        let result = match self.stream.as_mut() {
            Some(stream) => stream.next_line(&url).await,
            None => Err(ConnError::Disconnected),
        };

        match result {
            Ok(line) => unwrap_envelope(&line),
            Err(e) => {
                // close now; next fetch reopens
                self.stream = None;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn probe(&mut self) -> Result<(), ConnError> {
        let url = self.config.health_url();
        self.get(&url, true).await?;
        tracing::trace!(url = %url, "probe ok");
        Ok(())
    }

    async fn fetch_one(&mut self) -> Result<RawPayload, ConnError> {
        match self.config.mode {
            AcquisitionMode::Poll => self.fetch_polled().await,
            AcquisitionMode::Stream => self.fetch_streamed().await,
        }
    }

    async fn reconnect(&mut self) -> Result<(), ConnError> {
        self.stream = None;
        self.probe().await?;
        if self.config.mode == AcquisitionMode::Stream {
            self.stream = Some(self.open_stream().await?);
        }
        Ok(())
    }

    fn reset(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!(endpoint = %self.config.endpoint(), "measurement stream dropped");
        }
    }

    async fn close(&mut self) -> Result<(), ConnError> {
        self.reset();
        Ok(())
    }
}
