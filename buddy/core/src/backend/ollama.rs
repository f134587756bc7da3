//! Ollama Generator
//!
//! Generator backed by an Ollama server's `/api/generate` endpoint.
//! Streaming mode reads newline-delimited JSON and forwards each `response`
//! field as a fragment; single-shot mode posts with `"stream": false` and
//! emits one `Complete`.
//!
//! The client only bounds connection setup. A streamed body may run as long
//! as fragments keep arriving (the registry's idle sweep catches a stalled
//! one); a single-shot request is capped by the request timeout.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::traits::{DeliveryMode, GenerationRequest, Generator, ProducerEvent, ProducerFault};
use crate::config::BackendSettings;

/// Upper bound on establishing a connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Ollama generator client
#[derive(Clone)]
pub struct OllamaGenerator {
    /// `http://host:port`
    base_url: String,
    /// Model used when a request does not name one
    default_model: String,
    /// Declared delivery mode
    mode: DeliveryMode,
    /// Capacity of the event channel handed to sessions
    channel_capacity: usize,
    /// Cap on a whole single-shot request
    request_timeout: Duration,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaGenerator {
    /// Create a streaming generator for `host:port`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(host: impl Into<String>, port: u16) -> anyhow::Result<Self> {
        Self::with_timeout(host, port, Duration::from_secs(120))
    }

    /// Create a streaming generator with a custom request timeout
    ///
    /// `timeout` caps single-shot requests and, up to ten seconds, connection
    /// setup. Streamed responses are not cut off by it.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_timeout(
        host: impl Into<String>,
        port: u16,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(timeout.min(CONNECT_TIMEOUT))
            .build()?;
        Ok(Self {
            base_url: format!("http://{}:{port}", host.into()),
            default_model: "llama3.2".to_string(),
            mode: DeliveryMode::Streaming,
            channel_capacity: 100,
            request_timeout: timeout,
            http_client,
        })
    }

    /// Create from backend settings
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_settings(settings: &BackendSettings) -> anyhow::Result<Self> {
        Ok(
            Self::with_timeout(&settings.host, settings.port, settings.request_timeout)?
                .with_default_model(&settings.chat_model)
                .with_channel_capacity(settings.channel_capacity),
        )
    }

    /// Set the fallback model
    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Set the delivery mode
    #[must_use]
    pub fn with_delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the event channel capacity (minimum 1)
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }

    fn request_body(&self, request: &GenerationRequest, stream: bool) -> serde_json::Value {
        let model = if request.model.is_empty() {
            &self.default_model
        } else {
            &request.model
        };
        let mut body = serde_json::json!({
            "model": model,
            "prompt": request.prompt_with_context(),
            "stream": stream,
            "options": { "temperature": request.temperature },
        });
        if let Some(ref system) = request.system {
            body["system"] = serde_json::json!(system);
        }
        body
    }

    async fn post(
        &self,
        request: &GenerationRequest,
        stream: bool,
    ) -> anyhow::Result<reqwest::Response> {
        let mut builder = self
            .http_client
            .post(self.generate_url())
            .json(&self.request_body(request, stream));
        if !stream {
            builder = builder.timeout(self.request_timeout);
        }
        let response = builder.send().await.map_err(transport_fault)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(fault_for_status(status, &body).into());
        }
        Ok(response)
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn name(&self) -> &str {
        "Ollama"
    }

    fn delivery_mode(&self) -> DeliveryMode {
        self.mode
    }

    fn max_silence(&self) -> Option<Duration> {
        match self.mode {
            DeliveryMode::SingleShot => Some(self.request_timeout),
            DeliveryMode::Streaming => None,
        }
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok()
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> anyhow::Result<mpsc::Receiver<ProducerEvent>> {
        match self.mode {
            DeliveryMode::SingleShot => {
                let response = self.post(request, false).await?;
                let chunk: OllamaChunk = response.json().await.map_err(transport_fault)?;

                let (tx, rx) = mpsc::channel(1);
                let event = match chunk.error {
                    Some(error) => ProducerEvent::Error(ProducerFault::Other(error)),
                    None => ProducerEvent::Complete(chunk.response),
                };
                // rx is still held here, so the send cannot fail
                let _ = tx.send(event).await;
                Ok(rx)
            }
            DeliveryMode::Streaming => {
                let response = self.post(request, true).await?;
                let (tx, rx) = mpsc::channel(self.channel_capacity);
                let mut stream = response.bytes_stream();

                tokio::spawn(async move {
                    let mut decoder = NdjsonDecoder::default();
                    let mut produced = false;

                    while let Some(chunk) = stream.next().await {
                        let bytes = match chunk {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                let _ = tx.send(ProducerEvent::Error(transport_fault(e))).await;
                                return;
                            }
                        };
                        for line in decoder.push(&bytes) {
                            if !forward(&tx, line, &mut produced).await {
                                return;
                            }
                        }
                    }

                    if let Some(line) = decoder.finish() {
                        if !forward(&tx, line, &mut produced).await {
                            return;
                        }
                    }

                    // Body ended without a done marker
                    let last = if produced {
                        ProducerEvent::End
                    } else {
                        ProducerEvent::Error(ProducerFault::Malformed(
                            "stream ended without output".to_string(),
                        ))
                    };
                    let _ = tx.send(last).await;
                });

                Ok(rx)
            }
        }
    }
}

/// One line of Ollama's generate output
#[derive(Debug, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Forward one decoded line; returns `false` when the stream should stop
async fn forward(
    tx: &mpsc::Sender<ProducerEvent>,
    line: Result<OllamaChunk, serde_json::Error>,
    produced: &mut bool,
) -> bool {
    let chunk = match line {
        Ok(chunk) => chunk,
        Err(e) => {
            let _ = tx
                .send(ProducerEvent::Error(ProducerFault::Malformed(e.to_string())))
                .await;
            return false;
        }
    };

    if let Some(error) = chunk.error {
        let _ = tx.send(ProducerEvent::Error(ProducerFault::Other(error))).await;
        return false;
    }

    if !chunk.response.is_empty() {
        *produced = true;
        if tx.send(ProducerEvent::Fragment(chunk.response)).await.is_err() {
            // Receiver dropped: the session was cancelled or closed
            return false;
        }
    }

    if chunk.done {
        let _ = tx.send(ProducerEvent::End).await;
        return false;
    }
    true
}

fn transport_fault(error: reqwest::Error) -> ProducerFault {
    if error.is_decode() {
        ProducerFault::Malformed(error.to_string())
    } else {
        ProducerFault::Network(error.to_string())
    }
}

/// Map a non-success HTTP status to a fault
fn fault_for_status(status: StatusCode, body: &str) -> ProducerFault {
    let detail = format!("Ollama returned {status}: {body}");
    if status == StatusCode::TOO_MANY_REQUESTS {
        ProducerFault::Quota(detail)
    } else if status.is_server_error() {
        ProducerFault::Network(detail)
    } else {
        ProducerFault::Other(detail)
    }
}

/// Splits a byte stream into JSON lines
///
/// Works on bytes rather than text so a multi-byte character split across
/// network chunks is reassembled before decoding.
#[derive(Debug, Default)]
struct NdjsonDecoder {
    pending: Vec<u8>,
}

impl NdjsonDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<Result<OllamaChunk, serde_json::Error>> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(decoded) = decode_line(&line) {
                lines.push(decoded);
            }
        }
        lines
    }

    fn finish(&mut self) -> Option<Result<OllamaChunk, serde_json::Error>> {
        let rest = std::mem::take(&mut self.pending);
        decode_line(&rest)
    }
}

fn decode_line(line: &[u8]) -> Option<Result<OllamaChunk, serde_json::Error>> {
    let start = line.iter().position(|b| !b.is_ascii_whitespace())?;
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |last| last + 1);
    Some(serde_json::from_slice(&line[start..end]))
}
