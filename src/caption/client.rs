use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::debug;

use super::error::{CaptionError, Result};
use super::request::{GenerateRequest, GenerateResponse};

pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://127.0.0.1:11434";

pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Transport for the generate endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CaptionBackend: Send + Sync {
    /// One request, one JSON body.
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse>;

    /// Open a streaming request and hand back the raw body.
    async fn generate_stream(&self, request: &GenerateRequest) -> Result<ByteStream>;

    fn endpoint(&self) -> String;
}

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    generate_url: String,
}

impl OllamaClient {
    pub fn new(endpoint: &str) -> Result<Self> {
        Self::with_connect_timeout(endpoint, None)
    }

    /// Only the connect phase is bounded here; whole-request deadlines are
    /// applied by the dispatcher so they also cover streamed bodies.
    pub fn with_connect_timeout(endpoint: &str, connect_timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build()?;
        let base_url = endpoint.trim().trim_end_matches('/').to_string();
        let generate_url = format!("{}/api/generate", base_url);

        Ok(Self {
            client,
            base_url,
            generate_url,
        })
    }

    async fn send(&self, request: &GenerateRequest) -> Result<Response> {
        debug!(
            "POST {} (model: {}, stream: {})",
            self.generate_url, request.model, request.stream
        );

        let response = self
            .client
            .post(&self.generate_url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CaptionError::Provider {
                status: status.as_u16(),
                message: provider_message(&body),
            });
        }

        Ok(response)
    }

    fn map_transport_error(&self, e: reqwest::Error) -> CaptionError {
        if e.is_connect() {
            CaptionError::ConnectionRefused(self.base_url.clone())
        } else {
            CaptionError::Transport(e)
        }
    }
}

#[async_trait]
impl CaptionBackend for OllamaClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let response = self.send(request).await?;
        let body = response.text().await?;
        let parsed: GenerateResponse = serde_json::from_str(&body)?;
        Ok(parsed)
    }

    async fn generate_stream(&self, request: &GenerateRequest) -> Result<ByteStream> {
        let response = self.send(request).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(CaptionError::from))
            .boxed())
    }

    fn endpoint(&self) -> String {
        self.base_url.clone()
    }
}

/// Ollama reports failures as `{"error": "..."}`; fall back to the raw body.
fn provider_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
