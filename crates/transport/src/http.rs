//! HTTP transport for the RAG chat service.
//!
//! Talks to the OpenAI-compatible endpoints the service exposes:
//! - `POST /v1/chat/completions` (streamed as SSE)
//! - `POST /v1/feedback`
//! - `GET /v1/models`

use async_trait::async_trait;
use futures::StreamExt;
use ragstream_config::TransportConfig;
use ragstream_core::error::TransportError;
use ragstream_core::transport::{ByteStream, ChatRequest, ChatTransport, FeedbackRequest};
use serde::Deserialize;
use tracing::{debug, warn};

/// A reqwest-backed [`ChatTransport`].
pub struct HttpTransport {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport for the service at `base_url` (server root, without `/v1`).
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, TransportError> {
        Self::with_client(base_url, api_key, reqwest::Client::builder())
    }

    /// Build from the `[transport]` config section.
    pub fn from_config(config: &TransportConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(config.connect_timeout_secs));
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(std::time::Duration::from_secs(secs));
        }
        Self::with_client(&config.base_url, config.api_key.clone(), builder)
    }

    fn with_client(
        base_url: impl Into<String>,
        api_key: Option<String>,
        builder: reqwest::ClientBuilder,
    ) -> Result<Self, TransportError> {
        let client = builder
            .build()
            .map_err(|e| TransportError::Network(format!("Failed to create HTTP client: {e}")))?;

        let base_url = base_url.into();
        let base_url = base_url.trim_end_matches('/');
        let base_url = base_url.strip_suffix("/v1").unwrap_or(base_url).to_string();

        Ok(Self {
            name: "http".into(),
            base_url,
            api_key: api_key.filter(|k| !k.is_empty()),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {key}")),
            None => request,
        }
    }

    /// Turn a non-success response into a `Status` error carrying its body.
    async fn check_status(
        response: reqwest::Response,
        what: &str,
    ) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), body = %body, "{what} failed");
        Err(status_error(status.as_u16(), &body))
    }
}

/// Build a `Status` error, preferring the service's `detail` message.
fn status_error(status_code: u16, body: &str) -> TransportError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.detail)
        .map(|d| match d {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
        .unwrap_or_else(|| body.trim().to_string());
    TransportError::Status {
        status_code,
        message,
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open_stream(&self, request: ChatRequest) -> Result<ByteStream, TransportError> {
        let url = self.endpoint("chat/completions");
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Sending streaming chat request"
        );

        let response = self
            .authorize(self.client.post(&url))
            .header("Accept", "text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let response = Self::check_status(response, "Chat request").await?;

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::StreamInterrupted(e.to_string())));
        Ok(Box::pin(body))
    }

    async fn send_feedback(&self, feedback: FeedbackRequest) -> Result<(), TransportError> {
        let url = self.endpoint("feedback");
        debug!(message_id = %feedback.message_id, rating = ?feedback.rating, "Sending feedback");

        let response = self
            .authorize(self.client.post(&url))
            .json(&feedback)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Self::check_status(response, "Feedback").await?;
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<String>, TransportError> {
        let url = self.endpoint("models");
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let response = Self::check_status(response, "Model listing").await?;

        let body: ModelList = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        Ok(body.data.into_iter().map(|m| m.id).collect())
    }
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}
