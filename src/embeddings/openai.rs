use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::error::{RagsyncError, Result};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI's per-request input limit
const MAX_BATCH_SIZE: usize = 2048;

/// Request structure for OpenAI embeddings API
#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

/// Response structure from OpenAI embeddings API
#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

/// Individual embedding data in API response
#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// One failed request, and whether it is worth repeating
struct RequestFailure {
    error: RagsyncError,
    retryable: bool,
}

/// OpenAI embeddings client
///
/// Splits input into API-sized batches and retries rate-limit (429) and
/// server (5xx) errors with exponential backoff.
pub struct OpenAIEmbedder {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    dimensions: usize,
    batch_size: usize,
    max_retries: usize,
    initial_backoff: Duration,
}

impl OpenAIEmbedder {
    /// Create a new OpenAI embedder
    ///
    /// `batch_size` is capped at 2048. `dimensions` is sent to the API so
    /// that models supporting shortened embeddings return vectors of the
    /// collection's width.
    pub fn new(api_key: String, model: String, dimensions: usize, batch_size: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RagsyncError::Embedding(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            api_key,
            model,
            dimensions,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
        })
    }

    /// Point the client at a compatible API (proxy, Azure deployment, local server)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, max_retries: usize, initial_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_backoff = initial_backoff;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Single request with retry on 429/5xx
    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let start = std::time::Instant::now();
        let mut attempt = 0;
        let mut delay = self.initial_backoff;

        loop {
            match self.embed_batch_internal(texts).await {
                Ok(embeddings) => {
                    log::debug!(
                        "Embedding API call for {} texts took {:?} (attempt {})",
                        texts.len(),
                        start.elapsed(),
                        attempt + 1
                    );
                    return Ok(embeddings);
                }
                Err(failure) if failure.retryable && attempt < self.max_retries => {
                    log::warn!("Retry {}/{} after error: {}", attempt + 1, self.max_retries, failure.error);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(failure) => return Err(failure.error),
            }
        }
    }

    async fn embed_batch_internal(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, RequestFailure> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: (self.dimensions > 0).then_some(self.dimensions),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RequestFailure {
                retryable: e.is_timeout() || e.is_connect(),
                error: RagsyncError::Embedding(format!("Network error: {}", e)),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(RequestFailure {
                retryable: status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error(),
                error: RagsyncError::Embedding(format!("OpenAI API error {}: {}", status, body)),
            });
        }

        let result: EmbeddingResponse = response.json().await.map_err(|e| RequestFailure {
            retryable: false,
            error: RagsyncError::Embedding(format!("Failed to parse response: {}", e)),
        })?;

        order_embeddings(result.data, texts.len(), self.dimensions).map_err(|error| RequestFailure {
            retryable: false,
            error,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            all_embeddings.extend(self.embed_with_retry(batch).await?);

            // Rate limiting: small delay between full batches
            if batch.len() == self.batch_size && all_embeddings.len() < texts.len() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        Ok(all_embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimensions
    }
}

/// Restore input order and check that every vector has the expected width
fn order_embeddings(mut data: Vec<EmbeddingData>, expected: usize, dimensions: usize) -> Result<Vec<Vec<f32>>> {
    if data.len() != expected {
        return Err(RagsyncError::Embedding(format!(
            "Expected {} embeddings, API returned {}",
            expected,
            data.len()
        )));
    }
    data.sort_by_key(|d| d.index);

    data.into_iter()
        .map(|d| {
            if dimensions > 0 && d.embedding.len() != dimensions {
                Err(RagsyncError::Embedding(format!(
                    "Embedding has {} dimensions, expected {}",
                    d.embedding.len(),
                    dimensions
                )))
            } else {
                Ok(d.embedding)
            }
        })
        .collect()
}
