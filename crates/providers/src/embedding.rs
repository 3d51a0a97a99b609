//! Embedding client for OpenAI-compatible `/v1/embeddings` endpoints.

use std::time::Duration;

use async_trait::async_trait;
use mentis_config::EmbeddingConfig;
use mentis_core::provider::{Embedder, EmbeddingKind};
use mentis_core::{Error, Result};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

const RETRY_PAUSE: Duration = Duration::from_millis(500);

/// An embeddings client bound to one named embedding configuration.
pub struct EmbeddingClient {
    name: String,
    config: EmbeddingConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    pub fn new(name: impl Into<String>, config: EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Fatal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            name: name.into(),
            config,
            client,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.endpoint
        );
        let body = json!({
            "model": self.config.model,
            "input": text,
            "encoding_format": "float",
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("Failed to send request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!(
                "Request failed: status={status}, body={body_text}"
            )));
        }

        let parsed: EmbeddingApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("Failed to parse response: {e}")))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::Upstream("Empty embedding response".into()))
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    /// Embed `text`. `kind` is informational for the in-tree provider.
    async fn embed(&self, text: &str, _kind: EmbeddingKind) -> Result<Vec<f32>> {
        for attempt in 0..=self.config.max_retries {
            match self.request(text).await {
                Ok(embedding) => return Ok(embedding),
                Err(e) => warn!(model = %self.config.model, error = %e, "Embedding request failed"),
            }
            if attempt < self.config.max_retries {
                tokio::time::sleep(RETRY_PAUSE).await;
                debug!("Retrying {}/{}", attempt + 1, self.config.max_retries);
            }
        }
        Err(Error::Upstream(format!(
            "Failed to get embedding from: {} {}",
            self.config.base_url, self.config.model
        )))
    }

    fn dims(&self) -> usize {
        self.config.embedding_dims
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_embedding_response() {
        let body = r#"{
            "data": [
                {"embedding": [0.1, 0.2, 0.3], "index": 0}
            ],
            "model": "nomic-embed-text-v1.5.f16.gguf",
            "usage": {"prompt_tokens": 4, "total_tokens": 4}
        }"#;
        let parsed: EmbeddingApiResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data.len(), 1);
        assert_eq!(parsed.data[0].embedding, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn dims_come_from_config() {
        let client = EmbeddingClient::new(
            "test",
            EmbeddingConfig {
                embedding_dims: 32,
                ..EmbeddingConfig::default()
            },
        )
        .unwrap();
        assert_eq!(client.dims(), 32);
    }
}
