//! Embedding client and dimension management
//!
//! Embeddings come from an external HTTP service with an OpenAI-shaped
//! response (`{"data": [{"embedding": [...]}]}`). A missing API key or a
//! failed request degrades to a zero vector of the configured dimension
//! so a pass never dies on the network.

use crate::config::{DimensionReduction, EmbeddingConfig};
use crate::error::{IngestError, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Dimension every storage backend is provisioned for
pub const REQUIRED_DIM: usize = 1024;

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// HTTP client for the embedding service
pub struct EmbeddingClient {
    http: reqwest::Client,
    config: EmbeddingConfig,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    /// Stored dimension after reduction
    pub fn dimension(&self) -> usize {
        self.config.model_dim
    }

    pub fn model_name(&self) -> &str {
        &self.config.model
    }

    /// Embed text, substituting a zero vector when no key is configured
    /// or the request fails
    pub async fn embed_or_zero(&self, text: &str) -> Vec<f32> {
        match self.request_embedding(text).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("failed to get embedding: {}", e);
                vec![0.0; self.config.model_dim]
            }
        }
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| IngestError::Embedding("no API key configured".to_string()))?;

        let truncated: String = text.chars().take(self.config.max_input_chars).collect();
        let payload = serde_json::json!({
            "input": truncated,
            "model": &self.config.model,
        });

        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        let body: EmbeddingResponse = response.json().await?;
        let embedding = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| IngestError::Embedding("empty embedding response".to_string()))?;

        if embedding.len() > self.config.model_dim {
            debug!(
                "reducing embedding dimensions from {} to {}",
                embedding.len(),
                self.config.model_dim
            );
            return Ok(reduce_dimensions(
                embedding,
                self.config.model_dim,
                self.config.reduction,
            ));
        }
        Ok(embedding)
    }
}

/// Reduce an embedding to the target dimension
///
/// PCA over a single vector carries no more information than its leading
/// components, so the pca method applies truncation and says so.
pub fn reduce_dimensions(
    embedding: Vec<f32>,
    target_dim: usize,
    method: DimensionReduction,
) -> Vec<f32> {
    if method == DimensionReduction::Off || embedding.len() <= target_dim {
        return embedding;
    }

    match method {
        DimensionReduction::Truncate => embedding.into_iter().take(target_dim).collect(),
        DimensionReduction::Pca1024 => {
            debug!("single-vector PCA degenerates to truncation; truncating to {target_dim}");
            embedding.into_iter().take(target_dim).collect()
        }
        DimensionReduction::Off => embedding,
    }
}

/// Validate that the configured dimension matches what the storage
/// backends are provisioned for
pub fn preflight_embeddings(config: &EmbeddingConfig) -> Result<()> {
    info!(
        "vector preflight check: model_dim={}, reduction={:?}",
        config.model_dim, config.reduction
    );

    if config.model_dim != REQUIRED_DIM {
        let message = format!(
            "Vector dimension mismatch: {} (model) != {} (required). \
             Set MODEL_DIM={} or update embedding configuration.",
            config.model_dim, REQUIRED_DIM, REQUIRED_DIM
        );
        error!("{}", message);
        if config.abort_on_incompatible {
            return Err(IngestError::Config(message));
        }
        warn!("continuing despite incompatible vector configuration");
    } else {
        info!(
            "vector dimension preflight passed: {} == {}",
            config.model_dim, REQUIRED_DIM
        );
    }
    Ok(())
}
