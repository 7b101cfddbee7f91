//! Shared pipeline context
//!
//! The stores, the embedding client, the document opener, and the
//! optional external partitioner are injected once at driver construction
//! and shared by every worker. Nothing here is a process-wide singleton.

use crate::config::IngestConfig;
use crate::dictionary::{create_dictionary_store, DictionaryStore, LlmDictionarySeeder};
use crate::embedding::EmbeddingClient;
use crate::error::Result;
use crate::partition::Partitioner;
use crate::pdf::{DocumentOpener, LopdfOpener};
use crate::vector_store::{create_vector_store, VectorStore};
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a pass needs to run
pub struct PipelineContext {
    pub config: IngestConfig,
    pub vector_store: Arc<dyn VectorStore>,
    pub dictionary: Arc<dyn DictionaryStore>,
    pub embedder: Arc<EmbeddingClient>,
    pub opener: Arc<dyn DocumentOpener>,
    /// External layout-aware extractor; Pass C falls back to the text
    /// layer when absent
    pub partitioner: Option<Arc<dyn Partitioner>>,
    /// Optional LLM seeder used by forced dictionary initialisation
    pub seeder: Option<Arc<LlmDictionarySeeder>>,
}

impl PipelineContext {
    /// Wire the default production collaborators from configuration
    pub async fn from_config(config: IngestConfig) -> Result<Self> {
        let vector_store = create_vector_store(&config).await?;
        let dictionary = create_dictionary_store(&config)?;
        let embedder = Arc::new(EmbeddingClient::new(config.embedding.clone())?);
        let seeder = match &config.embedding.api_key {
            Some(api_key) => Some(Arc::new(LlmDictionarySeeder::new(
                "https://api.openai.com/v1/chat/completions".to_string(),
                api_key.clone(),
                "gpt-4o-mini".to_string(),
            )?)),
            None => None,
        };

        Ok(Self {
            config,
            vector_store,
            dictionary,
            embedder,
            opener: Arc::new(LopdfOpener),
            partitioner: None,
            seeder,
        })
    }

    /// Working directory for one job
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.config.env_artifacts_dir().join(job_id)
    }
}
