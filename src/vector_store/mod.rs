//! Vector-store abstraction
//!
//! Every backend exposes the same narrow interface over chunk documents.
//! Upserts replace by `chunk_id`; chunk IDs embed the producing job's ID
//! so jobs never contend on writes. Content is split before it reaches a
//! backend so no stored document exceeds the byte guardrail.

mod astra;
mod memory;
mod wide_column;

pub use astra::AstraVectorStore;
pub use memory::MemoryVectorStore;
pub use wide_column::WideColumnVectorStore;

use crate::artifacts::epoch_seconds;
use crate::config::{IngestConfig, VectorBackend};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Stored byte ceiling for one document's content
pub const UPSERT_MAX_BYTES: usize = 7000;

/// Target segment size when content has to be split
pub const UPSERT_TARGET_CHARS: usize = 400;

/// Persisted document shape shared by all backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkDocument {
    pub chunk_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    pub environment: String,
    pub stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_id: Option<String>,
    pub updated_at: f64,
    pub loaded_at: f64,
    /// Full chunk JSON as produced by the pass
    pub payload: Value,
}

/// Per-source chunk tally
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCount {
    pub source_hash: String,
    pub source_file: String,
    pub chunk_count: usize,
    pub last_updated: f64,
}

/// Report of which sources populate a collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesReport {
    pub status: String,
    pub sources: Vec<SourceCount>,
    pub total_sources: usize,
    pub total_chunks: usize,
}

/// Optional constraints for a query
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    /// Query text for lexical scoring
    pub query_text: Option<String>,
    /// Restrict to one chunk stage
    pub stage: Option<String>,
    /// Metadata keys that must match exactly
    pub metadata: Option<serde_json::Map<String, Value>>,
    /// Bounded-scan override
    pub scan_limit: Option<usize>,
}

/// One scored query hit
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub document: ChunkDocument,
    pub score: f64,
}

/// Backend interface shared by all vector stores
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend identifier, e.g. "memory" or "cassandra"
    fn backend_name(&self) -> &'static str;

    /// Create required tables/collections when the backend needs them
    async fn ensure_schema(&self) -> Result<()>;

    /// Insert documents expected to be new
    async fn insert_documents(&self, documents: &[ChunkDocument]) -> Result<usize>;

    /// Insert or replace documents keyed by `chunk_id`
    async fn upsert_documents(&self, documents: &[ChunkDocument]) -> Result<usize>;

    /// Delete all documents in the active environment
    async fn delete_all(&self) -> Result<usize>;

    /// Delete all documents matching a source hash
    async fn delete_by_source_hash(&self, source_hash: &str) -> Result<usize>;

    /// Number of stored documents for the active environment
    async fn count_documents(&self) -> Result<usize>;

    /// Number of documents stored for one source hash
    async fn count_documents_for_source(&self, source_hash: &str) -> Result<usize>;

    /// Sources and their chunk counts
    async fn sources_with_chunk_counts(&self) -> Result<SourcesReport>;

    /// Similarity query: cosine over embeddings when a vector is given,
    /// lexical overlap otherwise
    async fn query(
        &self,
        vector: Option<&[f32]>,
        top_k: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<QueryResult>>;

    /// Release backend resources
    async fn close(&self) -> Result<()>;
}

/// Split content so no part exceeds `max_bytes` of UTF-8
///
/// Splits on a character-count target first, then halves any segment that
/// still exceeds the byte ceiling.
pub fn enforce_chunk_size_limits(
    content: &str,
    target_chars: usize,
    max_bytes: usize,
) -> Vec<String> {
    if content.is_empty() {
        return vec![String::new()];
    }
    if content.len() <= max_bytes {
        return vec![content.to_string()];
    }

    let chars: Vec<char> = content.chars().collect();
    let segments: Vec<String> = chars
        .chunks(target_chars.max(1))
        .map(|window| window.iter().collect())
        .collect();

    let mut safe_segments = Vec::new();
    for segment in segments {
        let part = segment.trim();
        if part.is_empty() {
            continue;
        }
        if part.len() > max_bytes {
            let part_chars: Vec<char> = part.chars().collect();
            let midpoint = part_chars.len() / 2;
            safe_segments.push(part_chars[..midpoint].iter().collect());
            safe_segments.push(part_chars[midpoint..].iter().collect());
        } else {
            safe_segments.push(part.to_string());
        }
    }

    if safe_segments.is_empty() {
        safe_segments.push(chars.iter().take(target_chars).collect());
    }
    safe_segments
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Lexical overlap score: |query ∩ content| / |query|
pub fn lexical_score(query: &str, content: &str) -> f64 {
    if query.is_empty() || content.is_empty() {
        return 0.0;
    }
    let q = tokenize(query);
    let c = tokenize(content);
    if q.is_empty() || c.is_empty() {
        return 0.0;
    }
    q.intersection(&c).count() as f64 / q.len().max(1) as f64
}

/// Lexical overlap plus fixed boosts for common game-term queries
pub fn boosted_lexical_score(query: &str, content: &str, element_type: Option<&str>) -> f64 {
    let overlap = lexical_score(query, content);
    let q_lower = query.to_lowercase();
    let t_lower = content.to_lowercase();

    let mut boost = 0.0;
    if q_lower.contains("spells per day") && t_lower.contains("spells per day") {
        boost += 2.0;
    }
    if q_lower.contains("dodge") && t_lower.contains("dodge") {
        boost += 1.5;
    }
    if q_lower.contains("paladin") && t_lower.contains("paladin") {
        boost += 1.0;
    }
    if element_type
        .map(|t| t.to_lowercase().contains("table"))
        .unwrap_or(false)
    {
        boost += 0.5;
    }
    overlap + boost
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot_product / (norm_a * norm_b)
}

fn string_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(|v| v.as_str())
}

/// Build persistable documents from one chunk JSON object, applying the
/// byte-size guardrail
pub fn documents_from_chunk(
    chunk: &Value,
    env: &str,
    source_hash: Option<&str>,
    source_file: Option<&str>,
) -> Vec<ChunkDocument> {
    let now = epoch_seconds();

    let content = string_field(chunk, "content")
        .or_else(|| string_field(chunk, "text"))
        .unwrap_or_default();
    let mut metadata = chunk
        .get("metadata")
        .and_then(|m| m.as_object())
        .cloned()
        .unwrap_or_default();
    metadata
        .entry("environment".to_string())
        .or_insert_with(|| Value::String(env.to_string()));

    let chunk_id = string_field(chunk, "chunk_id")
        .or_else(|| string_field(chunk, "id"))
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let stage = string_field(chunk, "stage")
        .or_else(|| metadata.get("stage").and_then(|v| v.as_str()))
        .unwrap_or("raw")
        .to_string();

    let source_hash = metadata
        .get("source_hash")
        .and_then(|v| v.as_str())
        .or_else(|| string_field(chunk, "source_hash"))
        .or(source_hash)
        .map(|s| s.to_string());
    let source_file = metadata
        .get("source_file")
        .and_then(|v| v.as_str())
        .or_else(|| string_field(chunk, "source_file"))
        .or(source_file)
        .map(|s| s.to_string());

    if let Some(hash) = &source_hash {
        metadata
            .entry("source_hash".to_string())
            .or_insert_with(|| Value::String(hash.clone()));
    }
    if let Some(file) = &source_file {
        metadata
            .entry("source_file".to_string())
            .or_insert_with(|| Value::String(file.clone()));
    }

    let embedding: Option<Vec<f32>> = chunk
        .get("embedding")
        .and_then(|v| serde_json::from_value(v.clone()).ok());
    let embedding_model = string_field(chunk, "embedding_model").map(|s| s.to_string());
    let vector_id = string_field(chunk, "vector_id").map(|s| s.to_string());
    let updated_at = chunk
        .get("updated_at")
        .and_then(|v| v.as_f64())
        .unwrap_or(now);

    enforce_chunk_size_limits(content, UPSERT_TARGET_CHARS, UPSERT_MAX_BYTES)
        .into_iter()
        .enumerate()
        .map(|(index, part)| ChunkDocument {
            chunk_id: if index == 0 {
                chunk_id.clone()
            } else {
                format!("{}-part{}", chunk_id, index + 1)
            },
            content: part,
            metadata: metadata.clone(),
            environment: env.to_string(),
            stage: stage.clone(),
            source_hash: source_hash.clone(),
            source_file: source_file.clone(),
            embedding: embedding.clone(),
            embedding_model: embedding_model.clone(),
            vector_id: vector_id.clone(),
            updated_at,
            loaded_at: now,
            payload: chunk.clone(),
        })
        .collect()
}

/// Build documents for a batch of chunk JSON objects
pub fn documents_from_chunks(
    chunks: &[Value],
    env: &str,
    source_hash: Option<&str>,
    source_file: Option<&str>,
) -> Vec<ChunkDocument> {
    chunks
        .iter()
        .flat_map(|chunk| documents_from_chunk(chunk, env, source_hash, source_file))
        .collect()
}

/// Construct the configured backend; unrecognised selections never get
/// here because the config layer rejects them at parse time
pub async fn create_vector_store(config: &IngestConfig) -> Result<Arc<dyn VectorStore>> {
    let env = config.env.as_str();
    let store: Arc<dyn VectorStore> = match config.vector_store.backend {
        VectorBackend::Memory => Arc::new(MemoryVectorStore::new(env)),
        VectorBackend::Astra | VectorBackend::AstraVector => Arc::new(AstraVectorStore::new(
            &config.vector_store.astra,
            env,
            config.collection_name(),
        )?),
        VectorBackend::Cassandra => {
            let store =
                WideColumnVectorStore::connect(&config.vector_store.wide_column, env, config)
                    .await?;
            Arc::new(store)
        }
    };
    store.ensure_schema().await?;
    info!("vector store ready: backend={}", store.backend_name());
    Ok(store)
}
