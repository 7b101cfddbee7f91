//! In-process vector store used for local development and tests

use super::{
    boosted_lexical_score, ChunkDocument, QueryFilters, QueryResult, SourceCount, SourcesReport,
    VectorStore,
};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type Buckets = Arc<RwLock<HashMap<String, Vec<ChunkDocument>>>>;

/// Environment-bucketed in-memory store under a reader-writer lock
pub struct MemoryVectorStore {
    env: String,
    buckets: Buckets,
}

impl MemoryVectorStore {
    pub fn new(env: &str) -> Self {
        Self {
            env: env.to_string(),
            buckets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Share one bucket map across store handles, e.g. between the chunk
    /// store and a simulation wrapper
    pub fn with_shared(env: &str, buckets: Buckets) -> Self {
        Self {
            env: env.to_string(),
            buckets,
        }
    }

    fn metadata_matches(
        metadata: &serde_json::Map<String, Value>,
        required: Option<&serde_json::Map<String, Value>>,
    ) -> bool {
        match required {
            None => true,
            Some(required) => required
                .iter()
                .all(|(key, value)| metadata.get(key) == Some(value)),
        }
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ensure_schema(&self) -> Result<()> {
        // Schema-less backend
        Ok(())
    }

    async fn insert_documents(&self, documents: &[ChunkDocument]) -> Result<usize> {
        let mut buckets = self.buckets.write().await;
        let bucket = buckets.entry(self.env.clone()).or_default();
        bucket.extend(documents.iter().cloned());
        Ok(documents.len())
    }

    async fn upsert_documents(&self, documents: &[ChunkDocument]) -> Result<usize> {
        let mut buckets = self.buckets.write().await;
        let bucket = buckets.entry(self.env.clone()).or_default();

        let mut by_id: HashMap<String, usize> = bucket
            .iter()
            .enumerate()
            .map(|(index, doc)| (doc.chunk_id.clone(), index))
            .collect();

        for doc in documents {
            match by_id.get(&doc.chunk_id) {
                Some(&index) => bucket[index] = doc.clone(),
                None => {
                    by_id.insert(doc.chunk_id.clone(), bucket.len());
                    bucket.push(doc.clone());
                }
            }
        }
        Ok(documents.len())
    }

    async fn delete_all(&self) -> Result<usize> {
        let mut buckets = self.buckets.write().await;
        let bucket = buckets.entry(self.env.clone()).or_default();
        let count = bucket.len();
        bucket.clear();
        Ok(count)
    }

    async fn delete_by_source_hash(&self, source_hash: &str) -> Result<usize> {
        if source_hash.is_empty() {
            return Ok(0);
        }
        let mut buckets = self.buckets.write().await;
        let bucket = buckets.entry(self.env.clone()).or_default();
        let before = bucket.len();
        bucket.retain(|doc| doc.source_hash.as_deref() != Some(source_hash));
        Ok(before - bucket.len())
    }

    async fn count_documents(&self) -> Result<usize> {
        let buckets = self.buckets.read().await;
        Ok(buckets.get(&self.env).map(|b| b.len()).unwrap_or(0))
    }

    async fn count_documents_for_source(&self, source_hash: &str) -> Result<usize> {
        if source_hash.is_empty() {
            return Ok(0);
        }
        let buckets = self.buckets.read().await;
        Ok(buckets
            .get(&self.env)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|doc| doc.source_hash.as_deref() == Some(source_hash))
                    .count()
            })
            .unwrap_or(0))
    }

    async fn sources_with_chunk_counts(&self) -> Result<SourcesReport> {
        let buckets = self.buckets.read().await;
        let empty = Vec::new();
        let bucket = buckets.get(&self.env).unwrap_or(&empty);

        let mut grouped: HashMap<String, SourceCount> = HashMap::new();
        for doc in bucket {
            let hash = doc
                .source_hash
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            let entry = grouped.entry(hash.clone()).or_insert_with(|| SourceCount {
                source_hash: hash,
                source_file: doc.source_file.clone().unwrap_or_default(),
                chunk_count: 0,
                last_updated: doc.updated_at,
            });
            entry.chunk_count += 1;
            if doc.updated_at > entry.last_updated {
                entry.last_updated = doc.updated_at;
            }
        }

        let mut sources: Vec<SourceCount> = grouped.into_values().collect();
        sources.sort_by(|a, b| a.source_hash.cmp(&b.source_hash));
        Ok(SourcesReport {
            status: "ok".to_string(),
            total_sources: sources.len(),
            total_chunks: bucket.len(),
            sources,
        })
    }

    async fn query(
        &self,
        _vector: Option<&[f32]>,
        top_k: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<QueryResult>> {
        let query_text = filters.query_text.clone().unwrap_or_default();
        let buckets = self.buckets.read().await;
        let empty = Vec::new();
        let bucket = buckets.get(&self.env).unwrap_or(&empty);

        let mut results: Vec<QueryResult> = bucket
            .iter()
            .filter(|doc| {
                filters
                    .stage
                    .as_ref()
                    .map(|stage| &doc.stage == stage)
                    .unwrap_or(true)
                    && Self::metadata_matches(&doc.metadata, filters.metadata.as_ref())
            })
            .map(|doc| QueryResult {
                score: boosted_lexical_score(&query_text, &doc.content, None),
                document: doc.clone(),
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        Ok(results)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::epoch_seconds;
    use serde_json::json;

    fn doc(chunk_id: &str, content: &str, source_hash: &str) -> ChunkDocument {
        ChunkDocument {
            chunk_id: chunk_id.to_string(),
            content: content.to_string(),
            metadata: serde_json::Map::new(),
            environment: "test".to_string(),
            stage: "raw".to_string(),
            source_hash: Some(source_hash.to_string()),
            source_file: Some("book.pdf".to_string()),
            embedding: None,
            embedding_model: None,
            vector_id: None,
            updated_at: epoch_seconds(),
            loaded_at: epoch_seconds(),
            payload: json!({"chunk_id": chunk_id}),
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_chunk_id() {
        let store = MemoryVectorStore::new("test");
        store
            .upsert_documents(&[doc("c1", "first", "h1"), doc("c2", "second", "h1")])
            .await
            .unwrap();
        assert_eq!(store.count_documents().await.unwrap(), 2);

        // Same IDs again: replaced, not duplicated
        store
            .upsert_documents(&[doc("c1", "first updated", "h1")])
            .await
            .unwrap();
        assert_eq!(store.count_documents().await.unwrap(), 2);

        let results = store
            .query(
                None,
                10,
                &QueryFilters {
                    query_text: Some("updated".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(results[0].document.chunk_id, "c1");
    }

    #[tokio::test]
    async fn test_delete_by_source_hash() {
        let store = MemoryVectorStore::new("test");
        store
            .upsert_documents(&[
                doc("c1", "a", "h1"),
                doc("c2", "b", "h1"),
                doc("c3", "c", "h2"),
            ])
            .await
            .unwrap();

        assert_eq!(store.count_documents_for_source("h1").await.unwrap(), 2);
        assert_eq!(store.delete_by_source_hash("h1").await.unwrap(), 2);
        assert_eq!(store.count_documents_for_source("h1").await.unwrap(), 0);
        assert_eq!(store.count_documents().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sources_report() {
        let store = MemoryVectorStore::new("test");
        store
            .upsert_documents(&[doc("c1", "a", "h1"), doc("c2", "b", "h2")])
            .await
            .unwrap();

        let report = store.sources_with_chunk_counts().await.unwrap();
        assert_eq!(report.status, "ok");
        assert_eq!(report.total_sources, 2);
        assert_eq!(report.total_chunks, 2);
    }

    #[tokio::test]
    async fn test_query_stage_filter() {
        let store = MemoryVectorStore::new("test");
        let mut vectorized = doc("c1", "dodge feat rules", "h1");
        vectorized.stage = "vectorized".to_string();
        store
            .upsert_documents(&[vectorized, doc("c2", "dodge feat rules", "h1")])
            .await
            .unwrap();

        let results = store
            .query(
                None,
                10,
                &QueryFilters {
                    query_text: Some("dodge".to_string()),
                    stage: Some("vectorized".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.chunk_id, "c1");
        assert!(results[0].score > 0.0);
    }

    #[tokio::test]
    async fn test_environments_are_isolated() {
        let shared = Arc::new(RwLock::new(HashMap::new()));
        let dev = MemoryVectorStore::with_shared("dev", shared.clone());
        let test = MemoryVectorStore::with_shared("test", shared);

        dev.upsert_documents(&[doc("c1", "a", "h1")]).await.unwrap();
        assert_eq!(dev.count_documents().await.unwrap(), 1);
        assert_eq!(test.count_documents().await.unwrap(), 0);
    }
}
