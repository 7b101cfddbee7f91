//! Wide-column chunk store
//!
//! Schema: `chunk_id` primary key plus environment, stage, content,
//! payload, source hash/file, a packed little-endian f32 embedding blob,
//! and bookkeeping timestamps, with secondary indexes on source_hash,
//! environment, and stage. Deletion by source hash scans matching keys
//! and removes one row at a time; queries scan environment + stage with a
//! configurable limit and rank client-side.

use super::{
    boosted_lexical_score, cosine_similarity, ChunkDocument, QueryFilters, QueryResult,
    SourceCount, SourcesReport, VectorStore,
};
use crate::config::{IngestConfig, WideColumnConfig};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use tracing::{debug, info};

/// Pack an embedding as little-endian f32 bytes
pub fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding
        .iter()
        .flat_map(|f| f.to_le_bytes().to_vec())
        .collect()
}

/// Unpack a little-endian f32 blob
pub fn deserialize_embedding(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Wide-column store over an embedded SQL engine
pub struct WideColumnVectorStore {
    pool: SqlitePool,
    env: String,
    table: String,
    scan_limit: usize,
}

impl WideColumnVectorStore {
    /// Connect and prepare the keyspace-qualified table name
    pub async fn connect(
        config: &WideColumnConfig,
        env: &str,
        ingest: &IngestConfig,
    ) -> Result<Self> {
        if let Some(points) = &config.contact_points {
            // Cluster parameters are accepted for config parity; the
            // embedded engine needs only the database URL.
            debug!("ignoring contact points '{}' for embedded engine", points);
        }

        let database_url = match &config.database_url {
            Some(url) => url.clone(),
            None => {
                let dir = ingest.artifacts_root.join("store");
                std::fs::create_dir_all(&dir)?;
                format!(
                    "sqlite:{}?mode=rwc",
                    dir.join(format!("{}_{}.db", config.keyspace, config.table))
                        .display()
                )
            }
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&database_url)
            .await?;

        info!(
            "wide-column store connected: table {}_{}",
            config.keyspace, config.table
        );
        Ok(Self {
            pool,
            env: env.to_string(),
            table: format!("{}_{}", config.keyspace, config.table),
            scan_limit: config.scan_limit,
        })
    }

    fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> ChunkDocument {
        let payload_text: String = row.get("payload");
        let payload: Value = serde_json::from_str(&payload_text).unwrap_or(Value::Null);
        let metadata = payload
            .get("metadata")
            .and_then(|m| m.as_object())
            .cloned()
            .unwrap_or_default();
        let embedding_blob: Option<Vec<u8>> = row.get("embedding");

        ChunkDocument {
            chunk_id: row.get("chunk_id"),
            content: row.get("content"),
            metadata,
            environment: row.get("environment"),
            stage: row.get("stage"),
            source_hash: row.get("source_hash"),
            source_file: row.get("source_file"),
            embedding: embedding_blob
                .filter(|blob| !blob.is_empty())
                .map(|blob| deserialize_embedding(&blob)),
            embedding_model: row.get("embedding_model"),
            vector_id: row.get("vector_id"),
            updated_at: row.get("updated_at"),
            loaded_at: row.get("loaded_at"),
            payload,
        }
    }

    async fn write_documents(&self, documents: &[ChunkDocument]) -> Result<usize> {
        let sql = format!(
            "INSERT OR REPLACE INTO {} \
             (chunk_id, environment, stage, content, payload, source_hash, source_file, \
              embedding, embedding_model, vector_id, updated_at, loaded_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.table
        );

        let mut written = 0;
        for doc in documents {
            let payload = serde_json::to_string(&doc.payload)?;
            let embedding = doc
                .embedding
                .as_ref()
                .map(|e| serialize_embedding(e))
                .unwrap_or_default();

            sqlx::query(&sql)
                .bind(&doc.chunk_id)
                .bind(&doc.environment)
                .bind(&doc.stage)
                .bind(&doc.content)
                .bind(&payload)
                .bind(&doc.source_hash)
                .bind(&doc.source_file)
                .bind(&embedding)
                .bind(&doc.embedding_model)
                .bind(&doc.vector_id)
                .bind(doc.updated_at)
                .bind(doc.loaded_at)
                .execute(&self.pool)
                .await?;
            written += 1;
        }
        Ok(written)
    }
}

#[async_trait]
impl VectorStore for WideColumnVectorStore {
    fn backend_name(&self) -> &'static str {
        "cassandra"
    }

    async fn ensure_schema(&self) -> Result<()> {
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                chunk_id TEXT PRIMARY KEY,
                environment TEXT,
                stage TEXT,
                content TEXT,
                payload TEXT,
                source_hash TEXT,
                source_file TEXT,
                embedding BLOB,
                embedding_model TEXT,
                vector_id TEXT,
                updated_at REAL,
                loaded_at REAL
            )",
            self.table
        );
        sqlx::query(&create).execute(&self.pool).await?;

        for column in ["source_hash", "environment", "stage"] {
            let index = format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table} ({column})",
                table = self.table,
                column = column
            );
            sqlx::query(&index).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn insert_documents(&self, documents: &[ChunkDocument]) -> Result<usize> {
        // Wide-column inserts are upserts by primary key
        self.write_documents(documents).await
    }

    async fn upsert_documents(&self, documents: &[ChunkDocument]) -> Result<usize> {
        self.write_documents(documents).await
    }

    async fn delete_all(&self) -> Result<usize> {
        let sql = format!("DELETE FROM {} WHERE environment = ?", self.table);
        let result = sqlx::query(&sql).bind(&self.env).execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }

    async fn delete_by_source_hash(&self, source_hash: &str) -> Result<usize> {
        if source_hash.is_empty() {
            return Ok(0);
        }

        let select = format!(
            "SELECT chunk_id FROM {} WHERE source_hash = ? AND environment = ?",
            self.table
        );
        let rows = sqlx::query(&select)
            .bind(source_hash)
            .bind(&self.env)
            .fetch_all(&self.pool)
            .await?;

        // No materialised views assumed: delete row by row
        let delete = format!("DELETE FROM {} WHERE chunk_id = ?", self.table);
        let mut removed = 0;
        for row in rows {
            let chunk_id: String = row.get("chunk_id");
            sqlx::query(&delete)
                .bind(&chunk_id)
                .execute(&self.pool)
                .await?;
            removed += 1;
        }
        Ok(removed)
    }

    async fn count_documents(&self) -> Result<usize> {
        let sql = format!(
            "SELECT COUNT(*) as count FROM {} WHERE environment = ?",
            self.table
        );
        let row = sqlx::query(&sql).bind(&self.env).fetch_one(&self.pool).await?;
        let count: i64 = row.get("count");
        Ok(count as usize)
    }

    async fn count_documents_for_source(&self, source_hash: &str) -> Result<usize> {
        let sql = format!(
            "SELECT COUNT(*) as count FROM {} WHERE source_hash = ? AND environment = ?",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(source_hash)
            .bind(&self.env)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.get("count");
        Ok(count as usize)
    }

    async fn sources_with_chunk_counts(&self) -> Result<SourcesReport> {
        let sql = format!(
            "SELECT source_hash, source_file, updated_at FROM {} WHERE environment = ?",
            self.table
        );
        let rows = sqlx::query(&sql).bind(&self.env).fetch_all(&self.pool).await?;

        let mut grouped: HashMap<String, SourceCount> = HashMap::new();
        let total = rows.len();
        for row in rows {
            let hash: Option<String> = row.get("source_hash");
            let hash = hash.unwrap_or_else(|| "unknown".to_string());
            let file: Option<String> = row.get("source_file");
            let updated_at: f64 = row.get("updated_at");

            let entry = grouped.entry(hash.clone()).or_insert_with(|| SourceCount {
                source_hash: hash,
                source_file: file.clone().unwrap_or_default(),
                chunk_count: 0,
                last_updated: updated_at,
            });
            entry.chunk_count += 1;
            if updated_at > entry.last_updated {
                entry.last_updated = updated_at;
            }
        }

        let mut sources: Vec<SourceCount> = grouped.into_values().collect();
        sources.sort_by(|a, b| a.source_hash.cmp(&b.source_hash));
        Ok(SourcesReport {
            status: "ok".to_string(),
            total_sources: sources.len(),
            total_chunks: total,
            sources,
        })
    }

    async fn query(
        &self,
        vector: Option<&[f32]>,
        top_k: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<QueryResult>> {
        let scan_limit = filters.scan_limit.unwrap_or(self.scan_limit);
        let rows = match &filters.stage {
            Some(stage) => {
                let sql = format!(
                    "SELECT * FROM {} WHERE environment = ? AND stage = ? LIMIT ?",
                    self.table
                );
                sqlx::query(&sql)
                    .bind(&self.env)
                    .bind(stage)
                    .bind(scan_limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT * FROM {} WHERE environment = ? LIMIT ?",
                    self.table
                );
                sqlx::query(&sql)
                    .bind(&self.env)
                    .bind(scan_limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let query_text = filters.query_text.clone().unwrap_or_default();
        let mut results: Vec<QueryResult> = rows
            .iter()
            .map(|row| {
                let doc = Self::document_from_row(row);
                let element_type = doc
                    .payload
                    .get("element_type")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                let score = match (vector, &doc.embedding) {
                    (Some(query), Some(embedding)) => cosine_similarity(query, embedding) as f64,
                    _ => boosted_lexical_score(&query_text, &doc.content, element_type.as_deref()),
                };
                QueryResult {
                    document: doc,
                    score,
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);
        Ok(results)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::epoch_seconds;
    use serde_json::json;
    use tempfile::TempDir;

    async fn test_store(dir: &TempDir) -> WideColumnVectorStore {
        let config = WideColumnConfig {
            database_url: Some(format!(
                "sqlite:{}?mode=rwc",
                dir.path().join("wide.db").display()
            )),
            ..Default::default()
        };
        let store = WideColumnVectorStore::connect(&config, "test", &IngestConfig::default())
            .await
            .unwrap();
        store.ensure_schema().await.unwrap();
        store
    }

    fn doc(chunk_id: &str, embedding: Option<Vec<f32>>) -> ChunkDocument {
        ChunkDocument {
            chunk_id: chunk_id.to_string(),
            content: "the paladin smites with divine power".to_string(),
            metadata: serde_json::Map::new(),
            environment: "test".to_string(),
            stage: "vectorized".to_string(),
            source_hash: Some("hash1".to_string()),
            source_file: Some("book.pdf".to_string()),
            embedding,
            embedding_model: Some("text-embedding-3-small".to_string()),
            vector_id: Some(format!("{}_v", chunk_id)),
            updated_at: epoch_seconds(),
            loaded_at: epoch_seconds(),
            payload: json!({"chunk_id": chunk_id, "metadata": {"page": 3}, "element_type": "Table"}),
        }
    }

    #[test]
    fn test_embedding_blob_round_trip() {
        let embedding = vec![1.5_f32, -2.25, 0.0, 42.125];
        let blob = serialize_embedding(&embedding);
        assert_eq!(blob.len(), 16);
        assert_eq!(deserialize_embedding(&blob), embedding);
    }

    #[tokio::test]
    async fn test_upsert_and_count() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir).await;

        let docs = vec![doc("c1", Some(vec![1.0, 0.0])), doc("c2", None)];
        assert_eq!(store.upsert_documents(&docs).await.unwrap(), 2);
        assert_eq!(store.count_documents().await.unwrap(), 2);

        // Replace-by-id keeps the count stable
        assert_eq!(store.upsert_documents(&docs).await.unwrap(), 2);
        assert_eq!(store.count_documents().await.unwrap(), 2);
        assert_eq!(store.count_documents_for_source("hash1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_by_source_hash() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir).await;
        store
            .upsert_documents(&[doc("c1", None), doc("c2", None)])
            .await
            .unwrap();

        assert_eq!(store.delete_by_source_hash("hash1").await.unwrap(), 2);
        assert_eq!(store.count_documents().await.unwrap(), 0);
        assert_eq!(store.delete_by_source_hash("").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_query_cosine_ranking() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir).await;
        store
            .upsert_documents(&[
                doc("close", Some(vec![1.0, 0.05])),
                doc("far", Some(vec![0.0, 1.0])),
            ])
            .await
            .unwrap();

        let results = store
            .query(Some(&[1.0, 0.0]), 2, &QueryFilters::default())
            .await
            .unwrap();
        assert_eq!(results[0].document.chunk_id, "close");
        assert!(results[0].score > results[1].score);
        // Metadata restored from payload
        assert_eq!(results[0].document.metadata["page"], json!(3));
    }

    #[tokio::test]
    async fn test_query_lexical_fallback() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir).await;
        store.upsert_documents(&[doc("c1", None)]).await.unwrap();

        let results = store
            .query(
                None,
                5,
                &QueryFilters {
                    query_text: Some("paladin".to_string()),
                    stage: Some("vectorized".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        // paladin term boost plus table element boost
        assert!(results[0].score > 1.0);
    }
}
