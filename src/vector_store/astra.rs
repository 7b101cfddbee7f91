//! Remote document-DB backend over a JSON Data API
//!
//! Documents live in one collection per environment
//! (`ttrpg_chunks_{env}`). Upserts use find-one-and-replace keyed by
//! `chunk_id`. Queries run a bounded scan and rank by cosine similarity
//! over stored embeddings plus a lexical boost for common game terms.
//!
//! Without credentials the store runs in simulation mode backed by the
//! in-memory store, unless strict credentials are required.

use super::{
    boosted_lexical_score, cosine_similarity, ChunkDocument, MemoryVectorStore, QueryFilters,
    QueryResult, SourceCount, SourcesReport, VectorStore,
};
use crate::config::AstraConfig;
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const INSERT_BATCH_SIZE: usize = 20;

enum Mode {
    Remote(RemoteClient),
    Simulation(MemoryVectorStore),
}

struct RemoteClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

/// Document-DB chunk store
pub struct AstraVectorStore {
    collection: String,
    scan_limit: usize,
    mode: Mode,
}

impl AstraVectorStore {
    pub fn new(config: &AstraConfig, env: &str, collection: String) -> Result<Self> {
        let has_creds = config.endpoint.is_some() && config.token.is_some();

        let mode = if has_creds && !config.simulate {
            let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(30));
            if config.insecure {
                warn!("TLS verification disabled for document-DB backend (dev only)");
                builder = builder.danger_accept_invalid_certs(true);
            }
            Mode::Remote(RemoteClient {
                http: builder.build()?,
                endpoint: config
                    .endpoint
                    .as_deref()
                    .unwrap_or_default()
                    .trim_end_matches('/')
                    .to_string(),
                token: config.token.clone().unwrap_or_default(),
            })
        } else if config.require_creds && !config.simulate {
            return Err(StoreError::MissingCredentials {
                backend: "astra",
                detail: "endpoint and token are required in strict mode".to_string(),
            }
            .into());
        } else {
            warn!("document-DB credentials missing; running in simulation mode");
            Mode::Simulation(MemoryVectorStore::new(env))
        };

        Ok(Self {
            collection,
            scan_limit: config.scan_limit,
            mode,
        })
    }

    async fn command(&self, client: &RemoteClient, body: Value) -> Result<Value> {
        let url = format!(
            "{}/api/json/v1/default_keyspace/{}",
            client.endpoint, self.collection
        );
        let response = client
            .http
            .post(&url)
            .header("Token", &client.token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let value: Value = response.json().await?;
        if let Some(errors) = value.get("errors").and_then(|e| e.as_array()) {
            if !errors.is_empty() {
                return Err(StoreError::RequestFailed(format!(
                    "data API errors: {}",
                    serde_json::to_string(errors).unwrap_or_default()
                ))
                .into());
            }
        }
        Ok(value)
    }

    /// Bounded scan with a projection that keeps responses small
    async fn scan(&self, client: &RemoteClient, limit: usize) -> Result<Vec<ChunkDocument>> {
        let mut documents = Vec::new();
        let mut page_state: Option<String> = None;

        while documents.len() < limit {
            let mut find = json!({
                "options": {"limit": (limit - documents.len()).min(20)}
            });
            if let Some(state) = &page_state {
                find["options"]["pageState"] = json!(state);
            }

            let response = self.command(client, json!({"find": find})).await?;
            let data = &response["data"];
            let page: Vec<ChunkDocument> = data["documents"]
                .as_array()
                .map(|docs| {
                    docs.iter()
                        .filter_map(|d| serde_json::from_value(d.clone()).ok())
                        .collect()
                })
                .unwrap_or_default();
            if page.is_empty() {
                break;
            }
            documents.extend(page);

            page_state = data["nextPageState"].as_str().map(|s| s.to_string());
            if page_state.is_none() {
                break;
            }
        }

        Ok(documents)
    }
}

#[async_trait]
impl VectorStore for AstraVectorStore {
    fn backend_name(&self) -> &'static str {
        "astra"
    }

    async fn ensure_schema(&self) -> Result<()> {
        match &self.mode {
            Mode::Simulation(_) => Ok(()),
            Mode::Remote(client) => {
                // createCollection is idempotent on the Data API
                let url = format!("{}/api/json/v1/default_keyspace", client.endpoint);
                let body = json!({"createCollection": {"name": &self.collection}});
                let response = client
                    .http
                    .post(&url)
                    .header("Token", &client.token)
                    .json(&body)
                    .send()
                    .await?;
                if !response.status().is_success() {
                    warn!(
                        "createCollection for {} returned {}",
                        self.collection,
                        response.status()
                    );
                }
                Ok(())
            }
        }
    }

    async fn insert_documents(&self, documents: &[ChunkDocument]) -> Result<usize> {
        match &self.mode {
            Mode::Simulation(store) => store.insert_documents(documents).await,
            Mode::Remote(client) => {
                let mut inserted = 0;
                for batch in documents.chunks(INSERT_BATCH_SIZE) {
                    let docs: Vec<Value> = batch
                        .iter()
                        .map(|d| serde_json::to_value(d))
                        .collect::<std::result::Result<_, _>>()?;
                    let response = self
                        .command(client, json!({"insertMany": {"documents": docs}}))
                        .await?;
                    inserted += response["status"]["insertedIds"]
                        .as_array()
                        .map(|ids| ids.len())
                        .unwrap_or(batch.len());
                }
                Ok(inserted)
            }
        }
    }

    async fn upsert_documents(&self, documents: &[ChunkDocument]) -> Result<usize> {
        match &self.mode {
            Mode::Simulation(store) => store.upsert_documents(documents).await,
            Mode::Remote(client) => {
                let mut upserted = 0;
                for doc in documents {
                    let replacement = serde_json::to_value(doc)?;
                    let result = self
                        .command(
                            client,
                            json!({
                                "findOneAndReplace": {
                                    "filter": {"chunk_id": &doc.chunk_id},
                                    "replacement": replacement,
                                    "options": {"upsert": true}
                                }
                            }),
                        )
                        .await;
                    match result {
                        Ok(_) => upserted += 1,
                        Err(e) => warn!("upsert failed for {}: {}", doc.chunk_id, e),
                    }
                }
                if upserted < documents.len() {
                    warn!(
                        "partial upsert detected: {}/{} failed",
                        documents.len() - upserted,
                        documents.len()
                    );
                }
                Ok(upserted)
            }
        }
    }

    async fn delete_all(&self) -> Result<usize> {
        match &self.mode {
            Mode::Simulation(store) => store.delete_all().await,
            Mode::Remote(client) => {
                let mut deleted = 0;
                loop {
                    let response = self
                        .command(client, json!({"deleteMany": {"filter": {}}}))
                        .await?;
                    deleted += response["status"]["deletedCount"].as_u64().unwrap_or(0) as usize;
                    if !response["status"]["moreData"].as_bool().unwrap_or(false) {
                        break;
                    }
                }
                Ok(deleted)
            }
        }
    }

    async fn delete_by_source_hash(&self, source_hash: &str) -> Result<usize> {
        if source_hash.is_empty() {
            return Ok(0);
        }
        match &self.mode {
            Mode::Simulation(store) => store.delete_by_source_hash(source_hash).await,
            Mode::Remote(client) => {
                let mut deleted = 0;
                loop {
                    let response = self
                        .command(
                            client,
                            json!({"deleteMany": {"filter": {"source_hash": source_hash}}}),
                        )
                        .await?;
                    deleted += response["status"]["deletedCount"].as_u64().unwrap_or(0) as usize;
                    if !response["status"]["moreData"].as_bool().unwrap_or(false) {
                        break;
                    }
                }
                Ok(deleted)
            }
        }
    }

    async fn count_documents(&self) -> Result<usize> {
        match &self.mode {
            Mode::Simulation(store) => store.count_documents().await,
            Mode::Remote(client) => {
                let response = self
                    .command(client, json!({"countDocuments": {}}))
                    .await?;
                Ok(response["status"]["count"].as_u64().unwrap_or(0) as usize)
            }
        }
    }

    async fn count_documents_for_source(&self, source_hash: &str) -> Result<usize> {
        match &self.mode {
            Mode::Simulation(store) => store.count_documents_for_source(source_hash).await,
            Mode::Remote(client) => {
                let response = self
                    .command(
                        client,
                        json!({"countDocuments": {"filter": {"source_hash": source_hash}}}),
                    )
                    .await?;
                Ok(response["status"]["count"].as_u64().unwrap_or(0) as usize)
            }
        }
    }

    async fn sources_with_chunk_counts(&self) -> Result<SourcesReport> {
        match &self.mode {
            Mode::Simulation(store) => store.sources_with_chunk_counts().await,
            Mode::Remote(client) => {
                // The Data API has no aggregation pipeline; stream a
                // projected scan and group in memory.
                debug!("aggregation unavailable; falling back to projected scan");
                let documents = self.scan(client, self.scan_limit).await?;

                let mut grouped: HashMap<String, SourceCount> = HashMap::new();
                for doc in &documents {
                    let hash = doc
                        .metadata
                        .get("source_hash")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string())
                        .or_else(|| doc.source_hash.clone())
                        .or_else(|| {
                            doc.metadata
                                .get("source_id")
                                .and_then(|v| v.as_str())
                                .map(|s| s.to_string())
                        })
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
                    total_chunks: documents.len(),
                    sources,
                })
            }
        }
    }

    async fn query(
        &self,
        vector: Option<&[f32]>,
        top_k: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<QueryResult>> {
        match &self.mode {
            Mode::Simulation(store) => store.query(vector, top_k, filters).await,
            Mode::Remote(client) => {
                let scan_limit = filters.scan_limit.unwrap_or(self.scan_limit);
                let documents = self.scan(client, scan_limit).await?;
                let query_text = filters.query_text.clone().unwrap_or_default();

                let mut results: Vec<QueryResult> = documents
                    .into_iter()
                    .filter(|doc| {
                        filters
                            .stage
                            .as_ref()
                            .map(|stage| &doc.stage == stage)
                            .unwrap_or(true)
                    })
                    .map(|doc| {
                        let element_type = doc
                            .payload
                            .get("element_type")
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string());
                        let lexical = boosted_lexical_score(
                            &query_text,
                            &doc.content,
                            element_type.as_deref(),
                        );
                        let score = match (vector, &doc.embedding) {
                            (Some(query), Some(embedding)) => {
                                cosine_similarity(query, embedding) as f64 + lexical
                            }
                            _ => lexical,
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
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
