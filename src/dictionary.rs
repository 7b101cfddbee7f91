//! Dictionary store adapter
//!
//! Terms are keyed by a normalised form (lowercase, spaces and hyphens
//! collapsed to underscores, apostrophes dropped). Upserts follow a
//! two-step pattern so sources accumulate as a set union across jobs:
//! create-if-absent with base fields, then append sources.

use crate::config::{DictionaryConfig, IngestConfig};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Where a dictionary term was observed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermSource {
    pub source: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relations: Option<Vec<Value>>,
}

/// A term to upsert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictTerm {
    pub term: String,
    pub definition: String,
    pub category: String,
    pub sources: Vec<TermSource>,
}

/// A stored term record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictRecord {
    pub term: String,
    pub definition: String,
    pub category: String,
    pub sources: Vec<TermSource>,
    pub created_at: f64,
    pub updated_at: f64,
}

/// Normalise a term into its uniqueness key
pub fn normalize_term(term: &str) -> String {
    term.trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
        .replace('\'', "")
}

/// Collapse duplicate terms within a batch, keeping the last occurrence
pub fn dedupe_terms(terms: &[DictTerm]) -> Vec<DictTerm> {
    let mut order: Vec<String> = Vec::new();
    let mut by_key: HashMap<String, DictTerm> = HashMap::new();

    for term in terms {
        let key = normalize_term(&term.term);
        if !by_key.contains_key(&key) {
            order.push(key.clone());
        }
        by_key.insert(key, term.clone());
    }

    order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .collect()
}

const UPSERT_BATCH_SIZE: usize = 20;
const INTER_BATCH_DELAY: Duration = Duration::from_millis(100);

/// Shared store of named terms with definitions and categories
#[async_trait]
pub trait DictionaryStore: Send + Sync {
    /// Whether a real backend is reachable; false means simulation mode
    fn available(&self) -> bool {
        true
    }

    /// Upsert a batch of terms, returning the number processed
    async fn upsert_terms(&self, terms: &[DictTerm]) -> Result<usize>;

    /// Total number of stored terms
    async fn term_count(&self) -> Result<usize>;

    /// Fetch one term by name (normalised lookup)
    async fn get_term(&self, term: &str) -> Result<Option<DictRecord>>;

    /// Remove all terms; returns the number removed when known
    async fn clear(&self) -> Result<usize>;
}

/// In-memory dictionary backend for dev, test, and simulation-free local
/// runs
#[derive(Default)]
pub struct MemoryDictionaryStore {
    records: Arc<RwLock<HashMap<String, DictRecord>>>,
}

impl MemoryDictionaryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DictionaryStore for MemoryDictionaryStore {
    async fn upsert_terms(&self, terms: &[DictTerm]) -> Result<usize> {
        if terms.is_empty() {
            return Ok(0);
        }

        let deduped = dedupe_terms(terms);
        if deduped.len() < terms.len() {
            info!(
                "deduplicated {} entries to {} ({} duplicates removed)",
                terms.len(),
                deduped.len(),
                terms.len() - deduped.len()
            );
        }

        let now = crate::artifacts::epoch_seconds();
        let mut records = self.records.write().await;
        for term in &deduped {
            let key = normalize_term(&term.term);
            match records.get_mut(&key) {
                Some(existing) => {
                    existing.definition = term.definition.clone();
                    existing.category = term.category.clone();
                    existing.updated_at = now;
                    for source in &term.sources {
                        if !existing.sources.contains(source) {
                            existing.sources.push(source.clone());
                        }
                    }
                }
                None => {
                    records.insert(
                        key,
                        DictRecord {
                            term: term.term.clone(),
                            definition: term.definition.clone(),
                            category: term.category.clone(),
                            sources: term.sources.clone(),
                            created_at: now,
                            updated_at: now,
                        },
                    );
                }
            }
        }

        debug!("upserted {} dictionary entries in memory", deduped.len());
        Ok(deduped.len())
    }

    async fn term_count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }

    async fn get_term(&self, term: &str) -> Result<Option<DictRecord>> {
        Ok(self
            .records
            .read()
            .await
            .get(&normalize_term(term))
            .cloned())
    }

    async fn clear(&self) -> Result<usize> {
        let mut records = self.records.write().await;
        let count = records.len();
        records.clear();
        Ok(count)
    }
}

/// Remote document-DB dictionary backend (Astra-style Data API)
///
/// Runs in simulation mode when credentials are missing: upserts log
/// "would upsert N" and report N, counts are unavailable.
pub struct RemoteDictionaryStore {
    collection: String,
    client: Option<RemoteClient>,
}

struct RemoteClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

impl RemoteDictionaryStore {
    pub fn new(config: &DictionaryConfig, collection: String) -> Result<Self> {
        let client = match (&config.endpoint, &config.token) {
            (Some(endpoint), Some(token)) => Some(RemoteClient {
                http: reqwest::Client::builder()
                    .timeout(Duration::from_secs(30))
                    .build()?,
                endpoint: endpoint.trim_end_matches('/').to_string(),
                token: token.clone(),
            }),
            _ => {
                warn!("dictionary credentials incomplete; running in simulation mode");
                None
            }
        };
        Ok(Self { collection, client })
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
        Ok(response.json().await?)
    }

    async fn upsert_one(&self, client: &RemoteClient, term: &DictTerm, now: f64) -> Result<()> {
        let doc_id = normalize_term(&term.term);

        // Step 1: make sure the document exists with base fields and an
        // empty source list
        self.command(
            client,
            json!({
                "updateOne": {
                    "filter": {"_id": &doc_id},
                    "update": {
                        "$setOnInsert": {
                            "_id": &doc_id,
                            "created_at": now,
                            "sources": []
                        }
                    },
                    "options": {"upsert": true}
                }
            }),
        )
        .await?;

        // Step 2: refresh term fields and append sources as a set union
        self.command(
            client,
            json!({
                "updateOne": {
                    "filter": {"_id": &doc_id},
                    "update": {
                        "$set": {
                            "term": &term.term,
                            "definition": &term.definition,
                            "category": &term.category,
                            "updated_at": now
                        },
                        "$addToSet": {
                            "sources": {"$each": &term.sources}
                        }
                    }
                }
            }),
        )
        .await?;

        Ok(())
    }
}

#[async_trait]
impl DictionaryStore for RemoteDictionaryStore {
    fn available(&self) -> bool {
        self.client.is_some()
    }

    async fn upsert_terms(&self, terms: &[DictTerm]) -> Result<usize> {
        if terms.is_empty() {
            return Ok(0);
        }

        let deduped = dedupe_terms(terms);
        if deduped.len() < terms.len() {
            info!(
                "deduplicated {} entries to {} ({} duplicates removed)",
                terms.len(),
                deduped.len(),
                terms.len() - deduped.len()
            );
        }

        let client = match &self.client {
            Some(client) => client,
            None => {
                info!(
                    "SIMULATION: would upsert {} dictionary entries into {}",
                    deduped.len(),
                    self.collection
                );
                return Ok(deduped.len());
            }
        };

        let now = crate::artifacts::epoch_seconds();
        let mut upserted = 0;
        for (batch_index, batch) in deduped.chunks(UPSERT_BATCH_SIZE).enumerate() {
            if batch_index > 0 {
                tokio::time::sleep(INTER_BATCH_DELAY).await;
            }
            for term in batch {
                match self.upsert_one(client, term, now).await {
                    Ok(()) => upserted += 1,
                    Err(e) => warn!("dictionary upsert failed for '{}': {}", term.term, e),
                }
            }
        }

        info!(
            "dictionary upsert completed: {}/{} entries processed",
            upserted,
            deduped.len()
        );
        Ok(upserted)
    }

    async fn term_count(&self) -> Result<usize> {
        let client = self.client.as_ref().ok_or_else(|| {
            IngestError::Dictionary("dictionary backend not available for count".to_string())
        })?;

        let response = self.command(client, json!({"countDocuments": {}})).await?;
        Ok(response["status"]["count"].as_u64().unwrap_or(0) as usize)
    }

    async fn get_term(&self, term: &str) -> Result<Option<DictRecord>> {
        let client = match &self.client {
            Some(client) => client,
            None => return Ok(None),
        };

        let response = self
            .command(
                client,
                json!({"findOne": {"filter": {"_id": normalize_term(term)}}}),
            )
            .await?;
        let document = &response["data"]["document"];
        if document.is_null() {
            return Ok(None);
        }
        Ok(serde_json::from_value(document.clone()).ok())
    }

    async fn clear(&self) -> Result<usize> {
        let client = match &self.client {
            Some(client) => client,
            None => {
                info!("SIMULATION: would empty dictionary collection {}", self.collection);
                return Ok(0);
            }
        };

        let mut removed = 0;
        loop {
            let response = self.command(client, json!({"deleteMany": {"filter": {}}})).await?;
            removed += response["status"]["deletedCount"].as_u64().unwrap_or(0) as usize;
            if !response["status"]["moreData"].as_bool().unwrap_or(false) {
                break;
            }
        }
        Ok(removed)
    }
}

/// Optional LLM-backed dictionary seeder
///
/// Asks a chat-completion endpoint for seed terms as a JSON array of
/// `{term, definition, category}` objects. Non-JSON responses are
/// discarded; failures never block Pass A.
pub struct LlmDictionarySeeder {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl LlmDictionarySeeder {
    pub fn new(endpoint: String, api_key: String, model: String) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()?,
            endpoint,
            api_key,
            model,
        })
    }

    /// Request seed terms for a source document
    pub async fn seed_terms(&self, source_name: &str) -> Result<Vec<DictTerm>> {
        let prompt = format!(
            "List the most important game terms a reader of '{}' should know. \
             Respond with a JSON array of objects with keys term, definition, category.",
            source_name
        );
        let payload = json!({
            "model": &self.model,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        let body: Value = response.json().await?;
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default();

        Ok(parse_seed_response(content, source_name))
    }
}

/// Parse an LLM seed response; anything that is not a JSON array of term
/// objects is discarded
pub fn parse_seed_response(content: &str, source_name: &str) -> Vec<DictTerm> {
    let value: Value = match serde_json::from_str(content.trim()) {
        Ok(value) => value,
        Err(_) => {
            warn!("discarding non-JSON dictionary seed response");
            return Vec::new();
        }
    };

    let Some(items) = value.as_array() else {
        warn!("discarding non-array dictionary seed response");
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let term = item["term"].as_str()?.trim();
            if term.is_empty() {
                return None;
            }
            Some(DictTerm {
                term: term.to_string(),
                definition: item["definition"]
                    .as_str()
                    .unwrap_or_default()
                    .chars()
                    .take(400)
                    .collect(),
                category: item["category"].as_str().unwrap_or("general").to_string(),
                sources: vec![TermSource {
                    source: source_name.to_string(),
                    method: "llm_seed".to_string(),
                    page: None,
                    section_id: None,
                    level: None,
                    relations: None,
                }],
            })
        })
        .collect()
}

/// Select a dictionary backend from configuration
///
/// Remote credentials win; strict mode without credentials keeps the
/// remote adapter in simulation mode so Pass E can fail loudly; otherwise
/// the in-memory backend provides real counts for local runs.
pub fn create_dictionary_store(config: &IngestConfig) -> Result<Arc<dyn DictionaryStore>> {
    let has_creds =
        config.dictionary.endpoint.is_some() && config.dictionary.token.is_some();
    if has_creds || config.dictionary.strict {
        Ok(Arc::new(RemoteDictionaryStore::new(
            &config.dictionary,
            config.dictionary_collection_name(),
        )?))
    } else {
        Ok(Arc::new(MemoryDictionaryStore::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(name: &str, category: &str) -> DictTerm {
        DictTerm {
            term: name.to_string(),
            definition: format!("{} from Test Book, page 1", name),
            category: category.to_string(),
            sources: vec![TermSource {
                source: "Test Book.pdf".to_string(),
                method: "toc_parse".to_string(),
                page: Some(1),
                section_id: Some("section_000".to_string()),
                level: Some(1),
                relations: None,
            }],
        }
    }

    #[test]
    fn test_normalize_term() {
        assert_eq!(normalize_term("Shield of Faith"), "shield_of_faith");
        assert_eq!(normalize_term("two-weapon fighting"), "two_weapon_fighting");
        assert_eq!(normalize_term("Ranger's Mark"), "rangers_mark");
        assert_eq!(normalize_term("  Rage  "), "rage");
    }

    #[test]
    fn test_dedupe_keeps_last_occurrence() {
        let first = term("Sneak Attack", "mechanics");
        let mut second = term("sneak-attack", "feats");
        second.definition = "updated".to_string();

        let deduped = dedupe_terms(&[first, second.clone()]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].definition, "updated");
        assert_eq!(deduped[0].category, "feats");
    }

    #[tokio::test]
    async fn test_memory_store_upsert_and_count() {
        let store = MemoryDictionaryStore::new();
        let count = store
            .upsert_terms(&[term("Fireball", "spells"), term("Rage", "mechanics")])
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(store.term_count().await.unwrap(), 2);

        let record = store.get_term("fireball").await.unwrap().unwrap();
        assert_eq!(record.category, "spells");
        assert_eq!(record.sources.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_source_set_union() {
        let store = MemoryDictionaryStore::new();
        store.upsert_terms(&[term("Rage", "mechanics")]).await.unwrap();

        // Same source again: no duplicate. New source: appended.
        let mut updated = term("Rage", "mechanics");
        updated.sources.push(TermSource {
            source: "job_9".to_string(),
            method: "graph_extraction".to_string(),
            page: None,
            section_id: None,
            level: None,
            relations: None,
        });
        store.upsert_terms(&[updated]).await.unwrap();

        let record = store.get_term("Rage").await.unwrap().unwrap();
        assert_eq!(record.sources.len(), 2);
        assert_eq!(store.term_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remote_store_simulation_mode() {
        let store = RemoteDictionaryStore::new(
            &DictionaryConfig::default(),
            "ttrpg_dictionary_dev".to_string(),
        )
        .unwrap();
        assert!(!store.available());

        let count = store
            .upsert_terms(&[term("Fireball", "spells")])
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert!(store.term_count().await.is_err());
        assert!(store.get_term("Fireball").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryDictionaryStore::new();
        store.upsert_terms(&[term("Fireball", "spells")]).await.unwrap();
        assert_eq!(store.clear().await.unwrap(), 1);
        assert_eq!(store.term_count().await.unwrap(), 0);
    }

    #[test]
    fn test_parse_seed_response() {
        let content = r#"[
            {"term": "Fireball", "definition": "Evocation spell", "category": "spells"},
            {"term": "Rage", "definition": "Barbarian resource", "category": "mechanics"},
            {"definition": "missing term is skipped"}
        ]"#;
        let terms = parse_seed_response(content, "Core.pdf");
        assert_eq!(terms.len(), 2);
        assert_eq!(terms[0].term, "Fireball");
        assert_eq!(terms[0].sources[0].method, "llm_seed");
        assert_eq!(terms[1].category, "mechanics");
    }

    #[test]
    fn test_parse_seed_discards_non_json() {
        assert!(parse_seed_response("I cannot help with that.", "Core.pdf").is_empty());
        assert!(parse_seed_response("{\"term\": \"not an array\"}", "Core.pdf").is_empty());
    }
}
