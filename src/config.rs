//! Configuration management for the ingestion pipeline
//!
//! Configuration is layered: compiled defaults, an optional config file
//! (JSON or TOML), then the environment variables recognised by the
//! reference deployment (`VECTOR_STORE_BACKEND`, `CHUNK_*`, `MODEL_DIM`,
//! `ASTRA_*`, `CASSANDRA_*`, `GRAPH_BACKEND`, ...).

use crate::error::{IngestError, Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Deployment environment name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvName {
    Dev,
    Test,
    Prod,
}

impl EnvName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvName::Dev => "dev",
            EnvName::Test => "test",
            EnvName::Prod => "prod",
        }
    }
}

impl Default for EnvName {
    fn default() -> Self {
        EnvName::Dev
    }
}

impl fmt::Display for EnvName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvName {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dev" => Ok(EnvName::Dev),
            "test" => Ok(EnvName::Test),
            "prod" => Ok(EnvName::Prod),
            other => Err(IngestError::Config(format!(
                "unknown environment '{}' (expected dev, test, or prod)",
                other
            ))),
        }
    }
}

/// Main configuration for the ingestion pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Deployment environment
    #[serde(default)]
    pub env: EnvName,

    /// Concurrent worker count for the batch driver
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Root directory for job artifacts (`{root}/ingest/{env}/{job_id}`)
    #[serde(default = "default_artifacts_root")]
    pub artifacts_root: PathBuf,

    /// Per-source barrier acquisition timeout in seconds
    #[serde(default = "default_barrier_timeout")]
    pub barrier_timeout_secs: u64,

    /// Chunk size normalisation (Pass D)
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Embedding model configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Vector-store backend configuration
    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    /// Dictionary store configuration
    #[serde(default)]
    pub dictionary: DictionaryConfig,

    /// Document graph export configuration
    #[serde(default)]
    pub graph: GraphConfig,

    /// Disable TLS verification (dev only; rejected elsewhere)
    #[serde(default)]
    pub ssl_no_verify: bool,
}

fn default_threads() -> usize {
    4
}

fn default_artifacts_root() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_barrier_timeout() -> u64 {
    1800
}

/// Chunk size normalisation settings (Pass D)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Soft target size in characters
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    /// Hard cap in characters; chunks above this are split
    #[serde(default = "default_hard_cap")]
    pub hard_cap: usize,

    /// Minimum size; smaller neighbours are merged
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,

    /// Overlap carried between adjacent splits, in characters
    #[serde(default = "default_overlap")]
    pub overlap: usize,

    /// Split unit ("word" or "sentence")
    #[serde(default = "default_split_by")]
    pub split_by: SplitBy,
}

fn default_max_chars() -> usize {
    500
}

fn default_hard_cap() -> usize {
    600
}

fn default_min_chars() -> usize {
    120
}

fn default_overlap() -> usize {
    60
}

fn default_split_by() -> SplitBy {
    SplitBy::Word
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            hard_cap: default_hard_cap(),
            min_chars: default_min_chars(),
            overlap: default_overlap(),
            split_by: default_split_by(),
        }
    }
}

/// Split unit for oversized chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitBy {
    Word,
    Sentence,
}

/// Embedding model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model identifier sent to the embedding service
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Endpoint for the embedding HTTP API
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,

    /// API key; absent key produces zero-vector embeddings
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Native dimension the model produces before reduction
    #[serde(default = "default_native_dim")]
    pub native_dim: usize,

    /// Stored dimension after reduction
    #[serde(default = "default_model_dim")]
    pub model_dim: usize,

    /// Dimension reduction method
    #[serde(default)]
    pub reduction: DimensionReduction,

    /// Fail Pass D when the configured dimension is incompatible
    #[serde(default = "default_true")]
    pub abort_on_incompatible: bool,

    /// Request timeout in seconds
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,

    /// Input truncation limit in characters
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_endpoint() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}

fn default_native_dim() -> usize {
    1536
}

fn default_model_dim() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

fn default_embed_timeout() -> u64 {
    30
}

fn default_max_input_chars() -> usize {
    8000
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            endpoint: default_embedding_endpoint(),
            api_key: None,
            native_dim: default_native_dim(),
            model_dim: default_model_dim(),
            reduction: DimensionReduction::default(),
            abort_on_incompatible: true,
            timeout_secs: default_embed_timeout(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

/// Embedding dimension reduction method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DimensionReduction {
    Off,
    Truncate,
    /// PCA to the given dimension. On a single vector this degenerates to
    /// truncation, which is what the pipeline actually applies.
    #[serde(rename = "pca-1024")]
    Pca1024,
}

impl Default for DimensionReduction {
    fn default() -> Self {
        DimensionReduction::Pca1024
    }
}

impl FromStr for DimensionReduction {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "off" => Ok(DimensionReduction::Off),
            "truncate" => Ok(DimensionReduction::Truncate),
            s if s.starts_with("pca-") => Ok(DimensionReduction::Pca1024),
            other => Err(IngestError::Config(format!(
                "unknown dimension reduction method '{}'",
                other
            ))),
        }
    }
}

/// Vector-store backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorBackend {
    Memory,
    Astra,
    AstraVector,
    Cassandra,
}

impl FromStr for VectorBackend {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(VectorBackend::Memory),
            "astra" => Ok(VectorBackend::Astra),
            "astra_vector" => Ok(VectorBackend::AstraVector),
            "cassandra" => Ok(VectorBackend::Cassandra),
            other => Err(StoreError::UnsupportedBackend(other.to_string()).into()),
        }
    }
}

/// Vector-store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    /// Backend selector; unrecognised values are fatal at construction
    #[serde(default = "default_vector_backend")]
    pub backend: VectorBackend,

    #[serde(default)]
    pub astra: AstraConfig,

    #[serde(default)]
    pub wide_column: WideColumnConfig,
}

fn default_vector_backend() -> VectorBackend {
    VectorBackend::Memory
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_vector_backend(),
            astra: AstraConfig::default(),
            wide_column: WideColumnConfig::default(),
        }
    }
}

/// Remote document-DB (Astra-style Data API) configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AstraConfig {
    /// API endpoint, e.g. `https://<db>.apps.astra.datastax.com`
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Application token
    #[serde(default, skip_serializing)]
    pub token: Option<String>,

    /// Fail instead of simulating when credentials are missing
    #[serde(default)]
    pub require_creds: bool,

    /// Force simulation mode even when credentials exist
    #[serde(default)]
    pub simulate: bool,

    /// Skip TLS verification (dev only)
    #[serde(default)]
    pub insecure: bool,

    /// Bounded-scan limit for queries and source grouping
    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,
}

fn default_scan_limit() -> usize {
    2000
}

/// Wide-column backend configuration
///
/// The keyspace/table pair names the backing table; contact points and
/// credentials are accepted for parity with cluster deployments but the
/// embedded engine only needs `database_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WideColumnConfig {
    #[serde(default = "default_keyspace")]
    pub keyspace: String,

    #[serde(default = "default_table")]
    pub table: String,

    /// sqlx database URL; defaults to a local file store
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default)]
    pub contact_points: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    #[serde(default)]
    pub consistency: Option<String>,

    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,
}

fn default_keyspace() -> String {
    "ttrpg".to_string()
}

fn default_table() -> String {
    "chunks".to_string()
}

impl Default for WideColumnConfig {
    fn default() -> Self {
        Self {
            keyspace: default_keyspace(),
            table: default_table(),
            database_url: None,
            contact_points: None,
            port: None,
            username: None,
            password: None,
            consistency: None,
            scan_limit: default_scan_limit(),
        }
    }
}

/// Dictionary store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DictionaryConfig {
    /// Remote endpoint; when absent the in-memory backend is used
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing)]
    pub token: Option<String>,

    /// Strict mode: missing credentials fail Pass E instead of skipping
    /// the dictionary back-fill
    #[serde(default)]
    pub strict: bool,
}

/// Graph export backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphBackend {
    Files,
    Neo4j,
}

impl Default for GraphBackend {
    fn default() -> Self {
        GraphBackend::Files
    }
}

/// Document graph configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default)]
    pub backend: GraphBackend,

    #[serde(default)]
    pub neo4j_uri: Option<String>,

    #[serde(default)]
    pub neo4j_user: Option<String>,

    #[serde(default, skip_serializing)]
    pub neo4j_password: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            env: EnvName::Dev,
            threads: default_threads(),
            artifacts_root: default_artifacts_root(),
            barrier_timeout_secs: default_barrier_timeout(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            vector_store: VectorStoreConfig::default(),
            dictionary: DictionaryConfig::default(),
            graph: GraphConfig::default(),
            ssl_no_verify: false,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    env_var(name).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
}

impl IngestConfig {
    /// Build configuration for an environment from process environment
    /// variables layered over the defaults
    pub fn from_env(env: EnvName) -> Result<Self> {
        let mut config = IngestConfig {
            env,
            ..Default::default()
        };

        if let Some(raw) = env_var("VECTOR_STORE_BACKEND") {
            config.vector_store.backend = raw.parse()?;
        }

        let astra = &mut config.vector_store.astra;
        astra.endpoint = env_var("ASTRA_DB_API_ENDPOINT");
        astra.token = env_var("ASTRA_DB_APPLICATION_TOKEN");
        if let Some(v) = env_bool("ASTRA_REQUIRE_CREDS") {
            astra.require_creds = v;
        }
        if let Some(v) = env_bool("ASTRA_SIMULATE") {
            astra.simulate = v;
        }
        if let Some(v) = env_bool("ASTRA_INSECURE") {
            astra.insecure = v;
        }

        let wide = &mut config.vector_store.wide_column;
        wide.contact_points = env_var("CASSANDRA_CONTACT_POINTS");
        wide.port = env_parse("CASSANDRA_PORT");
        if let Some(v) = env_var("CASSANDRA_KEYSPACE") {
            wide.keyspace = v;
        }
        if let Some(v) = env_var("CASSANDRA_TABLE") {
            wide.table = v;
        }
        wide.username = env_var("CASSANDRA_USERNAME");
        wide.password = env_var("CASSANDRA_PASSWORD");
        wide.consistency = env_var("CASSANDRA_CONSISTENCY");
        if let Some(v) = env_parse("CASSANDRA_VECTOR_SCAN_LIMIT") {
            wide.scan_limit = v;
        }

        let chunking = &mut config.chunking;
        if let Some(v) = env_parse("CHUNK_MAX_CHARS") {
            chunking.max_chars = v;
        }
        if let Some(v) = env_parse("CHUNK_HARD_CAP") {
            chunking.hard_cap = v;
        }
        if let Some(v) = env_parse("CHUNK_MIN_CHARS") {
            chunking.min_chars = v;
        }
        if let Some(v) = env_parse("CHUNK_OVERLAP") {
            chunking.overlap = v;
        }
        if let Some(v) = env_var("SPLIT_BY") {
            chunking.split_by = match v.as_str() {
                "sentence" => SplitBy::Sentence,
                _ => SplitBy::Word,
            };
        }

        let embedding = &mut config.embedding;
        if let Some(v) = env_parse("MODEL_DIM") {
            embedding.model_dim = v;
        }
        if let Some(v) = env_var("EMBED_DIM_REDUCTION") {
            embedding.reduction = v.parse()?;
        }
        if let Some(v) = env_bool("ABORT_ON_INCOMPATIBLE_VECTOR") {
            embedding.abort_on_incompatible = v;
        }
        embedding.api_key = env_var("OPENAI_API_KEY");

        if let Some(v) = env_var("GRAPH_BACKEND") {
            config.graph.backend = match v.as_str() {
                "neo4j" => GraphBackend::Neo4j,
                "files" => GraphBackend::Files,
                other => {
                    return Err(IngestError::Config(format!(
                        "unknown graph backend '{}'",
                        other
                    )))
                }
            };
        }
        config.graph.neo4j_uri = env_var("NEO4J_URI");
        config.graph.neo4j_user = env_var("NEO4J_USER");
        config.graph.neo4j_password = env_var("NEO4J_PASSWORD");

        // Dictionary shares the document-DB credentials
        config.dictionary.endpoint = config.vector_store.astra.endpoint.clone();
        config.dictionary.token = config.vector_store.astra.token.clone();
        config.dictionary.strict = config.vector_store.astra.require_creds;

        if let Some(v) = env_bool("SSL_NO_VERIFY") {
            config.ssl_no_verify = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON or TOML file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let config: Self = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(IngestError::Config(
                "thread count must be greater than 0".to_string(),
            ));
        }

        if self.embedding.model_dim == 0 {
            return Err(IngestError::Config(
                "embedding dimension must be greater than 0".to_string(),
            ));
        }

        if self.chunking.hard_cap < self.chunking.max_chars {
            return Err(IngestError::Config(format!(
                "chunk hard cap ({}) must be at least the soft target ({})",
                self.chunking.hard_cap, self.chunking.max_chars
            )));
        }

        if self.ssl_no_verify && self.env != EnvName::Dev {
            return Err(IngestError::Config(format!(
                "SSL_NO_VERIFY is only permitted in dev, not {}",
                self.env
            )));
        }

        if self.vector_store.astra.insecure && self.env != EnvName::Dev {
            return Err(IngestError::Config(format!(
                "ASTRA_INSECURE is only permitted in dev, not {}",
                self.env
            )));
        }

        Ok(())
    }

    /// Chunk collection name for the active environment
    pub fn collection_name(&self) -> String {
        format!("ttrpg_chunks_{}", self.env)
    }

    /// Dictionary collection name for the active environment
    pub fn dictionary_collection_name(&self) -> String {
        format!("ttrpg_dictionary_{}", self.env)
    }

    /// Root directory for this environment's job artifacts
    pub fn env_artifacts_dir(&self) -> PathBuf {
        self.artifacts_root.join("ingest").join(self.env.as_str())
    }
}
