//! Error handling for the ingestion pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for the ingestion pipeline
pub type Result<T> = std::result::Result<T, IngestError>;

/// Main error type for the ingestion pipeline
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Vector store error: {0}")]
    Store(#[from] StoreError),

    #[error("Dictionary error: {0}")]
    Dictionary(String),

    #[error("Preflight error: {0}")]
    Preflight(#[from] PreflightError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pass {pass} failed: {message}")]
    Pass { pass: char, message: String },

    #[error("PDF error: {0}")]
    Pdf(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<lopdf::Error> for IngestError {
    fn from(err: lopdf::Error) -> Self {
        IngestError::Pdf(err.to_string())
    }
}

/// Errors raised by artifact persistence and validation
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact file does not exist: {0}")]
    Missing(PathBuf),

    #[error("artifact file is empty (0 bytes): {0}")]
    Empty(PathBuf),

    #[error("artifact file is suspiciously small ({size} bytes): {path}")]
    Truncated { path: PathBuf, size: u64 },

    #[error("invalid JSON in artifact {path}: {message}")]
    InvalidJson { path: PathBuf, message: String },

    #[error("artifact {path} missing required keys: {keys:?}")]
    MissingKeys { path: PathBuf, keys: Vec<String> },

    #[error("failed to load {path} after {attempts} attempts: {message}")]
    RetriesExhausted {
        path: PathBuf,
        attempts: u32,
        message: String,
    },
}

/// Errors raised by vector-store backends
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unsupported vector store backend: {0}")]
    UnsupportedBackend(String),

    #[error("missing credentials for {backend} backend: {detail}")]
    MissingCredentials {
        backend: &'static str,
        detail: String,
    },

    #[error("invalid embedding dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("upsert failed: {0}")]
    UpsertFailed(String),

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("backend request failed: {0}")]
    RequestFailed(String),
}

/// Errors raised by external-tool preflight checks
#[derive(Error, Debug)]
pub enum PreflightError {
    #[error("{tool} not found in PATH")]
    ToolMissing { tool: &'static str },

    #[error("{tool} is not functional: {detail}")]
    ToolNotFunctional { tool: &'static str, detail: String },
}

impl IngestError {
    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            IngestError::Artifact(_) => "artifact",
            IngestError::Store(_) => "store",
            IngestError::Dictionary(_) => "dictionary",
            IngestError::Preflight(_) => "preflight",
            IngestError::Config(_) => "config",
            IngestError::Pass { .. } => "pass",
            IngestError::Pdf(_) => "pdf",
            IngestError::Embedding(_) => "embedding",
            IngestError::Lock(_) => "lock",
            IngestError::Io(_) => "io",
            IngestError::Serialization(_) => "serialization",
            IngestError::Http(_) => "http",
            IngestError::Database(_) => "database",
        }
    }

    /// Check if the error is retryable (transient backend or network trouble)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::Http(_)
                | IngestError::Store(StoreError::RequestFailed(_))
                | IngestError::Store(StoreError::UpsertFailed(_))
        )
    }
}
