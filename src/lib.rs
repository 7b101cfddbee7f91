//! Loreforge — six-pass PDF ingestion for TTRPG knowledge bases
//!
//! Ingests rulebook PDFs and produces a queryable knowledge base:
//! - a per-environment chunk store (text fragments with embeddings and
//!   metadata, behind pluggable vector-store backends),
//! - a dictionary store (named terms with definitions, categories, and
//!   cross-references),
//! - a document graph (sections → chunks plus cross-references between
//!   game elements).
//!
//! The core is the ingestion pipeline: six passes (A–F) per source PDF,
//! run under per-source barriers with fail-fast guardrails, resume
//! semantics, and post-run integrity validation.
//!
//! # Example
//!
//! ```rust,no_run
//! use loreforge::config::{EnvName, IngestConfig};
//! use loreforge::context::PipelineContext;
//! use loreforge::orchestrator::{IngestionPipeline, ProcessOptions};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env(EnvName::Dev)?;
//!     let ctx = PipelineContext::from_config(config).await?;
//!     let pipeline = IngestionPipeline::new(Arc::new(ctx));
//!
//!     let result = pipeline
//!         .process_source("uploads/players_handbook.pdf".as_ref(), &ProcessOptions::default())
//!         .await;
//!     println!("{} -> success: {}", result.source, result.success);
//!     Ok(())
//! }
//! ```

pub mod artifacts;
pub mod chunk;
pub mod config;
pub mod context;
pub mod dictionary;
pub mod driver;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod guardrails;
pub mod integrity;
pub mod manifest;
pub mod orchestrator;
pub mod partition;
pub mod passes;
pub mod pdf;
pub mod preflight;
pub mod toc;
pub mod vector_store;

// Re-export main types
pub use chunk::{ChunkStage, Coordinates, GraphRef, RawChunk, VectorizedChunk};
pub use config::{EnvName, IngestConfig, VectorBackend};
pub use context::PipelineContext;
pub use dictionary::{
    DictTerm, DictionaryStore, LlmDictionarySeeder, MemoryDictionaryStore, RemoteDictionaryStore,
};
pub use error::{IngestError, Result};
pub use graph::{CrossReference, EdgeType, GraphEdge, GraphNode, NodeType};
pub use guardrails::{GuardrailPolicy, GuardrailResult};
pub use manifest::{ArtifactRecord, Manifest, SourceInfo};
pub use orchestrator::{IngestionPipeline, ProcessOptions, SourceResult, StepTiming};
pub use partition::{PartitionOptions, PartitionedElement, Partitioner};
pub use passes::PassId;
pub use pdf::{DocumentOpener, DocumentSource, LopdfDocument, LopdfOpener};
pub use toc::{DocumentOutline, TocEntry, TocParser};
pub use vector_store::{
    AstraVectorStore, ChunkDocument, MemoryVectorStore, QueryFilters, QueryResult, VectorStore,
    WideColumnVectorStore,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}
