//! Chunk model across the pipeline stages
//!
//! A chunk is born raw in Pass C, gains an embedding and light enrichment
//! in Pass D, and is stamped with graph references in Pass E. The stage
//! label records which pass last wrote it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which pass last wrote a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStage {
    Raw,
    Vectorized,
    GraphEnriched,
}

impl ChunkStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStage::Raw => "raw",
            ChunkStage::Vectorized => "vectorized",
            ChunkStage::GraphEnriched => "graph_enriched",
        }
    }
}

/// Element placement on the page, when the extractor reports it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Raw chunk produced by Pass C
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawChunk {
    /// `{job_id}_c_{part}_{seq}`
    pub chunk_id: String,
    pub content: String,
    pub stage: ChunkStage,
    /// The producing job's ID
    pub source_id: String,
    pub section_id: String,
    pub page_span: String,
    pub toc_path: String,
    pub element_type: String,
    pub page_number: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

/// Graph reference attached to a chunk in Pass E
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRef {
    pub ref_id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub ref_type: String,
    pub confidence: f64,
}

/// Chunk after Pass D vectorisation; Pass E fills the graph fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorizedChunk {
    pub chunk_id: String,
    pub content: String,
    pub stage: ChunkStage,
    pub source_id: String,
    pub section_id: String,
    pub page_span: String,
    pub toc_path: String,
    pub element_type: String,
    pub page_number: usize,

    pub embedding: Vec<f32>,
    pub embedding_model: String,
    pub entities: Vec<String>,
    pub keywords: Vec<String>,
    /// SHA-256 of the content
    pub chunk_hash: String,
    /// `{job_id}_v_{chunk_hash[:12]}`
    pub vector_id: String,
    pub confidence_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_refs: Option<Vec<GraphRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toc_lineage: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_updated_at: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stage_serialization() {
        assert_eq!(
            serde_json::to_value(ChunkStage::GraphEnriched).unwrap(),
            json!("graph_enriched")
        );
        let stage: ChunkStage = serde_json::from_value(json!("raw")).unwrap();
        assert_eq!(stage, ChunkStage::Raw);
    }

    #[test]
    fn test_raw_chunk_round_trip() {
        let mut metadata = serde_json::Map::new();
        metadata.insert("part_index".into(), json!(1));
        metadata.insert("extraction_method".into(), json!("text_fallback"));

        let chunk = RawChunk {
            chunk_id: "job_1_abc_c_1_0001".into(),
            content: "A fighter gains proficiency with all armor.".into(),
            stage: ChunkStage::Raw,
            source_id: "job_1_abc".into(),
            section_id: "part_1_section_1".into(),
            page_span: "3".into(),
            toc_path: "Chapter 1 > Classes".into(),
            element_type: "text".into(),
            page_number: 3,
            coordinates: None,
            metadata,
        };

        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["stage"], json!("raw"));
        assert!(value.get("coordinates").is_none());

        let parsed: RawChunk = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.chunk_id, chunk.chunk_id);
        assert_eq!(parsed.metadata["part_index"], json!(1));
    }

    #[test]
    fn test_vectorized_chunk_graph_fields_optional() {
        let chunk = VectorizedChunk {
            chunk_id: "job_1_abc_c_1_0001".into(),
            content: "content".into(),
            stage: ChunkStage::Vectorized,
            source_id: "job_1_abc".into(),
            section_id: "s".into(),
            page_span: "1".into(),
            toc_path: String::new(),
            element_type: "text".into(),
            page_number: 1,
            embedding: vec![0.0; 4],
            embedding_model: "text-embedding-3-small".into(),
            entities: vec![],
            keywords: vec![],
            chunk_hash: "deadbeef".into(),
            vector_id: "job_1_abc_v_deadbeef".into(),
            confidence_score: 0.5,
            updated_at: None,
            coordinates: None,
            metadata: serde_json::Map::new(),
            graph_refs: None,
            toc_lineage: None,
            related_ids: None,
            graph_updated_at: None,
        };

        let value = serde_json::to_value(&chunk).unwrap();
        assert!(value.get("graph_refs").is_none());
        assert_eq!(value["embedding"].as_array().unwrap().len(), 4);
    }
}
