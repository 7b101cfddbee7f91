//! Document graph model
//!
//! Nodes and edges are keyed by string IDs; children are stored as ID
//! lists so the graph stays cycle-free from an ownership perspective and
//! serialises directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Section,
    Chunk,
    Entity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Contains,
    Hierarchy,
    References,
    RelatesTo,
    SpellToClass,
    FeatToClass,
    RuleToClass,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Contains => "contains",
            EdgeType::Hierarchy => "hierarchy",
            EdgeType::References => "references",
            EdgeType::RelatesTo => "relates_to",
            EdgeType::SpellToClass => "spell_to_class",
            EdgeType::FeatToClass => "feat_to_class",
            EdgeType::RuleToClass => "rule_to_class",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub node_id: String,
    pub node_type: NodeType,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub edge_id: String,
    pub source_id: String,
    pub target_id: String,
    pub edge_type: EdgeType,
    /// In [0, 1]
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, Value>>,
}

/// Relationship between two named game elements found in chunk text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossReference {
    pub ref_id: String,
    pub source_element: String,
    pub target_element: String,
    pub ref_type: EdgeType,
    /// In [0, 1]
    pub confidence: f64,
    /// First 200 characters of the chunk the reference was found in
    pub context: String,
}
