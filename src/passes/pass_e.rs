//! Pass E: document graph and cross-references
//!
//! Groups vectorised chunks into section nodes, extracts cross-references
//! between game elements (spells, feats, rules, classes), enriches chunks
//! with their graph neighbourhood, back-fills the dictionary from the
//! discovered elements, and snapshots the graph to disk. The optional
//! Neo4j export never fails the pass.

use crate::artifacts::{epoch_millis, epoch_seconds, write_json_atomic, write_jsonl_atomic};
use crate::chunk::{ChunkStage, GraphRef, VectorizedChunk};
use crate::context::PipelineContext;
use crate::dictionary::{DictTerm, TermSource};
use crate::error::{IngestError, Result};
use crate::graph::{CrossReference, EdgeType, GraphEdge, GraphNode, NodeType};
use crate::manifest::Manifest;
use crate::passes::pass_d::CLASS_NAMES;
use crate::passes::PassId;
use crate::vector_store::documents_from_chunks;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

const UPDATE_BATCH_SIZE: usize = 30;
const INTER_BATCH_DELAY: Duration = Duration::from_millis(100);

/// Confidence floor for alias-map membership
const ALIAS_CONFIDENCE: f64 = 0.7;

/// Result of Pass E graph building
#[derive(Debug, Clone, Serialize)]
pub struct PassEResult {
    pub source_file: String,
    pub job_id: String,
    pub graph_nodes: usize,
    pub graph_edges: usize,
    pub cross_references: usize,
    pub chunks_updated: usize,
    pub dictionary_updates: usize,
    pub processing_time_ms: i64,
    pub artifacts: Vec<String>,
    pub manifest_path: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Run Pass E for one job
pub async fn process_pass_e(ctx: &PipelineContext, job_dir: &Path, job_id: &str) -> PassEResult {
    let started = epoch_millis();
    info!("Pass E starting: graph build for job {}", job_id);

    match run(ctx, job_dir, job_id, started).await {
        Ok(result) => result,
        Err(e) => {
            warn!("Pass E failed for job {}: {}", job_id, e);
            PassEResult {
                source_file: String::new(),
                job_id: job_id.to_string(),
                graph_nodes: 0,
                graph_edges: 0,
                cross_references: 0,
                chunks_updated: 0,
                dictionary_updates: 0,
                processing_time_ms: epoch_millis() - started,
                artifacts: Vec::new(),
                manifest_path: String::new(),
                success: false,
                error_message: Some(e.to_string()),
            }
        }
    }
}

async fn run(
    ctx: &PipelineContext,
    job_dir: &Path,
    job_id: &str,
    started: i64,
) -> Result<PassEResult> {
    let vectors_file = job_dir.join(format!("{}_pass_d_vectors.jsonl", job_id));
    if !vectors_file.exists() {
        return Err(IngestError::Pass {
            pass: 'E',
            message: format!("Pass D vectors file not found: {}", vectors_file.display()),
        });
    }

    let chunks = load_vectorized_chunks(&vectors_file)?;
    info!("loaded {} vectorized chunks", chunks.len());

    let mut builder = GraphBuilder::new(job_id);
    builder.build_document_graph(&chunks);
    builder.build_toc_hierarchy(&chunks);
    builder.extract_cross_references(&chunks);
    info!(
        "graph built: {} nodes, {} edges, {} cross-references",
        builder.nodes.len(),
        builder.edges.len(),
        builder.cross_references.len()
    );

    let enriched = builder.enrich_chunks_with_graph(chunks);

    let manifest = Manifest::load(job_dir).ok();
    let source_file = manifest
        .as_ref()
        .map(|m| m.source_file.clone())
        .unwrap_or_default();
    let source_hash = manifest
        .as_ref()
        .map(|m| m.source_info.source_hash.clone())
        .unwrap_or_default();

    let chunks_updated = batch_update_chunks(
        ctx,
        &enriched,
        Some(&source_hash).filter(|h| !h.is_empty()).map(|s| s.as_str()),
        Some(&source_file).filter(|f| !f.is_empty()).map(|s| s.as_str()),
    )
    .await?;

    let dictionary_updates = update_dictionary_with_relations(ctx, &builder, job_id).await?;

    let snapshot_path = write_graph_snapshot(&builder, job_dir, job_id)?;
    let alias_path = write_alias_map(&builder, job_dir, job_id)?;
    let edges_path = write_relationship_edges(&builder, job_dir)?;

    if ctx.config.graph.backend == crate::config::GraphBackend::Neo4j {
        export_to_neo4j(ctx, &builder).await;
    }

    let processing_time_ms = epoch_millis() - started;
    let manifest_path = update_manifest(
        job_dir,
        json!({
            "graph_nodes": builder.nodes.len(),
            "graph_edges": builder.edges.len(),
            "cross_references": builder.cross_references.len(),
            "chunks_updated": chunks_updated,
            "dictionary_updates": dictionary_updates,
            "processing_time_ms": processing_time_ms,
            "success": true,
        }),
        &[
            snapshot_path.as_path(),
            alias_path.as_path(),
            edges_path.as_path(),
        ],
    )?;

    info!("Pass E completed for job {} in {}ms", job_id, processing_time_ms);

    Ok(PassEResult {
        source_file,
        job_id: job_id.to_string(),
        graph_nodes: builder.nodes.len(),
        graph_edges: builder.edges.len(),
        cross_references: builder.cross_references.len(),
        chunks_updated,
        dictionary_updates,
        processing_time_ms,
        artifacts: vec![
            snapshot_path.to_string_lossy().into_owned(),
            alias_path.to_string_lossy().into_owned(),
            edges_path.to_string_lossy().into_owned(),
        ],
        manifest_path,
        success: true,
        error_message: None,
    })
}

fn load_vectorized_chunks(vectors_file: &Path) -> Result<Vec<VectorizedChunk>> {
    let content = std::fs::read_to_string(vectors_file)?;
    let mut chunks = Vec::new();
    for (line_number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<VectorizedChunk>(line) {
            Ok(chunk) => chunks.push(chunk),
            Err(e) => warn!("skipping invalid JSON on line {}: {}", line_number + 1, e),
        }
    }
    Ok(chunks)
}

/// Accumulates the document graph for one job
pub struct GraphBuilder {
    job_id: String,
    pub nodes: BTreeMap<String, GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub cross_references: Vec<CrossReference>,
    patterns: CrossRefPatterns,
}

struct CrossRefPatterns {
    spell: Regex,
    class: Regex,
    feat: Regex,
    rule: Regex,
}

impl CrossRefPatterns {
    fn new() -> Self {
        let compile = |p: &str| Regex::new(p).expect("static pattern");
        Self {
            spell: compile(
                r"\b([A-Z][a-z]+(?: [A-Z][a-z]+)*) \(spell\)|(?:cast|casting) ([A-Z][a-z]+(?:[ -][A-Z][a-z]+)*)",
            ),
            class: compile(
                r"\b(Fighter|Wizard|Rogue|Cleric|Barbarian|Ranger|Paladin|Sorcerer|Warlock|Bard|Druid|Monk)\b",
            ),
            feat: compile(
                r"\b([A-Z][a-z]+ [A-Z][a-z]+) \(feat\)|gains? the ([A-Z][a-z]+ [A-Z][a-z]+) feat",
            ),
            rule: compile(r"\b(Attack of Opportunity|Sneak Attack|Rage|Spellcasting|Turn Undead)\b"),
        }
    }
}

impl GraphBuilder {
    pub fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            nodes: BTreeMap::new(),
            edges: Vec::new(),
            cross_references: Vec::new(),
            patterns: CrossRefPatterns::new(),
        }
    }

    /// Section nodes, chunk nodes, and containment edges
    pub fn build_document_graph(&mut self, chunks: &[VectorizedChunk]) {
        let mut sections: BTreeMap<String, Vec<&VectorizedChunk>> = BTreeMap::new();
        for chunk in chunks {
            let section_key = if chunk.toc_path.is_empty() {
                chunk.section_id.clone()
            } else {
                format!("{}:{}", chunk.toc_path, chunk.section_id)
            };
            sections.entry(section_key).or_default().push(chunk);
        }

        for (section_key, section_chunks) in sections {
            let (toc_path, section_id) = match section_key.split_once(':') {
                Some((path, id)) => (path.to_string(), id.to_string()),
                None => (String::new(), section_key.clone()),
            };

            let section_node_id = format!("section_{}", section_id);
            let mut section_metadata = serde_json::Map::new();
            section_metadata.insert("chunk_count".to_string(), json!(section_chunks.len()));
            section_metadata.insert("toc_path".to_string(), json!(&toc_path));
            section_metadata.insert("section_id".to_string(), json!(&section_id));

            let mut section_node = GraphNode {
                node_id: section_node_id.clone(),
                node_type: NodeType::Section,
                title: if toc_path.is_empty() {
                    format!("Section {}", section_id)
                } else {
                    toc_path.clone()
                },
                content: None,
                parent_id: None,
                children: Vec::new(),
                metadata: section_metadata,
            };

            for chunk in section_chunks {
                let mut chunk_metadata = serde_json::Map::new();
                chunk_metadata.insert("page_number".to_string(), json!(chunk.page_number));
                chunk_metadata.insert("element_type".to_string(), json!(&chunk.element_type));
                chunk_metadata
                    .insert("confidence_score".to_string(), json!(chunk.confidence_score));

                self.nodes.insert(
                    chunk.chunk_id.clone(),
                    GraphNode {
                        node_id: chunk.chunk_id.clone(),
                        node_type: NodeType::Chunk,
                        title: format!("Chunk {}", chunk.chunk_id),
                        content: Some(chunk.content.chars().take(200).collect()),
                        parent_id: Some(section_node_id.clone()),
                        children: Vec::new(),
                        metadata: chunk_metadata,
                    },
                );

                section_node.children.push(chunk.chunk_id.clone());
                self.edges.push(GraphEdge {
                    edge_id: format!("contains_{}_{}", section_node_id, chunk.chunk_id),
                    source_id: section_node_id.clone(),
                    target_id: chunk.chunk_id.clone(),
                    edge_type: EdgeType::Contains,
                    weight: 1.0,
                    metadata: None,
                });
            }

            self.nodes.insert(section_node_id, section_node);
        }
    }

    /// Hierarchy edges between synthetic ToC-path nodes
    pub fn build_toc_hierarchy(&mut self, chunks: &[VectorizedChunk]) {
        let toc_paths: BTreeSet<&str> = chunks
            .iter()
            .map(|c| c.toc_path.as_str())
            .filter(|p| p.contains(" > "))
            .collect();

        for toc_path in toc_paths {
            let parts: Vec<&str> = toc_path.split(" > ").collect();
            for i in 0..parts.len() - 1 {
                let parent_path = parts[..=i].join(" > ");
                let child_path = parts[..=i + 1].join(" > ");

                let parent_node_id = format!("toc_{}", parent_path.replace(' ', "_").to_lowercase());
                let child_node_id = format!("toc_{}", child_path.replace(' ', "_").to_lowercase());

                let mut metadata = serde_json::Map::new();
                metadata.insert("level_diff".to_string(), json!(1));
                self.edges.push(GraphEdge {
                    edge_id: format!("hierarchy_{}_{}", parent_node_id, child_node_id),
                    source_id: parent_node_id,
                    target_id: child_node_id,
                    edge_type: EdgeType::Hierarchy,
                    weight: 1.0,
                    metadata: Some(metadata),
                });
            }
        }
    }

    /// Four regex sweeps per chunk, pairing found elements with classes
    pub fn extract_cross_references(&mut self, chunks: &[VectorizedChunk]) {
        for chunk in chunks {
            let content = &chunk.content;

            let mut spells: BTreeSet<String> = BTreeSet::new();
            for caps in self.patterns.spell.captures_iter(content) {
                if let Some(name) = caps.get(1).or_else(|| caps.get(2)) {
                    spells.insert(name.as_str().to_string());
                }
            }

            let classes: BTreeSet<String> = self
                .patterns
                .class
                .find_iter(content)
                .map(|m| m.as_str().to_string())
                .collect();

            let mut feats: BTreeSet<String> = BTreeSet::new();
            for caps in self.patterns.feat.captures_iter(content) {
                if let Some(name) = caps.get(1).or_else(|| caps.get(2)) {
                    feats.insert(name.as_str().to_string());
                }
            }

            let rules: BTreeSet<String> = self
                .patterns
                .rule
                .find_iter(content)
                .map(|m| m.as_str().to_string())
                .collect();

            let context: String = content.chars().take(200).collect();
            let mut ref_counter = 0usize;
            let mut push_refs =
                |found: &BTreeSet<String>, ref_type: EdgeType, confidence: f64,
                 refs: &mut Vec<CrossReference>, counter: &mut usize| {
                    for element in found {
                        for class_name in &classes {
                            refs.push(CrossReference {
                                ref_id: format!("{}_ref_{}", chunk.chunk_id, counter),
                                source_element: element.clone(),
                                target_element: class_name.clone(),
                                ref_type,
                                confidence,
                                context: context.clone(),
                            });
                            *counter += 1;
                        }
                    }
                };

            push_refs(
                &spells,
                EdgeType::SpellToClass,
                0.7,
                &mut self.cross_references,
                &mut ref_counter,
            );
            push_refs(
                &feats,
                EdgeType::FeatToClass,
                0.8,
                &mut self.cross_references,
                &mut ref_counter,
            );
            push_refs(
                &rules,
                EdgeType::RuleToClass,
                0.6,
                &mut self.cross_references,
                &mut ref_counter,
            );
        }
    }

    /// Stamp each chunk with its graph neighbourhood
    pub fn enrich_chunks_with_graph(&self, chunks: Vec<VectorizedChunk>) -> Vec<VectorizedChunk> {
        let now = epoch_seconds();
        chunks
            .into_iter()
            .map(|mut chunk| {
                let mut toc_lineage = Vec::new();
                if let Some(parent_id) = self
                    .nodes
                    .get(&chunk.chunk_id)
                    .and_then(|node| node.parent_id.as_ref())
                {
                    if let Some(parent) = self.nodes.get(parent_id) {
                        toc_lineage.push(parent.title.clone());
                    }
                }

                let mut graph_refs = Vec::new();
                let mut related_ids: Vec<String> = Vec::new();
                for reference in self
                    .cross_references
                    .iter()
                    .filter(|r| r.ref_id.contains(&chunk.chunk_id))
                {
                    graph_refs.push(GraphRef {
                        ref_id: reference.ref_id.clone(),
                        source: reference.source_element.clone(),
                        target: reference.target_element.clone(),
                        ref_type: reference.ref_type.as_str().to_string(),
                        confidence: reference.confidence,
                    });
                    if !related_ids.contains(&reference.source_element) {
                        related_ids.push(reference.source_element.clone());
                    }
                    if !related_ids.contains(&reference.target_element) {
                        related_ids.push(reference.target_element.clone());
                    }
                }
                related_ids.truncate(10);

                chunk.stage = ChunkStage::GraphEnriched;
                chunk.graph_refs = Some(graph_refs);
                chunk.toc_lineage = Some(toc_lineage);
                chunk.related_ids = Some(related_ids);
                chunk.graph_updated_at = Some(now);
                chunk
            })
            .collect()
    }

    /// Dictionary terms for the unique elements in the cross-references
    pub fn dictionary_terms(&self) -> Vec<DictTerm> {
        let mut elements: BTreeSet<String> = BTreeSet::new();
        let mut relations: Vec<Value> = Vec::new();
        for reference in &self.cross_references {
            elements.insert(reference.source_element.clone());
            elements.insert(reference.target_element.clone());
            relations.push(json!({
                "source": &reference.source_element,
                "target": &reference.target_element,
                "relationship": reference.ref_type.as_str(),
                "confidence": reference.confidence,
            }));
        }

        elements
            .into_iter()
            .map(|element| {
                let element_lower = element.to_lowercase();
                let category = if ["spell", "magic", "cast"]
                    .iter()
                    .any(|w| element_lower.contains(w))
                {
                    "spells"
                } else if CLASS_NAMES.contains(&element.as_str()) {
                    "classes"
                } else if element_lower.contains("feat") {
                    "feats"
                } else if ["attack", "combat", "action"]
                    .iter()
                    .any(|w| element_lower.contains(w))
                {
                    "mechanics"
                } else {
                    "general"
                };

                let element_relations: Vec<Value> = relations
                    .iter()
                    .filter(|r| {
                        r["source"].as_str() == Some(element.as_str())
                            || r["target"].as_str() == Some(element.as_str())
                    })
                    .take(3)
                    .cloned()
                    .collect();

                DictTerm {
                    term: element,
                    definition: format!(
                        "Game element extracted from cross-reference analysis (category: {})",
                        category
                    ),
                    category: category.to_string(),
                    sources: vec![TermSource {
                        source: self.job_id.clone(),
                        method: "graph_extraction".to_string(),
                        page: None,
                        section_id: None,
                        level: None,
                        relations: Some(element_relations),
                    }],
                }
            })
            .collect()
    }
}

async fn batch_update_chunks(
    ctx: &PipelineContext,
    chunks: &[VectorizedChunk],
    source_hash: Option<&str>,
    source_file: Option<&str>,
) -> Result<usize> {
    if chunks.is_empty() {
        return Ok(0);
    }

    let values: Vec<Value> = chunks
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<_, _>>()?;
    let documents =
        documents_from_chunks(&values, ctx.config.env.as_str(), source_hash, source_file);

    let mut updated = 0;
    for (batch_index, batch) in documents.chunks(UPDATE_BATCH_SIZE).enumerate() {
        if batch_index > 0 {
            tokio::time::sleep(INTER_BATCH_DELAY).await;
        }
        match ctx.vector_store.upsert_documents(batch).await {
            Ok(count) => updated += count,
            Err(e) => warn!("graph enrichment batch {} failed: {}", batch_index + 1, e),
        }
    }
    Ok(updated)
}

async fn update_dictionary_with_relations(
    ctx: &PipelineContext,
    builder: &GraphBuilder,
    job_id: &str,
) -> Result<usize> {
    let terms = builder.dictionary_terms();
    if terms.is_empty() {
        return Ok(0);
    }

    if !ctx.dictionary.available() {
        if ctx.config.dictionary.strict {
            return Err(IngestError::Dictionary(
                "dictionary credentials missing; cannot update dictionary in strict mode"
                    .to_string(),
            ));
        }
        warn!(
            "dictionary unavailable; skipping {} relation terms for job {}",
            terms.len(),
            job_id
        );
        return Ok(0);
    }

    ctx.dictionary.upsert_terms(&terms).await
}

fn write_graph_snapshot(
    builder: &GraphBuilder,
    job_dir: &Path,
    job_id: &str,
) -> Result<std::path::PathBuf> {
    let snapshot_path = job_dir.join("graph_snapshot.json");
    write_json_atomic(
        &json!({
            "job_id": job_id,
            "pass": "E",
            "created_at": epoch_seconds(),
            "graph_summary": {
                "nodes": builder.nodes.len(),
                "edges": builder.edges.len(),
                "cross_references": builder.cross_references.len(),
            },
            "nodes": &builder.nodes,
            "edges": &builder.edges,
            "cross_references": &builder.cross_references,
        }),
        &snapshot_path,
    )?;
    info!("wrote graph snapshot to {}", snapshot_path.display());
    Ok(snapshot_path)
}

fn write_alias_map(
    builder: &GraphBuilder,
    job_dir: &Path,
    job_id: &str,
) -> Result<std::path::PathBuf> {
    let mut aliases: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for reference in &builder.cross_references {
        if reference.confidence >= ALIAS_CONFIDENCE {
            aliases
                .entry(reference.source_element.clone())
                .or_default()
                .insert(reference.target_element.clone());
            aliases
                .entry(reference.target_element.clone())
                .or_default()
                .insert(reference.source_element.clone());
        }
    }

    let alias_path = job_dir.join("alias_map.json");
    write_json_atomic(
        &json!({
            "job_id": job_id,
            "created_at": epoch_seconds(),
            "aliases": aliases,
        }),
        &alias_path,
    )?;
    info!("wrote alias map to {}", alias_path.display());
    Ok(alias_path)
}

fn write_relationship_edges(builder: &GraphBuilder, job_dir: &Path) -> Result<std::path::PathBuf> {
    let edges_path = job_dir.join("relationship_edges.jsonl");

    let mut rows: Vec<Value> = Vec::new();
    for edge in &builder.edges {
        let mut row = serde_json::to_value(edge)?;
        row["source_type"] = json!("graph");
        rows.push(row);
    }
    for reference in &builder.cross_references {
        rows.push(json!({
            "edge_id": format!("xref_{}", reference.ref_id),
            "source_id": &reference.source_element,
            "target_id": &reference.target_element,
            "edge_type": reference.ref_type.as_str(),
            "weight": reference.confidence,
            "source_type": "cross_reference",
            "metadata": {"context": &reference.context},
        }));
    }

    write_jsonl_atomic(&rows, &edges_path)?;
    info!("wrote {} relationship edges to {}", rows.len(), edges_path.display());
    Ok(edges_path)
}

/// Best-effort export over the Neo4j HTTP transaction API
async fn export_to_neo4j(ctx: &PipelineContext, builder: &GraphBuilder) {
    let graph = &ctx.config.graph;
    let (uri, user, password) = match (&graph.neo4j_uri, &graph.neo4j_user, &graph.neo4j_password)
    {
        (Some(uri), Some(user), Some(password)) => (uri, user, password),
        _ => {
            warn!("neo4j backend selected but credentials incomplete; skipping export");
            return;
        }
    };
    if !uri.starts_with("http") {
        warn!("neo4j export requires an http(s) URI, got {}; skipping", uri);
        return;
    }

    let mut statements: Vec<Value> = Vec::new();
    for node in builder.nodes.values() {
        statements.push(json!({
            "statement": "MERGE (n:GraphNode {node_id: $node_id}) SET n.title = $title, n.node_type = $node_type",
            "parameters": {
                "node_id": &node.node_id,
                "title": &node.title,
                "node_type": node.node_type,
            }
        }));
    }
    for edge in &builder.edges {
        statements.push(json!({
            "statement": "MATCH (a:GraphNode {node_id: $source}), (b:GraphNode {node_id: $target}) \
                          MERGE (a)-[r:RELATED {edge_type: $edge_type}]->(b) SET r.weight = $weight",
            "parameters": {
                "source": &edge.source_id,
                "target": &edge.target_id,
                "edge_type": edge.edge_type.as_str(),
                "weight": edge.weight,
            }
        }));
    }

    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            warn!("neo4j client build failed: {}", e);
            return;
        }
    };

    let url = format!("{}/db/neo4j/tx/commit", uri.trim_end_matches('/'));
    match client
        .post(&url)
        .basic_auth(user, Some(password))
        .json(&json!({"statements": statements}))
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => {
            info!("exported {} statements to neo4j", statements.len());
        }
        Ok(response) => warn!("neo4j export returned {}", response.status()),
        Err(e) => warn!("neo4j export failed: {}", e),
    }
}

fn update_manifest(job_dir: &Path, pass_e_results: Value, artifact_paths: &[&Path]) -> Result<String> {
    let mut manifest = Manifest::load(job_dir)?;
    manifest.mark_pass_complete(PassId::E);
    manifest.set_pass_results(PassId::E, pass_e_results);
    for path in artifact_paths {
        manifest.record_artifact(path)?;
    }
    let path = manifest.save(job_dir)?;
    Ok(path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(chunk_id: &str, content: &str, toc_path: &str, section_id: &str) -> VectorizedChunk {
        VectorizedChunk {
            chunk_id: chunk_id.to_string(),
            content: content.to_string(),
            stage: ChunkStage::Vectorized,
            source_id: "job_1_abc".to_string(),
            section_id: section_id.to_string(),
            page_span: "1".to_string(),
            toc_path: toc_path.to_string(),
            element_type: "text".to_string(),
            page_number: 1,
            embedding: vec![0.0; 4],
            embedding_model: "text-embedding-3-small".to_string(),
            entities: Vec::new(),
            keywords: Vec::new(),
            chunk_hash: "hash".to_string(),
            vector_id: "v".to_string(),
            confidence_score: 0.5,
            updated_at: None,
            coordinates: None,
            metadata: serde_json::Map::new(),
            graph_refs: None,
            toc_lineage: None,
            related_ids: None,
            graph_updated_at: None,
        }
    }

    #[test]
    fn test_section_and_chunk_nodes() {
        let chunks = vec![
            chunk("c1", "first chunk", "Chapter 1 > Combat", "part_1_section_1"),
            chunk("c2", "second chunk", "Chapter 1 > Combat", "part_1_section_1"),
        ];
        let mut builder = GraphBuilder::new("job_1_abc");
        builder.build_document_graph(&chunks);

        let section = builder.nodes.get("section_part_1_section_1").unwrap();
        assert_eq!(section.node_type, NodeType::Section);
        assert_eq!(section.title, "Chapter 1 > Combat");
        assert_eq!(section.children, vec!["c1", "c2"]);

        let chunk_node = builder.nodes.get("c1").unwrap();
        assert_eq!(chunk_node.node_type, NodeType::Chunk);
        assert_eq!(
            chunk_node.parent_id.as_deref(),
            Some("section_part_1_section_1")
        );

        let contains: Vec<&GraphEdge> = builder
            .edges
            .iter()
            .filter(|e| e.edge_type == EdgeType::Contains)
            .collect();
        assert_eq!(contains.len(), 2);
        assert!(contains.iter().all(|e| (e.weight - 1.0).abs() < f64::EPSILON));
    }

    #[test]
    fn test_toc_hierarchy_edges() {
        let chunks = vec![chunk(
            "c1",
            "text",
            "Chapter 1 > Combat > Actions",
            "s1",
        )];
        let mut builder = GraphBuilder::new("job_1_abc");
        builder.build_toc_hierarchy(&chunks);

        let hierarchy: Vec<&GraphEdge> = builder
            .edges
            .iter()
            .filter(|e| e.edge_type == EdgeType::Hierarchy)
            .collect();
        assert_eq!(hierarchy.len(), 2);
        assert_eq!(hierarchy[0].source_id, "toc_chapter_1");
        assert_eq!(hierarchy[0].target_id, "toc_chapter_1_>_combat");
    }

    #[test]
    fn test_cross_reference_extraction() {
        let content = "A Cleric casting Shield of Faith gains the Combat Casting feat. \
                       Sneak Attack also applies when the Rogue flanks.";
        let chunks = vec![chunk("c1", content, "", "s1")];
        let mut builder = GraphBuilder::new("job_1_abc");
        builder.extract_cross_references(&chunks);

        let types: BTreeSet<EdgeType> = builder
            .cross_references
            .iter()
            .map(|r| r.ref_type)
            .collect();
        assert!(types.contains(&EdgeType::SpellToClass));
        assert!(types.contains(&EdgeType::FeatToClass));
        assert!(types.contains(&EdgeType::RuleToClass));

        let spell_ref = builder
            .cross_references
            .iter()
            .find(|r| r.ref_type == EdgeType::SpellToClass)
            .unwrap();
        assert!((spell_ref.confidence - 0.7).abs() < f64::EPSILON);
        assert!(spell_ref.ref_id.starts_with("c1_ref_"));
        assert!(spell_ref.context.chars().count() <= 200);
    }

    #[test]
    fn test_chunk_enrichment() {
        let content = "The Rogue uses Sneak Attack in combat.";
        let chunks = vec![chunk("c1", content, "Chapter 3 > Rogue", "s1")];
        let mut builder = GraphBuilder::new("job_1_abc");
        builder.build_document_graph(&chunks);
        builder.extract_cross_references(&chunks);

        let enriched = builder.enrich_chunks_with_graph(chunks);
        let first = &enriched[0];
        assert_eq!(first.stage, ChunkStage::GraphEnriched);
        assert_eq!(
            first.toc_lineage.as_deref(),
            Some(&["Chapter 3 > Rogue".to_string()][..])
        );
        let refs = first.graph_refs.as_ref().unwrap();
        assert!(!refs.is_empty());
        let related = first.related_ids.as_ref().unwrap();
        assert!(related.contains(&"Sneak Attack".to_string()));
        assert!(related.contains(&"Rogue".to_string()));
        assert!(related.len() <= 10);
        assert!(first.graph_updated_at.is_some());
    }

    #[test]
    fn test_dictionary_terms_from_cross_references() {
        let content = "The Rogue uses Sneak Attack in combat.";
        let chunks = vec![chunk("c1", content, "", "s1")];
        let mut builder = GraphBuilder::new("job_1_abc");
        builder.extract_cross_references(&chunks);

        let terms = builder.dictionary_terms();
        let by_name: BTreeMap<&str, &DictTerm> =
            terms.iter().map(|t| (t.term.as_str(), t)).collect();
        assert_eq!(by_name["Rogue"].category, "classes");
        assert_eq!(by_name["Sneak Attack"].category, "mechanics");
        assert_eq!(by_name["Rogue"].sources[0].method, "graph_extraction");
        let relations = by_name["Rogue"].sources[0].relations.as_ref().unwrap();
        assert!(relations.len() <= 3);
    }
}
