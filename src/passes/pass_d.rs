//! Pass D: vectorisation and light enrichment
//!
//! Normalises chunk sizes against the configured limits, deduplicates by
//! content hash, embeds, extracts entities and keywords, then upserts the
//! vectorised chunks in rate-limited batches. Embedding failures degrade
//! to zero vectors; a dimension mismatch fails the pass up front.

use crate::artifacts::{
    epoch_millis, epoch_seconds, sha256_hex, write_json_atomic, write_jsonl_atomic,
};
use crate::chunk::{ChunkStage, RawChunk, VectorizedChunk};
use crate::config::{ChunkingConfig, SplitBy};
use crate::context::PipelineContext;
use crate::embedding::preflight_embeddings;
use crate::error::{IngestError, Result};
use crate::manifest::Manifest;
use crate::passes::PassId;
use crate::vector_store::documents_from_chunks;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Chunks shorter than this are dropped before deduplication
const DEDUP_MIN_CHARS: usize = 100;

/// Chunks shorter than this are not worth enriching
const ENRICH_MIN_CHARS: usize = 50;

const UPSERT_BATCH_SIZE: usize = 50;
const INTER_BATCH_DELAY: Duration = Duration::from_millis(100);

/// Statistics from the enrichment run
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentStats {
    pub original_chunks: usize,
    pub normalized_chunks: usize,
    pub deduplicated_chunks: usize,
    pub merged_fragments: usize,
    pub vectorized_chunks: usize,
    pub entities_extracted: usize,
    pub keywords_extracted: usize,
    pub deduplication_ratio: f64,
    pub normalization_ratio: f64,
    pub processing_time_ms: i64,
}

impl EnrichmentStats {
    fn empty(processing_time_ms: i64) -> Self {
        Self {
            original_chunks: 0,
            normalized_chunks: 0,
            deduplicated_chunks: 0,
            merged_fragments: 0,
            vectorized_chunks: 0,
            entities_extracted: 0,
            keywords_extracted: 0,
            deduplication_ratio: 0.0,
            normalization_ratio: 1.0,
            processing_time_ms,
        }
    }
}

/// Result of Pass D vector enrichment
#[derive(Debug, Clone, Serialize)]
pub struct PassDResult {
    pub source_file: String,
    pub job_id: String,
    pub chunks_processed: usize,
    pub chunks_vectorized: usize,
    pub chunks_loaded: usize,
    pub enrichment_stats: EnrichmentStats,
    pub processing_time_ms: i64,
    pub artifacts: Vec<String>,
    pub manifest_path: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Run Pass D for one job
pub async fn process_pass_d(ctx: &PipelineContext, job_dir: &Path, job_id: &str) -> PassDResult {
    let started = epoch_millis();
    info!("Pass D starting: vector enrichment for job {}", job_id);

    match run(ctx, job_dir, job_id, started).await {
        Ok(result) => result,
        Err(e) => {
            warn!("Pass D failed for job {}: {}", job_id, e);
            let elapsed = epoch_millis() - started;
            PassDResult {
                source_file: String::new(),
                job_id: job_id.to_string(),
                chunks_processed: 0,
                chunks_vectorized: 0,
                chunks_loaded: 0,
                enrichment_stats: EnrichmentStats::empty(elapsed),
                processing_time_ms: elapsed,
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
) -> Result<PassDResult> {
    preflight_embeddings(&ctx.config.embedding)?;

    let chunks_file = job_dir.join(format!("{}_pass_c_raw_chunks.jsonl", job_id));
    if !chunks_file.exists() {
        return Err(IngestError::Pass {
            pass: 'D',
            message: format!("Pass C chunks file not found: {}", chunks_file.display()),
        });
    }

    let raw_chunks = load_raw_chunks(&chunks_file)?;
    info!("loaded {} raw chunks from Pass C", raw_chunks.len());

    let normalizer = ChunkNormalizer::new(ctx.config.chunking.clone());
    let normalized = normalizer.normalize_chunks(raw_chunks.clone());
    info!("after normalization: {} chunks", normalized.len());

    let deduplicated = deduplicate_chunks(normalized.clone());
    info!("after deduplication: {} chunks", deduplicated.len());

    let extractor = EntityExtractor::new();
    let mut vectorized: Vec<VectorizedChunk> = Vec::new();
    for chunk in &deduplicated {
        if let Some(enriched) = enrich_chunk(ctx, &extractor, chunk, job_id).await {
            vectorized.push(enriched);
        }
    }
    info!("vectorized {} chunks", vectorized.len());

    let stats = EnrichmentStats {
        original_chunks: raw_chunks.len(),
        normalized_chunks: normalized.len(),
        deduplicated_chunks: deduplicated.len(),
        merged_fragments: normalized.len().saturating_sub(deduplicated.len()),
        vectorized_chunks: vectorized.len(),
        entities_extracted: vectorized.iter().map(|c| c.entities.len()).sum(),
        keywords_extracted: vectorized.iter().map(|c| c.keywords.len()).sum(),
        deduplication_ratio: normalized.len().saturating_sub(deduplicated.len()) as f64
            / normalized.len().max(1) as f64,
        normalization_ratio: normalized.len() as f64 / raw_chunks.len().max(1) as f64,
        processing_time_ms: epoch_millis() - started,
    };

    let vectors_artifact_path = job_dir.join(format!("{}_pass_d_vectors.jsonl", job_id));
    write_jsonl_atomic(&vectorized, &vectors_artifact_path)?;

    let report_path = job_dir.join("enrichment_report.json");
    write_json_atomic(
        &json!({
            "job_id": job_id,
            "pass": "D",
            "created_at": epoch_seconds(),
            "enrichment_statistics": &stats,
        }),
        &report_path,
    )?;

    let manifest = Manifest::load(job_dir).ok();
    let source_file = manifest
        .as_ref()
        .map(|m| m.source_file.clone())
        .unwrap_or_default();
    let source_hash = manifest
        .as_ref()
        .map(|m| m.source_info.source_hash.clone())
        .unwrap_or_default();

    let chunks_loaded = batch_upsert_vectors(
        ctx,
        &vectorized,
        Some(&source_hash).filter(|h| !h.is_empty()).map(|s| s.as_str()),
        Some(&source_file).filter(|f| !f.is_empty()).map(|s| s.as_str()),
    )
    .await?;

    let processing_time_ms = epoch_millis() - started;
    let manifest_path = update_manifest(
        job_dir,
        json!({
            "chunks_processed": raw_chunks.len(),
            "chunks_vectorized": vectorized.len(),
            "chunks_loaded": chunks_loaded,
            "deduplication_ratio": stats.deduplication_ratio,
            "normalization_ratio": stats.normalization_ratio,
            "entities_extracted": stats.entities_extracted,
            "keywords_extracted": stats.keywords_extracted,
            "processing_time_ms": processing_time_ms,
            "success": true,
        }),
        &[vectors_artifact_path.as_path(), report_path.as_path()],
    )?;

    info!("Pass D completed for job {} in {}ms", job_id, processing_time_ms);

    Ok(PassDResult {
        source_file,
        job_id: job_id.to_string(),
        chunks_processed: raw_chunks.len(),
        chunks_vectorized: vectorized.len(),
        chunks_loaded,
        enrichment_stats: stats,
        processing_time_ms,
        artifacts: vec![
            vectors_artifact_path.to_string_lossy().into_owned(),
            report_path.to_string_lossy().into_owned(),
        ],
        manifest_path,
        success: true,
        error_message: None,
    })
}

fn load_raw_chunks(chunks_file: &Path) -> Result<Vec<RawChunk>> {
    let content = std::fs::read_to_string(chunks_file)?;
    let mut chunks = Vec::new();
    for (line_number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<RawChunk>(line) {
            Ok(chunk) => chunks.push(chunk),
            Err(e) => warn!("skipping invalid JSON on line {}: {}", line_number + 1, e),
        }
    }
    Ok(chunks)
}

/// Normalises chunk sizes before vectorisation
pub struct ChunkNormalizer {
    config: ChunkingConfig,
}

impl ChunkNormalizer {
    pub fn new(config: ChunkingConfig) -> Self {
        info!(
            "ChunkNormalizer initialized: max={}, hard_cap={}, min={}",
            config.max_chars, config.hard_cap, config.min_chars
        );
        Self { config }
    }

    /// Split oversized chunks, then merge undersized neighbours
    pub fn normalize_chunks(&self, raw_chunks: Vec<RawChunk>) -> Vec<RawChunk> {
        let mut normalized = Vec::new();
        let mut oversized = 0;
        let mut splits = 0;

        let total = raw_chunks.len();
        for chunk in raw_chunks {
            let text_len = chunk.content.chars().count();
            if text_len <= self.config.max_chars {
                normalized.push(chunk);
            } else {
                oversized += 1;
                let children = self.split_chunk(chunk);
                splits += children.len().saturating_sub(1);
                normalized.extend(children);
            }
        }

        let merged = self.merge_tiny_chunks(normalized);
        info!(
            "normalization complete: {} -> {} chunks, {} oversized, {} additional splits",
            total,
            merged.len(),
            oversized,
            splits
        );
        merged
    }

    fn split_chunk(&self, parent: RawChunk) -> Vec<RawChunk> {
        // Between the soft target and the hard cap the chunk stays whole
        if parent.content.chars().count() <= self.config.hard_cap {
            return vec![parent];
        }

        let separator = match self.config.split_by {
            SplitBy::Word => " ",
            SplitBy::Sentence => ".",
        };
        let units: Vec<&str> = match self.config.split_by {
            SplitBy::Word => parent.content.split_whitespace().collect(),
            SplitBy::Sentence => parent.content.split('.').collect(),
        };

        let overlap_units = if self.config.overlap > 0 {
            (self.config.overlap / 20).max(1)
        } else {
            0
        };

        let mut children: Vec<RawChunk> = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_length = 0usize;

        for unit in units {
            let unit_length = unit.chars().count() + 1;
            if current_length + unit_length > self.config.max_chars && !current.is_empty() {
                let text = current.join(separator);
                children.push(self.child_chunk(&parent, text, children.len()));

                if overlap_units > 0 && current.len() > 1 {
                    let keep_from = current.len().saturating_sub(overlap_units);
                    let mut next: Vec<&str> = current[keep_from..].to_vec();
                    next.push(unit);
                    current_length = next.iter().map(|u| u.chars().count() + 1).sum();
                    current = next;
                } else {
                    current = vec![unit];
                    current_length = unit_length;
                }
            } else {
                current.push(unit);
                current_length += unit_length;
            }
        }

        if !current.is_empty() {
            let text = current.join(separator);
            children.push(self.child_chunk(&parent, text, children.len()));
        }

        if children.is_empty() {
            vec![parent]
        } else {
            children
        }
    }

    fn child_chunk(&self, parent: &RawChunk, text: String, index: usize) -> RawChunk {
        let mut child = parent.clone();
        child.metadata.insert(
            "parent_chunk_id".to_string(),
            Value::String(parent.chunk_id.clone()),
        );
        child
            .metadata
            .insert("chunk_index".to_string(), json!(index));
        child
            .metadata
            .insert("char_len".to_string(), json!(text.chars().count()));
        child.chunk_id = format!("{}_{}", parent.chunk_id, index);
        child.content = text;
        child
    }

    fn merge_tiny_chunks(&self, chunks: Vec<RawChunk>) -> Vec<RawChunk> {
        let mut merged: Vec<RawChunk> = Vec::new();
        let mut pending: Option<RawChunk> = None;

        for chunk in chunks {
            if chunk.content.chars().count() < self.config.min_chars {
                match pending.as_mut() {
                    None => pending = Some(chunk),
                    Some(previous) => {
                        let combined = format!("{} {}", previous.content, chunk.content);
                        if combined.chars().count() <= self.config.max_chars {
                            previous.content = combined;
                        } else {
                            let finished = std::mem::replace(previous, chunk);
                            merged.push(finished);
                        }
                    }
                }
            } else {
                if let Some(previous) = pending.take() {
                    merged.push(previous);
                }
                merged.push(chunk);
            }
        }

        if let Some(previous) = pending {
            merged.push(previous);
        }
        merged
    }
}

/// Deduplicate by content hash; the first occurrence wins and duplicates
/// contribute their page span
pub fn deduplicate_chunks(chunks: Vec<RawChunk>) -> Vec<RawChunk> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut deduplicated: Vec<RawChunk> = Vec::new();

    for chunk in chunks {
        let content = chunk.content.trim().to_string();
        if content.chars().count() < DEDUP_MIN_CHARS {
            continue;
        }

        let content_hash = format!("{:x}", md5::compute(content.as_bytes()));
        match seen.get(&content_hash) {
            None => {
                seen.insert(content_hash, deduplicated.len());
                deduplicated.push(chunk);
            }
            Some(&index) => {
                let existing = &mut deduplicated[index];
                if !chunk.page_span.is_empty() && chunk.page_span != existing.page_span {
                    existing.page_span = format!("{},{}", existing.page_span, chunk.page_span);
                }
            }
        }
    }

    deduplicated
}

async fn enrich_chunk(
    ctx: &PipelineContext,
    extractor: &EntityExtractor,
    raw: &RawChunk,
    job_id: &str,
) -> Option<VectorizedChunk> {
    let content = raw.content.trim();
    if content.chars().count() < ENRICH_MIN_CHARS {
        return None;
    }

    let embedding = ctx.embedder.embed_or_zero(content).await;
    let entities = extractor.extract_entities(content);
    let keywords = extract_keywords(content);
    let chunk_hash = sha256_hex(content.as_bytes());
    let vector_id = format!("{}_v_{}", job_id, &chunk_hash[..12]);
    let confidence_score = (content.chars().count() as f64 / 2000.0).min(1.0);

    Some(VectorizedChunk {
        chunk_id: raw.chunk_id.clone(),
        content: content.to_string(),
        stage: ChunkStage::Vectorized,
        source_id: raw.source_id.clone(),
        section_id: raw.section_id.clone(),
        page_span: raw.page_span.clone(),
        toc_path: raw.toc_path.clone(),
        element_type: raw.element_type.clone(),
        page_number: raw.page_number,
        embedding,
        embedding_model: ctx.embedder.model_name().to_string(),
        entities,
        keywords,
        chunk_hash,
        vector_id,
        confidence_score,
        updated_at: Some(epoch_seconds()),
        coordinates: raw.coordinates,
        metadata: raw.metadata.clone(),
        graph_refs: None,
        toc_lineage: None,
        related_ids: None,
        graph_updated_at: None,
    })
}

/// Character classes recognised as entities
pub const CLASS_NAMES: [&str; 12] = [
    "Fighter",
    "Wizard",
    "Rogue",
    "Cleric",
    "Barbarian",
    "Ranger",
    "Paladin",
    "Sorcerer",
    "Warlock",
    "Bard",
    "Druid",
    "Monk",
];

struct EntityExtractor {
    spell_pattern: Regex,
    class_pattern: Regex,
    capitalized: Regex,
}

impl EntityExtractor {
    fn new() -> Self {
        Self {
            spell_pattern: Regex::new(r"\b[A-Z][a-z]+ (?:of|the) [A-Z][a-z]+\b")
                .expect("static pattern"),
            class_pattern: Regex::new(
                r"\b(?:Fighter|Wizard|Rogue|Cleric|Barbarian|Ranger|Paladin|Sorcerer|Warlock|Bard|Druid|Monk)\b",
            )
            .expect("static pattern"),
            capitalized: Regex::new(r"\b[A-Z][a-z]{2,}\b").expect("static pattern"),
        }
    }

    fn extract_entities(&self, text: &str) -> Vec<String> {
        let mut entities: BTreeSet<String> = BTreeSet::new();

        for m in self.spell_pattern.find_iter(text) {
            entities.insert(m.as_str().to_string());
        }
        for m in self.class_pattern.find_iter(text) {
            entities.insert(m.as_str().to_string());
        }
        for m in self.capitalized.find_iter(text).take(5) {
            if m.as_str().len() > 3 {
                entities.insert(m.as_str().to_string());
            }
        }

        entities.into_iter().take(10).collect()
    }
}

const TTRPG_KEYWORDS: [&str; 20] = [
    "spell",
    "magic",
    "combat",
    "attack",
    "damage",
    "heal",
    "armor",
    "weapon",
    "class",
    "race",
    "feat",
    "skill",
    "ability",
    "level",
    "experience",
    "dungeon",
    "monster",
    "treasure",
    "quest",
    "adventure",
];

const STOP_WORDS: [&str; 13] = [
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "her", "was", "one", "our",
];

fn extract_keywords(text: &str) -> Vec<String> {
    let text_lower = text.to_lowercase();
    let mut keywords: BTreeSet<String> = BTreeSet::new();

    for keyword in TTRPG_KEYWORDS {
        if text_lower.contains(keyword) {
            keywords.insert(keyword.to_string());
        }
    }

    let word_pattern = Regex::new(r"\b[a-z]{3,}\b").expect("static pattern");
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for m in word_pattern.find_iter(&text_lower) {
        let word = m.as_str();
        if !STOP_WORDS.contains(&word) {
            *counts.entry(word).or_insert(0) += 1;
        }
    }
    for (word, count) in counts {
        if count >= 2 {
            keywords.insert(word.to_string());
        }
    }

    keywords.into_iter().take(15).collect()
}

async fn batch_upsert_vectors(
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

    let mut loaded = 0;
    for (batch_index, batch) in documents.chunks(UPSERT_BATCH_SIZE).enumerate() {
        if batch_index > 0 {
            tokio::time::sleep(INTER_BATCH_DELAY).await;
        }
        match ctx.vector_store.upsert_documents(batch).await {
            Ok(count) => loaded += count,
            Err(e) => warn!("vector upsert batch {} failed: {}", batch_index + 1, e),
        }
    }

    if loaded < documents.len() {
        warn!(
            "partial vector load: {}/{} documents",
            loaded,
            documents.len()
        );
    }
    Ok(loaded)
}

fn update_manifest(job_dir: &Path, pass_d_results: Value, artifact_paths: &[&Path]) -> Result<String> {
    let mut manifest = Manifest::load(job_dir)?;
    manifest.mark_pass_complete(PassId::D);
    manifest.set_pass_results(PassId::D, pass_d_results);
    for path in artifact_paths {
        manifest.record_artifact(path)?;
    }
    let path = manifest.save(job_dir)?;
    Ok(path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(chunk_id: &str, content: &str) -> RawChunk {
        RawChunk {
            chunk_id: chunk_id.to_string(),
            content: content.to_string(),
            stage: ChunkStage::Raw,
            source_id: "job_1_abc".to_string(),
            section_id: "part_1_section_1".to_string(),
            page_span: "1".to_string(),
            toc_path: "Chapter 1".to_string(),
            element_type: "text".to_string(),
            page_number: 1,
            coordinates: None,
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_chunk_at_hard_cap_not_split() {
        let normalizer = ChunkNormalizer::new(ChunkingConfig::default());
        let content = "a".repeat(600);
        let result = normalizer.normalize_chunks(vec![raw("c1", &content)]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].chunk_id, "c1");
    }

    #[test]
    fn test_chunk_above_hard_cap_split() {
        let normalizer = ChunkNormalizer::new(ChunkingConfig::default());
        let word = "word ";
        let content = word.repeat(121).trim_end().to_string();
        assert!(content.chars().count() > 600);

        let result = normalizer.normalize_chunks(vec![raw("c1", &content)]);
        assert!(result.len() > 1);
        assert_eq!(result[0].chunk_id, "c1_0");
        assert_eq!(result[1].chunk_id, "c1_1");
        assert_eq!(result[0].metadata["parent_chunk_id"], json!("c1"));
        assert!(result
            .iter()
            .all(|c| c.content.chars().count() <= 600));
    }

    #[test]
    fn test_tiny_neighbours_merged() {
        let config = ChunkingConfig::default();
        let normalizer = ChunkNormalizer::new(config);
        let chunks = vec![raw("c1", &"a".repeat(40)), raw("c2", &"b".repeat(40))];
        let result = normalizer.normalize_chunks(chunks);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].content.chars().count(), 81);
    }

    #[test]
    fn test_deduplication_first_wins() {
        let content = format!("The rules for grappling. {}", "detail ".repeat(20));
        let mut second = raw("c2", &content);
        second.page_span = "9".to_string();

        let result = deduplicate_chunks(vec![raw("c1", &content), second]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].chunk_id, "c1");
        assert_eq!(result[0].page_span, "1,9");
    }

    #[test]
    fn test_deduplication_drops_short_chunks() {
        let result = deduplicate_chunks(vec![raw("c1", "short content")]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_entity_extraction() {
        let extractor = EntityExtractor::new();
        let entities = extractor.extract_entities(
            "The Wizard may cast Shield of Faith while the Fighter holds the line.",
        );
        assert!(entities.contains(&"Shield of Faith".to_string()));
        assert!(entities.contains(&"Wizard".to_string()));
        assert!(entities.contains(&"Fighter".to_string()));
        assert!(entities.len() <= 10);
    }

    #[test]
    fn test_keyword_extraction() {
        let keywords = extract_keywords(
            "The attack roll determines damage. Another attack follows; damage stacks with armor.",
        );
        assert!(keywords.contains(&"attack".to_string()));
        assert!(keywords.contains(&"damage".to_string()));
        assert!(keywords.contains(&"armor".to_string()));
        assert!(keywords.len() <= 15);
    }

    #[tokio::test]
    async fn test_enrich_chunk_fields() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = crate::config::IngestConfig::default();
        config.artifacts_root = dir.path().to_path_buf();
        let ctx = PipelineContext::from_config(config).await.unwrap();

        let extractor = EntityExtractor::new();
        let content = format!(
            "A Paladin prepares spells each morning. {}",
            "More combat detail follows. ".repeat(5)
        );
        let chunk = raw("job_1_abc_c_1_0001", &content);
        let enriched = enrich_chunk(&ctx, &extractor, &chunk, "job_1_abc")
            .await
            .unwrap();

        assert_eq!(enriched.stage, ChunkStage::Vectorized);
        assert_eq!(enriched.embedding.len(), 1024);
        assert_eq!(enriched.chunk_hash.len(), 64);
        assert!(enriched.vector_id.starts_with("job_1_abc_v_"));
        assert_eq!(enriched.vector_id.len(), "job_1_abc_v_".len() + 12);
        assert!(enriched.confidence_score > 0.0 && enriched.confidence_score <= 1.0);
        assert!(enriched.entities.contains(&"Paladin".to_string()));
    }

    #[tokio::test]
    async fn test_enrich_skips_short_content() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = crate::config::IngestConfig::default();
        config.artifacts_root = dir.path().to_path_buf();
        let ctx = PipelineContext::from_config(config).await.unwrap();

        let extractor = EntityExtractor::new();
        let chunk = raw("c1", "too short");
        assert!(enrich_chunk(&ctx, &extractor, &chunk, "job_1_abc")
            .await
            .is_none());
    }
}
