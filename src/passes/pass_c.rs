//! Pass C: raw extraction
//!
//! Partitions each unit (split parts, or the whole PDF) into
//! section-aware raw chunks via the external extractor, with a text-layer
//! fallback when the extractor is unavailable or fails. Chunks are
//! persisted to the vector store at stage `raw` and mirrored into a JSONL
//! artifact.

use crate::artifacts::{epoch_millis, load_json, write_jsonl_atomic};
use crate::chunk::{ChunkStage, RawChunk};
use crate::context::PipelineContext;
use crate::error::Result;
use crate::manifest::Manifest;
use crate::partition::PartitionOptions;
use crate::passes::PassId;
use crate::vector_store::documents_from_chunks;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Minimum content length for a retained chunk
const MIN_CHUNK_CHARS: usize = 50;

/// Minimum text-layer page length before paragraph extraction
const MIN_PAGE_CHARS: usize = 100;

const TEXT_FALLBACK_METHOD: &str = "text_fallback";

/// One extraction unit: a split part or the whole document
#[derive(Debug, Clone)]
struct ExtractionUnit {
    path: PathBuf,
    page_start: usize,
    page_end: usize,
    section_titles: Vec<String>,
}

/// Result of Pass C extraction
#[derive(Debug, Clone, Serialize)]
pub struct PassCResult {
    pub source_file: String,
    pub job_id: String,
    pub chunks_extracted: usize,
    pub chunks_loaded: usize,
    pub parts_processed: usize,
    pub extraction_method: String,
    pub processing_time_ms: i64,
    pub artifacts: Vec<String>,
    pub manifest_path: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Run Pass C for one source
pub async fn process_pass_c(
    ctx: &PipelineContext,
    pdf_path: &Path,
    job_dir: &Path,
    job_id: &str,
) -> PassCResult {
    let started = epoch_millis();
    let source_file = pdf_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    info!("Pass C starting: raw extraction for {}", source_file);

    match run(ctx, pdf_path, job_dir, job_id, &source_file, started).await {
        Ok(result) => result,
        Err(e) => {
            warn!("Pass C failed for {}: {}", source_file, e);
            PassCResult {
                source_file,
                job_id: job_id.to_string(),
                chunks_extracted: 0,
                chunks_loaded: 0,
                parts_processed: 0,
                extraction_method: String::new(),
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
    pdf_path: &Path,
    job_dir: &Path,
    job_id: &str,
    source_file: &str,
    started: i64,
) -> Result<PassCResult> {
    std::fs::create_dir_all(job_dir)?;

    let units = discover_units(ctx, pdf_path, job_dir)?;
    info!("processing {} extraction unit(s)", units.len());

    let mut all_chunks: Vec<RawChunk> = Vec::new();
    let mut extraction_method = TEXT_FALLBACK_METHOD.to_string();
    for (index, unit) in units.iter().enumerate() {
        let part_index = index + 1;
        info!(
            "extracting from part {}/{}: {}",
            part_index,
            units.len(),
            unit.path.display()
        );
        let (chunks, method) = extract_from_unit(ctx, unit, job_id, part_index).await;
        if method != TEXT_FALLBACK_METHOD {
            extraction_method = method;
        }
        all_chunks.extend(chunks);
    }
    info!("extracted {} raw chunks total", all_chunks.len());

    // JSONL artifact mirrors what was loaded
    let chunks_artifact_path = job_dir.join(format!("{}_pass_c_raw_chunks.jsonl", job_id));
    write_jsonl_atomic(&all_chunks, &chunks_artifact_path)?;

    // Persist at stage raw; loading failures degrade to a partial count
    let manifest = Manifest::load(job_dir).ok();
    let source_hash = manifest
        .as_ref()
        .map(|m| m.source_info.source_hash.clone())
        .unwrap_or_default();
    let chunk_values: Vec<Value> = all_chunks
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<_, _>>()?;
    let documents = documents_from_chunks(
        &chunk_values,
        ctx.config.env.as_str(),
        Some(&source_hash).filter(|h| !h.is_empty()).map(|s| s.as_str()),
        Some(source_file),
    );
    let chunks_loaded = if documents.is_empty() {
        0
    } else {
        match ctx.vector_store.upsert_documents(&documents).await {
            Ok(count) => count,
            Err(e) => {
                warn!("failed to load chunks to vector store: {}", e);
                0
            }
        }
    };

    let processing_time_ms = epoch_millis() - started;
    let manifest_path = update_manifest(
        ctx,
        pdf_path,
        job_dir,
        job_id,
        json!({
            "chunks_extracted": all_chunks.len(),
            "chunks_loaded": chunks_loaded,
            "parts_processed": units.len(),
            "extraction_method": &extraction_method,
            "collection_name": ctx.config.collection_name(),
            "success": true,
        }),
        &chunks_artifact_path,
    )?;

    info!(
        "Pass C completed for {} in {}ms",
        source_file, processing_time_ms
    );

    Ok(PassCResult {
        source_file: source_file.to_string(),
        job_id: job_id.to_string(),
        chunks_extracted: all_chunks.len(),
        chunks_loaded,
        parts_processed: units.len(),
        extraction_method,
        processing_time_ms,
        artifacts: vec![chunks_artifact_path.to_string_lossy().into_owned()],
        manifest_path,
        success: true,
        error_message: None,
    })
}

/// Units come from split_index.json when Pass B split the file
fn discover_units(
    ctx: &PipelineContext,
    pdf_path: &Path,
    job_dir: &Path,
) -> Result<Vec<ExtractionUnit>> {
    let split_index_path = job_dir.join("split_index.json");
    if split_index_path.exists() {
        let split_data = load_json(&split_index_path)?;
        let mut units = Vec::new();
        if let Some(parts) = split_data["parts"].as_array() {
            for part in parts {
                let path = PathBuf::from(part["file_path"].as_str().unwrap_or_default());
                if !path.exists() {
                    warn!("split part missing on disk: {}", path.display());
                    continue;
                }
                units.push(ExtractionUnit {
                    path,
                    page_start: part["page_start"].as_u64().unwrap_or(1) as usize,
                    page_end: part["page_end"].as_u64().unwrap_or(1) as usize,
                    section_titles: part["section_titles"]
                        .as_array()
                        .map(|titles| {
                            titles
                                .iter()
                                .filter_map(|t| t.as_str().map(|s| s.to_string()))
                                .collect()
                        })
                        .unwrap_or_default(),
                });
            }
        }
        if !units.is_empty() {
            info!("processing {} split parts", units.len());
            return Ok(units);
        }
    }

    let total_pages = ctx
        .opener
        .open(pdf_path)
        .map(|doc| doc.page_count())
        .unwrap_or(1);
    info!("processing whole PDF file (no split)");
    Ok(vec![ExtractionUnit {
        path: pdf_path.to_path_buf(),
        page_start: 1,
        page_end: total_pages.max(1),
        section_titles: vec!["Complete Document".to_string()],
    }])
}

async fn extract_from_unit(
    ctx: &PipelineContext,
    unit: &ExtractionUnit,
    job_id: &str,
    part_index: usize,
) -> (Vec<RawChunk>, String) {
    if let Some(partitioner) = &ctx.partitioner {
        match partitioner
            .partition(&unit.path, &PartitionOptions::default())
            .await
        {
            Ok(elements) => {
                let chunks =
                    chunks_from_elements(unit, job_id, part_index, partitioner.name(), &elements);
                return (chunks, partitioner.name().to_string());
            }
            Err(e) => {
                warn!(
                    "partitioner failed for {}: {}; using text-layer fallback",
                    unit.path.display(),
                    e
                );
            }
        }
    } else {
        warn!("no partitioner configured, using text-layer fallback");
    }

    (
        extract_with_text_layer(ctx, unit, job_id, part_index),
        TEXT_FALLBACK_METHOD.to_string(),
    )
}

fn base_metadata(
    unit: &ExtractionUnit,
    part_index: usize,
    extraction_method: &str,
) -> serde_json::Map<String, Value> {
    let mut metadata = serde_json::Map::new();
    metadata.insert("part_index".to_string(), json!(part_index));
    metadata.insert(
        "page_range".to_string(),
        json!(format!("{}-{}", unit.page_start, unit.page_end)),
    );
    metadata.insert("page_start".to_string(), json!(unit.page_start));
    metadata.insert("page_end".to_string(), json!(unit.page_end));
    metadata.insert(
        "extraction_method".to_string(),
        json!(extraction_method),
    );
    metadata
}

fn chunks_from_elements(
    unit: &ExtractionUnit,
    job_id: &str,
    part_index: usize,
    method: &str,
    elements: &[crate::partition::PartitionedElement],
) -> Vec<RawChunk> {
    let toc_path = unit
        .section_titles
        .iter()
        .take(2)
        .cloned()
        .collect::<Vec<_>>()
        .join(" > ");

    let mut chunks = Vec::new();
    for (element_index, element) in elements.iter().enumerate() {
        let content = element.text.trim();
        if content.len() < MIN_CHUNK_CHARS {
            continue;
        }

        let seq = element_index + 1;
        let page_number = element.page_number.unwrap_or(unit.page_start);
        let mut metadata = base_metadata(unit, part_index, method);
        metadata.insert("element_index".to_string(), json!(element_index));

        chunks.push(RawChunk {
            chunk_id: format!("{}_c_{}_{:04}", job_id, part_index, seq),
            content: content.to_string(),
            stage: ChunkStage::Raw,
            source_id: job_id.to_string(),
            section_id: format!("part_{}_section_{}", part_index, seq),
            page_span: page_number.to_string(),
            toc_path: toc_path.clone(),
            element_type: element.category.clone(),
            page_number,
            coordinates: element.coordinates,
            metadata,
        });
    }
    chunks
}

/// Text-layer fallback: split each page on paragraph boundaries
fn extract_with_text_layer(
    ctx: &PipelineContext,
    unit: &ExtractionUnit,
    job_id: &str,
    part_index: usize,
) -> Vec<RawChunk> {
    let doc = match ctx.opener.open(&unit.path) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("fallback extraction failed for {}: {}", unit.path.display(), e);
            return Vec::new();
        }
    };

    let toc_path = unit
        .section_titles
        .iter()
        .take(2)
        .cloned()
        .collect::<Vec<_>>()
        .join(" > ");

    let mut chunks = Vec::new();
    for page_offset in 0..doc.page_count() {
        let page_number = unit.page_start + page_offset;
        if page_number > unit.page_end {
            break;
        }

        let text = match doc.page_text(page_offset + 1) {
            Ok(text) => text,
            Err(e) => {
                warn!("failed to read page {}: {}", page_number, e);
                continue;
            }
        };
        let text = text.trim();
        if text.len() < MIN_PAGE_CHARS {
            continue;
        }

        for (para_index, paragraph) in text
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .enumerate()
        {
            if paragraph.len() < MIN_CHUNK_CHARS {
                continue;
            }

            let mut metadata = base_metadata(unit, part_index, TEXT_FALLBACK_METHOD);
            metadata.insert("paragraph_index".to_string(), json!(para_index));

            chunks.push(RawChunk {
                chunk_id: format!(
                    "{}_c_{}_{}_{:03}",
                    job_id,
                    part_index,
                    page_number,
                    para_index + 1
                ),
                content: paragraph.to_string(),
                stage: ChunkStage::Raw,
                source_id: job_id.to_string(),
                section_id: format!("part_{}_page_{}", part_index, page_number),
                page_span: page_number.to_string(),
                toc_path: toc_path.clone(),
                element_type: "text".to_string(),
                page_number,
                coordinates: None,
                metadata,
            });
        }
    }
    chunks
}

fn update_manifest(
    ctx: &PipelineContext,
    pdf_path: &Path,
    job_dir: &Path,
    job_id: &str,
    pass_c_results: Value,
    artifact_path: &Path,
) -> Result<String> {
    let mut manifest = match Manifest::load(job_dir) {
        Ok(manifest) => manifest,
        Err(e) => {
            warn!("failed to load existing manifest: {}", e);
            Manifest::new(job_id, pdf_path, ctx.config.env.as_str())
        }
    };

    manifest.mark_pass_complete(PassId::C);
    manifest.set_pass_results(PassId::C, pass_c_results);
    manifest.record_artifact(artifact_path)?;
    let path = manifest.save(job_dir)?;
    Ok(path.to_string_lossy().into_owned())
}
