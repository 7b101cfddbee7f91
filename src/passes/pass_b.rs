//! Pass B: logical split of oversized PDFs
//!
//! Files over 25 MiB are split into logical parts guided by the Pass-A
//! ToC sections; without usable sections the fallback is fixed-size
//! quartile splitting with a 50-page floor. Failure to split degrades to
//! "no split" rather than failing the pass.

use crate::artifacts::{epoch_millis, epoch_seconds, load_json, sha256_file, write_json_atomic};
use crate::context::PipelineContext;
use crate::error::Result;
use crate::manifest::Manifest;
use crate::passes::PassId;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use tracing::{info, warn};

/// Files at or below this size skip splitting
pub const SPLIT_THRESHOLD_BYTES: u64 = 25 * 1024 * 1024;

/// Minimum pages before a new part may start
const MIN_SECTION_PAGES: usize = 30;

/// Parts smaller than this are merged into their predecessor
const MIN_PART_PAGES: usize = 10;

/// One split output file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitPart {
    pub part_name: String,
    pub page_start: usize,
    pub page_end: usize,
    pub section_titles: Vec<String>,
    pub file_path: String,
    pub file_size: u64,
    pub content_hash: String,
}

/// A ToC section reference recovered from the Pass-A artifact
#[derive(Debug, Clone)]
pub struct SectionRef {
    pub title: String,
    pub page: usize,
    pub level: u8,
}

/// Result of Pass B logical splitting
#[derive(Debug, Clone, Serialize)]
pub struct PassBResult {
    pub source_file: String,
    pub job_id: String,
    pub split_performed: bool,
    pub parts_created: usize,
    pub total_pages: usize,
    pub processing_time_ms: i64,
    pub artifacts: Vec<String>,
    pub manifest_path: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Run Pass B for one source
pub async fn process_pass_b(
    ctx: &PipelineContext,
    pdf_path: &Path,
    job_dir: &Path,
    job_id: &str,
) -> PassBResult {
    let started = epoch_millis();
    let source_file = pdf_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let file_size = std::fs::metadata(pdf_path).map(|m| m.len()).unwrap_or(0);
    info!(
        "Pass B: {} is {:.1} MB (threshold: {:.1} MB)",
        source_file,
        file_size as f64 / (1024.0 * 1024.0),
        SPLIT_THRESHOLD_BYTES as f64 / (1024.0 * 1024.0)
    );

    if file_size <= SPLIT_THRESHOLD_BYTES {
        info!("PDF below split threshold, skipping logical split");
        return no_split_result(ctx, pdf_path, job_dir, job_id, &source_file, file_size, started);
    }

    match perform_split(ctx, pdf_path, job_dir, job_id, &source_file, file_size, started).await {
        Ok(result) => result,
        Err(e) => {
            // A failed split is not fatal: Pass C will process the whole file
            warn!("logical split failed for {}: {}; treating as no split", source_file, e);
            no_split_result(ctx, pdf_path, job_dir, job_id, &source_file, file_size, started)
        }
    }
}

fn no_split_result(
    ctx: &PipelineContext,
    pdf_path: &Path,
    job_dir: &Path,
    job_id: &str,
    source_file: &str,
    file_size: u64,
    started: i64,
) -> PassBResult {
    let processing_time_ms = epoch_millis() - started;
    let manifest_path = update_manifest(
        ctx,
        pdf_path,
        job_dir,
        job_id,
        json!({
            "split_performed": false,
            "parts_created": 0,
            "file_size_bytes": file_size,
            "split_threshold_mb": SPLIT_THRESHOLD_BYTES as f64 / (1024.0 * 1024.0),
            "processing_time_ms": processing_time_ms,
            "success": true,
        }),
        &[],
    )
    .unwrap_or_default();

    PassBResult {
        source_file: source_file.to_string(),
        job_id: job_id.to_string(),
        split_performed: false,
        parts_created: 0,
        total_pages: 0,
        processing_time_ms,
        artifacts: Vec::new(),
        manifest_path,
        success: true,
        error_message: None,
    }
}

async fn perform_split(
    ctx: &PipelineContext,
    pdf_path: &Path,
    job_dir: &Path,
    job_id: &str,
    source_file: &str,
    file_size: u64,
    started: i64,
) -> Result<PassBResult> {
    let doc = ctx.opener.open(pdf_path)?;
    let total_pages = doc.page_count();

    let toc_sections = load_toc_sections(job_dir, job_id);
    info!(
        "splitting {} ({} pages) guided by {} ToC sections",
        source_file,
        total_pages,
        toc_sections.len()
    );

    let split_points = calculate_split_points(&toc_sections, total_pages);

    let parts_dir = job_dir.join(format!("{}_parts", job_id));
    std::fs::create_dir_all(&parts_dir)?;

    let mut parts: Vec<SplitPart> = Vec::new();
    for (index, (page_start, page_end, section_titles)) in split_points.iter().enumerate() {
        let part_name = format!("{}_part_{:03}", job_id, index + 1);
        let part_path = parts_dir.join(format!("{}.pdf", part_name));
        let part_size = doc.write_page_range(*page_start, *page_end, &part_path)?;

        parts.push(SplitPart {
            part_name,
            page_start: *page_start,
            page_end: *page_end,
            section_titles: section_titles.clone(),
            file_path: part_path.to_string_lossy().into_owned(),
            file_size: part_size,
            content_hash: sha256_file(&part_path),
        });
        info!(
            "wrote part {} (pages {}-{}, {} bytes)",
            parts.len(),
            page_start,
            page_end,
            part_size
        );
    }

    // split_index.json maps sections to parts for Pass C
    let split_index_path = job_dir.join("split_index.json");
    write_json_atomic(
        &json!({
            "job_id": job_id,
            "created_at": epoch_seconds(),
            "parts_count": parts.len(),
            "total_pages": total_pages,
            "parts": &parts,
        }),
        &split_index_path,
    )?;

    let processing_time_ms = epoch_millis() - started;
    let mut artifact_paths: Vec<String> = parts.iter().map(|p| p.file_path.clone()).collect();
    artifact_paths.push(split_index_path.to_string_lossy().into_owned());

    let manifest_path = update_manifest(
        ctx,
        pdf_path,
        job_dir,
        job_id,
        json!({
            "split_performed": true,
            "parts_created": parts.len(),
            "total_pages": total_pages,
            "file_size_bytes": file_size,
            "split_threshold_mb": SPLIT_THRESHOLD_BYTES as f64 / (1024.0 * 1024.0),
            "processing_time_ms": processing_time_ms,
            "success": true,
        }),
        &artifact_paths,
    )?;

    info!(
        "Pass B completed for {}: {} parts in {}ms",
        source_file,
        parts.len(),
        processing_time_ms
    );

    Ok(PassBResult {
        source_file: source_file.to_string(),
        job_id: job_id.to_string(),
        split_performed: true,
        parts_created: parts.len(),
        total_pages,
        processing_time_ms,
        artifacts: artifact_paths,
        manifest_path,
        success: true,
        error_message: None,
    })
}

/// Recover ToC sections from the Pass-A dictionary artifact
fn load_toc_sections(job_dir: &Path, job_id: &str) -> Vec<SectionRef> {
    let artifact_path = job_dir.join(format!("{}_pass_a_dict.json", job_id));
    let dict_data = match load_json(&artifact_path) {
        Ok(value) => value,
        Err(e) => {
            warn!("Pass A artifact unavailable for split guidance: {}", e);
            return Vec::new();
        }
    };

    let mut sections: Vec<SectionRef> = dict_data["dictionary_entries"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let source = entry["sources"].as_array()?.first()?;
                    Some(SectionRef {
                        title: entry["term"].as_str()?.to_string(),
                        page: source["page"].as_u64()? as usize,
                        level: source["level"].as_u64().unwrap_or(1) as u8,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    sections.sort_by_key(|s| s.page);
    sections
}

/// Compute part boundaries from ToC sections, falling back to fixed-size
/// splitting when no sections are available
pub fn calculate_split_points(
    toc_sections: &[SectionRef],
    total_pages: usize,
) -> Vec<(usize, usize, Vec<String>)> {
    if toc_sections.is_empty() {
        // Quartile fallback with a 50-page floor
        let chunk_size = (total_pages / 4).max(50);
        let mut points = Vec::new();
        let mut start = 1;
        while start <= total_pages {
            let end = (start + chunk_size - 1).min(total_pages);
            points.push((start, end, vec![format!("Pages {}-{}", start, end)]));
            start = end + 1;
        }
        return points;
    }

    let major_sections: Vec<&SectionRef> = {
        let top_level: Vec<&SectionRef> =
            toc_sections.iter().filter(|s| s.level <= 2).collect();
        if top_level.is_empty() {
            toc_sections.iter().take(10).collect()
        } else {
            top_level
        }
    };

    let mut split_points: Vec<(usize, usize, Vec<String>)> = Vec::new();
    let mut current_start = 1;
    let mut current_titles: Vec<String> = Vec::new();

    for section in &major_sections {
        if section.page.saturating_sub(current_start) >= MIN_SECTION_PAGES
            && !current_titles.is_empty()
        {
            split_points.push((current_start, section.page - 1, current_titles.clone()));
            current_start = section.page;
            current_titles = vec![section.title.clone()];
        } else {
            current_titles.push(section.title.clone());
        }
    }

    if !current_titles.is_empty() {
        split_points.push((current_start, total_pages, current_titles));
    }

    // Fold undersized parts into their predecessor; a leading tiny part
    // stays until a successor absorbs the boundary
    let mut filtered: Vec<(usize, usize, Vec<String>)> = Vec::new();
    for (start, end, titles) in split_points {
        if end + 1 - start >= MIN_PART_PAGES {
            filtered.push((start, end, titles));
        } else if let Some(last) = filtered.last_mut() {
            last.1 = end;
            last.2.extend(titles);
        }
    }

    if filtered.is_empty() {
        return vec![(1, total_pages, vec!["Complete Document".to_string()])];
    }
    filtered
}

fn update_manifest(
    ctx: &PipelineContext,
    pdf_path: &Path,
    job_dir: &Path,
    job_id: &str,
    pass_b_results: serde_json::Value,
    artifact_paths: &[String],
) -> Result<String> {
    let mut manifest = match Manifest::load(job_dir) {
        Ok(manifest) => manifest,
        Err(e) => {
            warn!("failed to load existing manifest: {}", e);
            Manifest::new(job_id, pdf_path, ctx.config.env.as_str())
        }
    };

    manifest.mark_pass_complete(PassId::B);
    manifest.set_pass_results(PassId::B, pass_b_results);
    for path in artifact_paths {
        manifest.record_artifact(Path::new(path))?;
    }
    let path = manifest.save(job_dir)?;
    Ok(path.to_string_lossy().into_owned())
}
