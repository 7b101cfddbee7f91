//! Pass A: initial ToC parse and dictionary seeding
//!
//! Parses the table of contents (or falls back to heading extraction),
//! seeds the shared dictionary with high-confidence section terms, writes
//! the Pass-A artifact, and creates the initial manifest. Dictionary
//! write failures are non-fatal; an empty document still succeeds with
//! zero entries.

use crate::artifacts::{epoch_millis, epoch_seconds, file_mtime, sha256_file, write_json_atomic};
use crate::context::PipelineContext;
use crate::dictionary::{DictTerm, TermSource};
use crate::error::Result;
use crate::manifest::{Manifest, SourceInfo};
use crate::passes::PassId;
use crate::toc::DocumentOutline;
use crate::toc::TocParser;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use tracing::{info, warn};

/// Result of Pass A ToC parsing and dictionary seeding
#[derive(Debug, Clone, Serialize)]
pub struct PassAResult {
    pub source_file: String,
    pub job_id: String,
    /// Terms actually upserted into the dictionary store
    pub dictionary_entries: usize,
    pub sections_parsed: usize,
    /// ToC entries found; mirrors `sections_parsed` for integrity checks
    pub toc_entries: usize,
    pub processing_time_ms: i64,
    pub artifacts: Vec<String>,
    pub manifest_path: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl PassAResult {
    fn failure(source_file: String, job_id: String, started: i64, message: String) -> Self {
        Self {
            source_file,
            job_id,
            dictionary_entries: 0,
            sections_parsed: 0,
            toc_entries: 0,
            processing_time_ms: epoch_millis() - started,
            artifacts: Vec::new(),
            manifest_path: String::new(),
            success: false,
            error_message: Some(message),
        }
    }
}

/// Run Pass A for one source
pub async fn process_pass_a(
    ctx: &PipelineContext,
    pdf_path: &Path,
    job_dir: &Path,
    job_id: &str,
    force_dict_init: bool,
) -> PassAResult {
    let started = epoch_millis();
    let source_file = pdf_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    info!("Pass A starting: ToC parse for {}", source_file);
    if force_dict_init {
        info!("forced dictionary initialization requested");
    }

    match run(ctx, pdf_path, job_dir, job_id, &source_file, started, force_dict_init).await {
        Ok(result) => result,
        Err(e) => {
            warn!("Pass A failed for {}: {}", source_file, e);
            PassAResult::failure(source_file, job_id.to_string(), started, e.to_string())
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
    force_dict_init: bool,
) -> Result<PassAResult> {
    std::fs::create_dir_all(job_dir)?;

    info!("parsing document structure and ToC...");
    let doc = ctx.opener.open(pdf_path)?;
    let outline = TocParser::new().parse_document_structure(doc.as_ref());
    let sections_parsed = outline.entries.len();

    let mut dict_entries: Vec<DictTerm> = Vec::new();
    let mut upserted = 0;
    if sections_parsed == 0 {
        info!(
            "no ToC entries found in {}; proceeding without dictionary seeding",
            source_file
        );
    } else {
        dict_entries = extract_dictionary_from_toc(&outline, source_file);
        info!(
            "extracted {} dictionary entries from {} ToC sections",
            dict_entries.len(),
            sections_parsed
        );

        // Forced initialisation may enrich the seed with LLM-proposed
        // terms; failures and non-JSON replies are skipped, never fatal
        if force_dict_init {
            if let Some(seeder) = &ctx.seeder {
                match seeder.seed_terms(source_file).await {
                    Ok(seeded) if !seeded.is_empty() => {
                        info!("LLM seed contributed {} terms", seeded.len());
                        dict_entries.extend(seeded);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("LLM dictionary seed failed (skipped): {}", e),
                }
            }
        }

        if !dict_entries.is_empty() {
            match ctx.dictionary.upsert_terms(&dict_entries).await {
                Ok(count) => {
                    upserted = count;
                    info!("upserted {} dictionary entries", count);
                }
                Err(e) => warn!("dictionary upsert failed (non-fatal for Pass A): {}", e),
            }
        }
    }

    // Pass A artifact: the seed dictionary
    let dict_artifact_path = job_dir.join(format!("{}_pass_a_dict.json", job_id));
    let dict_data = json!({
        "source": source_file,
        "job_id": job_id,
        "pass": "A",
        "stage": "toc_dictionary_seed",
        "entries_count": dict_entries.len(),
        "upserted_count": upserted,
        "sections_parsed": sections_parsed,
        "dictionary_entries": &dict_entries,
        "created_at": epoch_seconds(),
    });
    write_json_atomic(&dict_data, &dict_artifact_path)?;
    info!("wrote Pass A dictionary artifact: {}", dict_artifact_path.display());

    // Initial manifest
    let mut manifest = Manifest::new(job_id, pdf_path, ctx.config.env.as_str());
    manifest
        .extra
        .insert("pass".to_string(), Value::String("A".to_string()));
    manifest.extra.insert(
        "stage".to_string(),
        Value::String("toc_dictionary_seed".to_string()),
    );
    manifest.source_info = SourceInfo {
        file_size: std::fs::metadata(pdf_path).map(|m| m.len()).unwrap_or(0),
        file_mtime: file_mtime(pdf_path),
        source_hash: sha256_file(pdf_path),
    };
    let mut categories: Vec<String> = dict_entries.iter().map(|e| e.category.clone()).collect();
    categories.sort();
    categories.dedup();
    manifest.set_pass_results(
        PassId::A,
        json!({
            "dictionary_entries_extracted": dict_entries.len(),
            "sections_parsed": sections_parsed,
            "toc_entries": sections_parsed,
            "categories": categories,
            "success": true,
        }),
    );
    manifest.mark_pass_complete(PassId::A);
    manifest.record_artifact(&dict_artifact_path)?;
    let manifest_path = manifest.save(job_dir)?;

    let processing_time_ms = epoch_millis() - started;
    info!(
        "Pass A completed for {} in {}ms",
        source_file, processing_time_ms
    );

    Ok(PassAResult {
        source_file: source_file.to_string(),
        job_id: job_id.to_string(),
        dictionary_entries: upserted,
        sections_parsed,
        toc_entries: sections_parsed,
        processing_time_ms,
        artifacts: vec![dict_artifact_path.to_string_lossy().into_owned()],
        manifest_path: manifest_path.to_string_lossy().into_owned(),
        success: true,
        error_message: None,
    })
}

const SPELL_WORDS: [&str; 4] = ["spell", "magic", "incantation", "enchantment"];
const FEAT_WORDS: [&str; 4] = ["feat", "ability", "talent", "skill"];
const CLASS_WORDS: [&str; 4] = ["class", "archetype", "prestige", "profession"];
const EQUIPMENT_WORDS: [&str; 5] = ["weapon", "armor", "item", "equipment", "gear"];
const RULE_WORDS: [&str; 5] = ["rule", "mechanic", "system", "combat", "action"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Categorise ToC entries into dictionary seed terms
pub fn extract_dictionary_from_toc(outline: &DocumentOutline, source_name: &str) -> Vec<DictTerm> {
    let mut entries = Vec::new();

    for entry in &outline.entries {
        let title = entry.title.trim();
        if title.len() < 3 {
            continue;
        }

        let title_lower = title.to_lowercase();
        let (category, definition) = if contains_any(&title_lower, &SPELL_WORDS) {
            (
                "spells",
                format!(
                    "Spell or magical ability described in {}, page {}",
                    source_name, entry.page
                ),
            )
        } else if contains_any(&title_lower, &FEAT_WORDS) {
            (
                "feats",
                format!(
                    "Character feat or ability from {}, page {}",
                    source_name, entry.page
                ),
            )
        } else if contains_any(&title_lower, &CLASS_WORDS) {
            (
                "classes",
                format!(
                    "Character class or archetype from {}, page {}",
                    source_name, entry.page
                ),
            )
        } else if contains_any(&title_lower, &EQUIPMENT_WORDS) {
            (
                "equipment",
                format!("Equipment or gear from {}, page {}", source_name, entry.page),
            )
        } else if contains_any(&title_lower, &RULE_WORDS) {
            (
                "mechanics",
                format!(
                    "Game rule or mechanic from {}, page {}",
                    source_name, entry.page
                ),
            )
        } else if entry.level <= 2 {
            (
                "general",
                format!("Major section from {}, page {}", source_name, entry.page),
            )
        } else {
            // Deep entries without category signals are noise
            continue;
        };

        let definition: String = definition.chars().take(400).collect();
        entries.push(DictTerm {
            term: title.to_string(),
            definition,
            category: category.to_string(),
            sources: vec![TermSource {
                source: source_name.to_string(),
                method: "toc_parse".to_string(),
                page: Some(entry.page),
                section_id: Some(entry.section_id.clone()),
                level: Some(entry.level),
                relations: None,
            }],
        });
    }

    entries
}
