//! Pass F: finalisation and cleanup
//!
//! Validates every recorded artifact, promotes or purges temp files,
//! removes partial writes and empty directories, restamps checksums,
//! composes the run summary, and writes the finalised manifest. A failed
//! final-manifest validation flips a flag in the result instead of
//! raising.

use crate::artifacts::{epoch_millis, epoch_seconds, file_mtime, sha256_file};
use crate::error::Result;
use crate::manifest::Manifest;
use crate::passes::PassId;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Artifacts smaller than this are considered partial writes
const PARTIAL_WRITE_BYTES: u64 = 50;

const PIPELINE_VERSION: &str = "6-pass-system";

/// Cleanup bookkeeping
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupStats {
    pub temp_files_moved: usize,
    pub partial_files_purged: usize,
    pub empty_dirs_removed: usize,
    pub total_size_cleaned: u64,
    pub validation_errors: usize,
}

/// Result of Pass F finalisation
#[derive(Debug, Clone, Serialize)]
pub struct PassFResult {
    pub source_file: String,
    pub job_id: String,
    pub artifacts_validated: usize,
    pub cleanup_stats: CleanupStats,
    pub final_manifest_valid: bool,
    pub processing_time_ms: i64,
    pub artifacts: Vec<String>,
    pub manifest_path: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Run Pass F for one job
pub async fn process_pass_f(
    _ctx: &crate::context::PipelineContext,
    job_dir: &Path,
    job_id: &str,
) -> PassFResult {
    let started = epoch_millis();
    info!("Pass F starting: finalization for job {}", job_id);

    match run(job_dir, job_id, started) {
        Ok(result) => result,
        Err(e) => {
            warn!("Pass F failed for job {}: {}", job_id, e);
            PassFResult {
                source_file: String::new(),
                job_id: job_id.to_string(),
                artifacts_validated: 0,
                cleanup_stats: CleanupStats::default(),
                final_manifest_valid: false,
                processing_time_ms: epoch_millis() - started,
                artifacts: Vec::new(),
                manifest_path: String::new(),
                success: false,
                error_message: Some(e.to_string()),
            }
        }
    }
}

fn run(job_dir: &Path, job_id: &str, started: i64) -> Result<PassFResult> {
    let mut manifest = Manifest::load(job_dir)?;
    let source_file = manifest.source_file.clone();

    let mut cleanup_stats = CleanupStats::default();
    cleanup_stats.validation_errors = validate_artifacts(&manifest);

    promote_temp_files(job_dir, &mut cleanup_stats)?;
    purge_partial_files(job_dir, &mut cleanup_stats)?;
    remove_empty_dirs(job_dir, &mut cleanup_stats)?;

    // Restamp every surviving artifact
    let verified_at = epoch_seconds();
    manifest.artifacts.retain(|a| Path::new(&a.path).exists());
    for artifact in &mut manifest.artifacts {
        let path = Path::new(&artifact.path);
        artifact.size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        artifact.mtime = file_mtime(path);
        artifact.checksum = sha256_file(path);
        artifact.verified_at = Some(verified_at);
    }
    let artifacts_validated = manifest.artifacts.len();

    manifest.mark_pass_complete(PassId::F);
    let run_summary = calculate_run_summary(&manifest, &cleanup_stats);

    manifest.set_pass_results(
        PassId::F,
        json!({
            "artifacts_validated": artifacts_validated,
            "cleanup_performed": true,
            "temp_files_moved": cleanup_stats.temp_files_moved,
            "partial_files_purged": cleanup_stats.partial_files_purged,
            "total_size_cleaned": cleanup_stats.total_size_cleaned,
            "success": true,
        }),
    );
    manifest.finalized_at = Some(epoch_seconds());
    manifest.job_status = Some("completed".to_string());
    manifest.run_summary = Some(run_summary);
    manifest.pipeline_version = Some(PIPELINE_VERSION.to_string());
    let manifest_path = manifest.save(job_dir)?;

    let cleanup_report_path = write_cleanup_report(job_dir, job_id, &cleanup_stats)?;
    let final_manifest_valid = validate_final_manifest(&manifest);

    let processing_time_ms = epoch_millis() - started;
    info!(
        "Pass F completed for job {} in {}ms (valid: {})",
        job_id, processing_time_ms, final_manifest_valid
    );

    Ok(PassFResult {
        source_file,
        job_id: job_id.to_string(),
        artifacts_validated,
        cleanup_stats,
        final_manifest_valid,
        processing_time_ms,
        artifacts: vec![cleanup_report_path.to_string_lossy().into_owned()],
        manifest_path: manifest_path.to_string_lossy().into_owned(),
        success: true,
        error_message: None,
    })
}

/// Count artifacts whose recorded size or checksum no longer matches
fn validate_artifacts(manifest: &Manifest) -> usize {
    let mut errors = 0;
    for artifact in &manifest.artifacts {
        let path = Path::new(&artifact.path);
        if !path.exists() {
            warn!("artifact missing: {}", artifact.path);
            errors += 1;
            continue;
        }
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if artifact.size > 0 && size != artifact.size {
            warn!(
                "artifact size mismatch for {}: {} != {}",
                artifact.path, size, artifact.size
            );
            errors += 1;
            continue;
        }
        if !artifact.checksum.is_empty() && sha256_file(path) != artifact.checksum {
            warn!("artifact checksum mismatch for {}", artifact.path);
            errors += 1;
        }
    }
    errors
}

fn walk_files(dir: &Path, files: &mut Vec<PathBuf>) {
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk_files(&path, files);
            } else {
                files.push(path);
            }
        }
    }
}

/// Move temp files onto their canonical paths when the canonical copy is
/// missing or empty; delete them when a non-empty canonical copy exists
fn promote_temp_files(job_dir: &Path, stats: &mut CleanupStats) -> Result<()> {
    let mut files = Vec::new();
    walk_files(job_dir, &mut files);

    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(split_at) = name.find(".tmp") else {
            continue;
        };

        let canonical = path.with_file_name(&name[..split_at]);
        let canonical_size = std::fs::metadata(&canonical).map(|m| m.len()).unwrap_or(0);
        if canonical_size == 0 {
            debug!("promoting temp file {} -> {}", path.display(), canonical.display());
            std::fs::rename(&path, &canonical)?;
            stats.temp_files_moved += 1;
        } else {
            let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            std::fs::remove_file(&path)?;
            stats.total_size_cleaned += size;
            stats.partial_files_purged += 1;
        }
    }
    Ok(())
}

/// Remove undersized json/jsonl artifacts left by interrupted writes
fn purge_partial_files(job_dir: &Path, stats: &mut CleanupStats) -> Result<()> {
    let mut files = Vec::new();
    walk_files(job_dir, &mut files);

    for path in files {
        let is_json = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("json") | Some("jsonl")
        );
        if !is_json {
            continue;
        }
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if size < PARTIAL_WRITE_BYTES {
            debug!("purging partial artifact {} ({} bytes)", path.display(), size);
            std::fs::remove_file(&path)?;
            stats.partial_files_purged += 1;
            stats.total_size_cleaned += size;
        }
    }
    Ok(())
}

fn remove_empty_dirs(job_dir: &Path, stats: &mut CleanupStats) -> Result<()> {
    fn visit(dir: &Path, removed: &mut usize) {
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    visit(&path, removed);
                    if std::fs::read_dir(&path)
                        .map(|mut e| e.next().is_none())
                        .unwrap_or(false)
                    {
                        if std::fs::remove_dir(&path).is_ok() {
                            *removed += 1;
                        }
                    }
                }
            }
        }
    }

    visit(job_dir, &mut stats.empty_dirs_removed);
    Ok(())
}

fn pass_metric(results: Option<&Value>, key: &str) -> i64 {
    results
        .and_then(|r| r.get(key))
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
}

fn pass_metric_f64(results: Option<&Value>, key: &str) -> f64 {
    results
        .and_then(|r| r.get(key))
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0)
}

/// Aggregate per-pass metrics into the run summary
fn calculate_run_summary(manifest: &Manifest, cleanup_stats: &CleanupStats) -> Value {
    let pass_a = manifest.pass_results(PassId::A);
    let pass_b = manifest.pass_results(PassId::B);
    let pass_c = manifest.pass_results(PassId::C);
    let pass_d = manifest.pass_results(PassId::D);
    let pass_e = manifest.pass_results(PassId::E);

    let total_artifact_size: u64 = manifest.artifacts.iter().map(|a| a.size).sum();

    json!({
        "pipeline_version": PIPELINE_VERSION,
        "total_passes_completed": manifest.completed_passes.len(),
        "source_info": &manifest.source_info,
        "processing_summary": {
            "dictionary_entries_created": pass_metric(pass_a, "dictionary_entries_extracted"),
            "pdf_split_performed": pass_b
                .and_then(|r| r.get("split_performed"))
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            "parts_created": pass_metric(pass_b, "parts_created"),
            "raw_chunks_extracted": pass_metric(pass_c, "chunks_extracted"),
            "chunks_vectorized": pass_metric(pass_d, "chunks_vectorized"),
            "chunks_graph_enriched": pass_metric(pass_e, "chunks_updated"),
            "graph_nodes_created": pass_metric(pass_e, "graph_nodes"),
            "graph_edges_created": pass_metric(pass_e, "graph_edges"),
            "cross_references_extracted": pass_metric(pass_e, "cross_references"),
        },
        "data_summary": {
            "total_artifacts": manifest.artifacts.len(),
            "total_artifact_size_bytes": total_artifact_size,
            "chunks_loaded_to_store": pass_metric(pass_d, "chunks_loaded"),
            "dictionary_updates": pass_metric(pass_e, "dictionary_updates"),
        },
        "cleanup_summary": cleanup_stats,
        "quality_metrics": {
            "deduplication_ratio": pass_metric_f64(pass_d, "deduplication_ratio"),
            "entities_extracted": pass_metric(pass_d, "entities_extracted"),
            "keywords_extracted": pass_metric(pass_d, "keywords_extracted"),
        },
        "completion_status": {
            "all_passes_completed": manifest.completed_passes.len() == 6,
            "pipeline_successful": true,
            "finalized_at": epoch_seconds(),
        },
    })
}

fn write_cleanup_report(
    job_dir: &Path,
    job_id: &str,
    stats: &CleanupStats,
) -> Result<PathBuf> {
    let recommendations = if stats.validation_errors == 0 {
        json!([
            "All artifacts have been validated and finalized",
            "Job pipeline completed successfully",
            "Ready for production use",
        ])
    } else {
        json!([
            format!("Found {} validation errors", stats.validation_errors),
            "Review artifact integrity before production use",
            "Consider re-running failed passes",
        ])
    };

    let report_path = job_dir.join("cleanup_report.json");
    crate::artifacts::write_json_atomic(
        &json!({
            "job_id": job_id,
            "pass": "F",
            "operation": "cleanup_and_finalization",
            "created_at": epoch_seconds(),
            "cleanup_statistics": stats,
            "operations_performed": [
                "Moved temporary files to final locations",
                "Purged partial/incomplete artifacts",
                "Removed empty directories",
                "Validated artifact integrity",
                "Updated manifest checksums",
                "Generated run summary",
            ],
            "recommendations": recommendations,
        }),
        &report_path,
    )?;
    Ok(report_path)
}

/// Final validation: required fields, all six passes, and a summary that
/// claims completion
pub fn validate_final_manifest(manifest: &Manifest) -> bool {
    if manifest.job_id.is_empty() || manifest.source_file.is_empty() {
        warn!("final manifest missing identity fields");
        return false;
    }
    if manifest.finalized_at.is_none()
        || manifest.job_status.is_none()
        || manifest.run_summary.is_none()
    {
        warn!("final manifest missing finalization fields");
        return false;
    }

    let missing: Vec<&str> = PassId::ALL
        .iter()
        .filter(|p| !manifest.is_pass_complete(**p))
        .map(|p| p.letter())
        .collect();
    if !missing.is_empty() {
        warn!("missing passes in final manifest: {:?}", missing);
        return false;
    }

    let all_completed = manifest
        .run_summary
        .as_ref()
        .and_then(|s| s.pointer("/completion_status/all_passes_completed"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !all_completed {
        warn!("run summary indicates incomplete pipeline");
        return false;
    }

    debug!("final manifest validation passed");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::write_json_atomic;
    use tempfile::TempDir;

    fn seeded_manifest(dir: &TempDir) -> Manifest {
        let source = dir.path().join("book.pdf");
        std::fs::write(&source, b"%PDF-1.4 body").unwrap();
        let mut manifest = Manifest::new("job_9_abcdefabcdef", &source, "dev");
        for pass in [PassId::A, PassId::B, PassId::C, PassId::D, PassId::E] {
            manifest.mark_pass_complete(pass);
        }
        manifest
    }

    #[test]
    fn test_promote_and_purge_temp_files() {
        let dir = TempDir::new().unwrap();
        // Orphaned temp with no canonical version: promoted
        std::fs::write(
            dir.path().join("report.json.tmp.123.456"),
            b"{\"recovered\": true, \"items\": [1, 2, 3]}",
        )
        .unwrap();
        // Temp shadowed by a healthy canonical file: purged
        std::fs::write(
            dir.path().join("data.json"),
            b"{\"canonical\": true, \"items\": [1, 2, 3, 4]}",
        )
        .unwrap();
        std::fs::write(dir.path().join("data.json.tmp.123.457"), b"partial").unwrap();

        let mut stats = CleanupStats::default();
        promote_temp_files(dir.path(), &mut stats).unwrap();

        assert_eq!(stats.temp_files_moved, 1);
        assert_eq!(stats.partial_files_purged, 1);
        assert!(dir.path().join("report.json").exists());
        assert!(dir.path().join("data.json").exists());
        assert!(!dir.path().join("data.json.tmp.123.457").exists());
    }

    #[test]
    fn test_purge_partial_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("tiny.json"), b"{}").unwrap();
        std::fs::write(
            dir.path().join("healthy.json"),
            format!("{{\"data\": \"{}\"}}", "x".repeat(100)),
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let mut stats = CleanupStats::default();
        purge_partial_files(dir.path(), &mut stats).unwrap();

        assert_eq!(stats.partial_files_purged, 1);
        assert!(!dir.path().join("tiny.json").exists());
        assert!(dir.path().join("healthy.json").exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_remove_empty_dirs() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("empty/nested")).unwrap();
        std::fs::create_dir_all(dir.path().join("full")).unwrap();
        std::fs::write(dir.path().join("full/file.txt"), b"x").unwrap();

        let mut stats = CleanupStats::default();
        remove_empty_dirs(dir.path(), &mut stats).unwrap();

        assert_eq!(stats.empty_dirs_removed, 2);
        assert!(!dir.path().join("empty").exists());
        assert!(dir.path().join("full").exists());
    }

    #[test]
    fn test_final_manifest_validation() {
        let dir = TempDir::new().unwrap();
        let mut manifest = seeded_manifest(&dir);

        // Missing pass F and finalization fields
        assert!(!validate_final_manifest(&manifest));

        manifest.mark_pass_complete(PassId::F);
        manifest.finalized_at = Some(epoch_seconds());
        manifest.job_status = Some("completed".to_string());
        manifest.run_summary = Some(json!({
            "completion_status": {"all_passes_completed": true}
        }));
        assert!(validate_final_manifest(&manifest));

        // Summary claiming incomplete flips validation
        manifest.run_summary = Some(json!({
            "completion_status": {"all_passes_completed": false}
        }));
        assert!(!validate_final_manifest(&manifest));
    }

    #[test]
    fn test_run_summary_aggregation() {
        let dir = TempDir::new().unwrap();
        let mut manifest = seeded_manifest(&dir);
        manifest.set_pass_results(
            PassId::A,
            json!({"dictionary_entries_extracted": 5, "success": true}),
        );
        manifest.set_pass_results(
            PassId::B,
            json!({"split_performed": false, "parts_created": 0, "success": true}),
        );
        manifest.set_pass_results(
            PassId::C,
            json!({"chunks_extracted": 12, "chunks_loaded": 12, "success": true}),
        );
        manifest.set_pass_results(
            PassId::D,
            json!({
                "chunks_vectorized": 11,
                "chunks_loaded": 11,
                "deduplication_ratio": 0.08,
                "entities_extracted": 20,
                "keywords_extracted": 31,
                "success": true,
            }),
        );
        manifest.set_pass_results(
            PassId::E,
            json!({
                "graph_nodes": 14,
                "graph_edges": 13,
                "cross_references": 4,
                "chunks_updated": 11,
                "dictionary_updates": 3,
                "success": true,
            }),
        );
        manifest.mark_pass_complete(PassId::F);

        let summary = calculate_run_summary(&manifest, &CleanupStats::default());
        assert_eq!(summary["processing_summary"]["raw_chunks_extracted"], json!(12));
        assert_eq!(summary["processing_summary"]["chunks_vectorized"], json!(11));
        assert_eq!(summary["processing_summary"]["graph_nodes_created"], json!(14));
        assert_eq!(summary["data_summary"]["dictionary_updates"], json!(3));
        assert_eq!(
            summary["completion_status"]["all_passes_completed"],
            json!(true)
        );
    }

    #[test]
    fn test_full_finalization_flow() {
        let dir = TempDir::new().unwrap();
        let mut manifest = seeded_manifest(&dir);

        let artifact = dir.path().join("job_9_abcdefabcdef_pass_a_dict.json");
        write_json_atomic(
            &json!({"entries_count": 3, "dictionary_entries": ["a", "b", "c"]}),
            &artifact,
        )
        .unwrap();
        manifest.record_artifact(&artifact).unwrap();
        manifest.save(dir.path()).unwrap();

        let result = run(dir.path(), "job_9_abcdefabcdef", epoch_millis()).unwrap();
        assert!(result.success);
        assert!(result.final_manifest_valid);
        assert_eq!(result.cleanup_stats.validation_errors, 0);
        assert!(dir.path().join("cleanup_report.json").exists());

        let finalized = Manifest::load(dir.path()).unwrap();
        assert_eq!(finalized.job_status.as_deref(), Some("completed"));
        assert_eq!(finalized.pipeline_version.as_deref(), Some("6-pass-system"));
        assert!(finalized.is_pass_complete(PassId::F));
        assert!(finalized.artifacts.iter().all(|a| a.verified_at.is_some()));
    }
}
