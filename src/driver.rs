//! Batch driver
//!
//! Enumerates PDFs in the upload directory, runs preflight checks,
//! optionally resets the stores, dispatches sources through a bounded
//! worker pool, applies post-run integrity validation, writes the batch
//! summary artifact, prints the failure table, and computes the exit
//! code.

use crate::artifacts::write_json_atomic;
use crate::integrity::{apply_integrity_validation, check_chunk_dictionary_consistency};
use crate::orchestrator::{IngestionPipeline, ProcessOptions, SourceResult};
use crate::preflight::{run_preflight_checks, run_preflight_checks_with_skip};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// All sources succeeded and passed integrity validation
pub const EXIT_SUCCESS: i32 = 0;
/// At least one source failed
pub const EXIT_FAILURES: i32 = 1;
/// Preflight / dependency error
pub const EXIT_PREFLIGHT: i32 = 2;

/// Typed confirmation required for production database resets
pub const PROD_RESET_CONFIRMATION: &str = "DELETE_ALL_PROD_DATA";

/// Options for one bulk ingestion run
#[derive(Debug, Clone)]
pub struct BulkIngestOptions {
    pub upload_dir: Option<PathBuf>,
    pub reset_db: bool,
    pub resume: bool,
    pub force_dict_init: bool,
    pub cleanup_days: u64,
    pub no_cleanup: bool,
    pub skip_preflight: bool,
    pub verify_deps: bool,
    /// Confirmation string collected by the CLI for prod resets
    pub prod_reset_confirmation: Option<String>,
}

impl Default for BulkIngestOptions {
    fn default() -> Self {
        Self {
            upload_dir: None,
            reset_db: false,
            resume: false,
            force_dict_init: false,
            cleanup_days: 7,
            no_cleanup: false,
            skip_preflight: false,
            verify_deps: false,
            prod_reset_confirmation: None,
        }
    }
}

/// Run the full bulk ingestion flow and return the process exit code
pub async fn run_bulk_ingest(pipeline: Arc<IngestionPipeline>, opts: &BulkIngestOptions) -> i32 {
    let ctx = pipeline.context().clone();
    let env = ctx.config.env;
    info!(
        "starting 6-pass bulk ingestion - env: {}, threads: {}",
        env, ctx.config.threads
    );

    if opts.verify_deps {
        info!("running dependency verification checks...");
        return match run_preflight_checks().await {
            Ok(()) => {
                println!();
                println!("=== Dependency Verification PASSED ===");
                println!("All required tools (Poppler, Tesseract) are installed and functional.");
                println!();
                println!("Next steps:");
                println!("  1. Run ingestion: loreforge-ingest --env dev --upload-dir <path>");
                println!("  2. Verify again any time with: loreforge-ingest --verify-deps");
                EXIT_SUCCESS
            }
            Err(e) => {
                error!("dependency verification failed: {}", e);
                println!();
                println!("=== Dependency Verification FAILED ===");
                println!("Missing or non-functional dependency: {}", e);
                println!();
                println!("Remediation:");
                println!("  1. Install Poppler utilities and Tesseract");
                println!("  2. Verify after setup: loreforge-ingest --verify-deps");
                EXIT_PREFLIGHT
            }
        };
    }

    if let Err(e) = run_preflight_checks_with_skip(opts.skip_preflight).await {
        error!("preflight check failed: {}", e);
        error!("use --skip-preflight to bypass (not recommended for production)");
        return EXIT_PREFLIGHT;
    }

    if !opts.no_cleanup {
        cleanup_old_artifacts(&ctx.config.env_artifacts_dir(), opts.cleanup_days);
    }

    if opts.reset_db {
        if env == crate::config::EnvName::Prod
            && opts.prod_reset_confirmation.as_deref() != Some(PROD_RESET_CONFIRMATION)
        {
            error!(
                "database reset in production requires typed confirmation '{}'",
                PROD_RESET_CONFIRMATION
            );
            info!("database reset cancelled");
            return EXIT_FAILURES;
        }

        warn!("RESETTING database collections in {} environment...", env);
        match ctx.vector_store.delete_all().await {
            Ok(count) => info!("emptied chunks collection ({} documents)", count),
            Err(e) => {
                error!("failed to empty chunk collection: {}", e);
                return EXIT_FAILURES;
            }
        }
        match ctx.dictionary.clear().await {
            Ok(count) => info!("emptied dictionary collection ({} terms)", count),
            Err(e) => warn!("failed to empty dictionary collection: {}", e),
        }
    } else {
        info!("starting incremental ingestion (preserving existing data)");
    }

    let upload_dir = match &opts.upload_dir {
        Some(dir) => dir.clone(),
        None => {
            if opts.reset_db {
                info!("database reset completed; no upload directory specified");
            } else {
                info!("no upload directory specified; use --upload-dir to ingest documents");
            }
            return EXIT_SUCCESS;
        }
    };

    if !upload_dir.exists() {
        error!("upload directory not found: {}", upload_dir.display());
        return EXIT_FAILURES;
    }

    let mut pdfs: Vec<PathBuf> = std::fs::read_dir(&upload_dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| {
                    path.extension()
                        .and_then(|e| e.to_str())
                        .map(|e| e.eq_ignore_ascii_case("pdf"))
                        .unwrap_or(false)
                })
                .collect()
        })
        .unwrap_or_default();
    pdfs.sort();

    if pdfs.is_empty() {
        warn!("no PDFs found in {}", upload_dir.display());
        return EXIT_SUCCESS;
    }
    info!("found {} PDFs to process", pdfs.len());

    let started = crate::artifacts::epoch_millis();
    let mut results = dispatch_sources(&pipeline, pdfs, opts).await;
    let elapsed_ms = crate::artifacts::epoch_millis() - started;

    // Cross-source consistency, then per-source integrity demotion
    let consistency = check_chunk_dictionary_consistency(&results, ctx.dictionary.as_ref()).await;
    apply_integrity_validation(&mut results, &consistency);

    write_batch_summary(&ctx.config, &results, &consistency, elapsed_ms);
    print_failure_table(&results);

    let ok = results.iter().filter(|r| r.success).count();
    let failed = results.len() - ok;
    info!(
        "6-pass bulk ingestion complete in {}ms — {} ok, {} failed",
        elapsed_ms, ok, failed
    );

    if failed == 0 {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURES
    }
}

/// Run every source through the pipeline with bounded concurrency,
/// collecting results in completion order
async fn dispatch_sources(
    pipeline: &Arc<IngestionPipeline>,
    pdfs: Vec<PathBuf>,
    opts: &BulkIngestOptions,
) -> Vec<SourceResult> {
    let ctx = pipeline.context();
    let semaphore = Arc::new(Semaphore::new(ctx.config.threads.max(1)));
    let process_opts = ProcessOptions {
        resume: opts.resume,
        force_dict_init: opts.force_dict_init,
        barrier_timeout: Duration::from_secs(ctx.config.barrier_timeout_secs),
    };

    let mut workers: FuturesUnordered<tokio::task::JoinHandle<SourceResult>> =
        FuturesUnordered::new();
    for pdf in pdfs {
        let pipeline = pipeline.clone();
        let semaphore = semaphore.clone();
        let process_opts = process_opts.clone();
        workers.push(tokio::spawn(async move {
            // The semaphore bounds concurrent workers; it is never closed
            let _permit = semaphore.acquire_owned().await;
            pipeline.process_source(&pdf, &process_opts).await
        }));
    }

    let mut results = Vec::new();
    while let Some(joined) = workers.next().await {
        match joined {
            Ok(result) => {
                let status = if result.success {
                    "OK".to_string()
                } else {
                    format!("FAIL: {}", result.error.as_deref().unwrap_or("unknown"))
                };
                info!("completed {}: {}", result.source, status);
                results.push(result);
            }
            Err(e) => error!("worker error: {}", e),
        }
    }
    results
}

fn write_batch_summary(
    config: &crate::config::IngestConfig,
    results: &[SourceResult],
    consistency: &crate::integrity::ConsistencyReport,
    elapsed_ms: i64,
) {
    let summary_dir = config.env_artifacts_dir();
    let run_id = chrono::Local::now()
        .format("bulk_6pass_%Y%m%d_%H%M%S")
        .to_string();
    let summary_file = summary_dir.join(format!("{}_summary.json", run_id));

    let total_passes_completed: usize = results
        .iter()
        .filter(|r| r.success)
        .map(|r| {
            r.pass_results
                .values()
                .filter(|v| !v.get("skipped").and_then(|s| s.as_bool()).unwrap_or(false))
                .count()
        })
        .sum();

    let summary = json!({
        "pipeline_version": "6-pass-system",
        "env": config.env.as_str(),
        "run_id": run_id,
        "threads": config.threads,
        "elapsed_ms": elapsed_ms,
        "sources": results.iter().map(|r| r.to_json()).collect::<Vec<_>>(),
        "summary_stats": {
            "total_sources": results.len(),
            "successful": results.iter().filter(|r| r.success).count(),
            "failed": results.iter().filter(|r| !r.success).count(),
            "total_passes_completed": total_passes_completed,
        },
        "consistency_check": consistency,
    });

    match write_json_atomic(&summary, &summary_file) {
        Ok(()) => info!("wrote summary: {}", summary_file.display()),
        Err(e) => warn!("failed writing summary: {}", e),
    }
}

/// Failure-table pass code for one failed result
fn failed_pass_code(result: &SourceResult) -> (String, String) {
    if result.integrity_failed && !result.integrity_failures.is_empty() {
        let first = &result.integrity_failures[0];
        let code = if first.contains("Pass A") {
            "A (ToC)"
        } else if first.contains("Pass C") {
            "C (Extract)"
        } else if first.contains("Pass D") {
            "D (Vector)"
        } else if first.to_lowercase().contains("ratio") {
            "Ratio"
        } else {
            "Integrity"
        };
        (code.to_string(), truncate(first, 30))
    } else if let Some(failed_pass) = &result.failed_pass {
        (
            format!("{} (Guard)", failed_pass),
            truncate(
                result.failure_reason.as_deref().unwrap_or("Guardrail failure"),
                30,
            ),
        )
    } else {
        (
            "Pipeline".to_string(),
            truncate(result.error.as_deref().unwrap_or("Unknown error"), 30),
        )
    }
}

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// Print the concise failure table: source | failed pass | reason
pub fn print_failure_table(results: &[SourceResult]) {
    let failed: Vec<&SourceResult> = results.iter().filter(|r| !r.success).collect();
    if failed.is_empty() {
        return;
    }

    println!("\n{}", "=".repeat(80));
    println!("FAILED SOURCES SUMMARY");
    println!("{}", "=".repeat(80));
    println!("{:<30} | {:<12} | {:<30}", "Source", "Failed Pass", "Reason");
    println!("{}", "-".repeat(80));

    for result in &failed {
        let source_name = Path::new(&result.source)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| result.source.clone());
        let (code, reason) = failed_pass_code(result);
        println!(
            "{:<30} | {:<12} | {:<30}",
            truncate(&source_name, 30),
            code,
            reason
        );
    }

    println!("{}", "-".repeat(80));
    println!("Total failed sources: {}", failed.len());
    println!("{}\n", "=".repeat(80));
}

/// Remove job directories older than the retention window
pub fn cleanup_old_artifacts(env_dir: &Path, days_to_keep: u64) {
    if !env_dir.exists() {
        info!("no artifacts directory found: {}", env_dir.display());
        return;
    }

    let cutoff = std::time::SystemTime::now()
        .checked_sub(Duration::from_secs(days_to_keep * 24 * 60 * 60));
    let Some(cutoff) = cutoff else { return };

    let mut removed_count = 0;
    let mut removed_size: u64 = 0;
    let entries = match std::fs::read_dir(env_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("failed to scan artifacts directory: {}", e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::now());
        if modified >= cutoff {
            continue;
        }

        let dir_size = dir_size(&path);
        match std::fs::remove_dir_all(&path) {
            Ok(()) => {
                removed_count += 1;
                removed_size += dir_size;
                info!(
                    "removed old artifact directory: {} ({} bytes)",
                    path.display(),
                    dir_size
                );
            }
            Err(e) => warn!("failed to remove artifact directory {}: {}", path.display(), e),
        }
    }

    if removed_count > 0 {
        info!(
            "cleanup completed: removed {} directories, freed {} bytes",
            removed_count, removed_size
        );
    } else {
        info!("no old artifacts found for cleanup");
    }
}

fn dir_size(dir: &Path) -> u64 {
    let mut total = 0;
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                total += dir_size(&path);
            } else {
                total += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn failed_result() -> SourceResult {
        SourceResult {
            source: "broken-book.pdf".to_string(),
            job_id: "job_1_abc".to_string(),
            timings: Vec::new(),
            pass_results: BTreeMap::new(),
            success: false,
            error: Some("Pipeline aborted after Pass C".to_string()),
            failure_reason: Some("Zero output at Pass C".to_string()),
            failed_pass: Some("C".to_string()),
            aborted_after_pass: Some("C".to_string()),
            integrity_failed: false,
            integrity_failures: Vec::new(),
            toc_entries: 0,
            raw_chunks: 0,
            vectors: 0,
        }
    }

    #[test]
    fn test_guardrail_failure_code() {
        let (code, reason) = failed_pass_code(&failed_result());
        assert_eq!(code, "C (Guard)");
        assert_eq!(reason, "Zero output at Pass C");
    }

    #[test]
    fn test_integrity_failure_codes() {
        let mut result = failed_result();
        result.failed_pass = None;
        result.integrity_failed = true;
        result.integrity_failures = vec!["chunk_to_dict_ratio 0.015 < 0.05 (critical threshold)".to_string()];
        let (code, _) = failed_pass_code(&result);
        assert_eq!(code, "Ratio");

        result.integrity_failures = vec!["Raw chunks < 1 (Pass C incomplete)".to_string()];
        let (code, _) = failed_pass_code(&result);
        assert_eq!(code, "C (Extract)");

        result.integrity_failures = vec!["Vectors < 1 (Pass D incomplete)".to_string()];
        let (code, _) = failed_pass_code(&result);
        assert_eq!(code, "D (Vector)");
    }

    #[test]
    fn test_generic_pipeline_code() {
        let mut result = failed_result();
        result.failed_pass = None;
        result.failure_reason = None;
        let (code, reason) = failed_pass_code(&result);
        assert_eq!(code, "Pipeline");
        assert!(reason.starts_with("Pipeline aborted"));
    }

    #[test]
    fn test_cleanup_respects_retention() {
        let dir = tempfile::TempDir::new().unwrap();
        let job_dir = dir.path().join("job_1_abc");
        std::fs::create_dir_all(&job_dir).unwrap();
        std::fs::write(job_dir.join("manifest.json"), b"{}").unwrap();

        // Fresh directories survive a 7-day retention window
        cleanup_old_artifacts(dir.path(), 7);
        assert!(job_dir.exists());

        // A zero-day window removes everything older than "now"
        cleanup_old_artifacts(dir.path(), 0);
        assert!(!job_dir.exists());
    }
}
