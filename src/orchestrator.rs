//! Pipeline orchestrator
//!
//! Drives the six passes A→F sequentially for one source under a
//! per-source barrier, honours resume and force-dict-init, applies the
//! guardrail policy between passes, and assembles the per-source result.
//! Pass errors are fatal to the source but never to the batch.

use crate::artifacts::epoch_millis;
use crate::context::PipelineContext;
use crate::guardrails::GuardrailPolicy;
use crate::manifest::Manifest;
use crate::passes::{pass_a, pass_b, pass_c, pass_d, pass_e, pass_f, PassId};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// Timing for one processing step
#[derive(Debug, Clone)]
pub struct StepTiming {
    pub name: String,
    pub start_ms: i64,
    pub end_ms: i64,
}

impl StepTiming {
    pub fn new(name: &str, start_ms: i64, end_ms: i64) -> Self {
        Self {
            name: name.to_string(),
            start_ms,
            end_ms,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }
}

/// Result of processing a single source through the six-pass pipeline
#[derive(Debug, Clone)]
pub struct SourceResult {
    pub source: String,
    pub job_id: String,
    pub timings: Vec<StepTiming>,
    pub pass_results: BTreeMap<String, Value>,
    pub success: bool,
    pub error: Option<String>,
    pub failure_reason: Option<String>,
    pub failed_pass: Option<String>,
    pub aborted_after_pass: Option<String>,
    pub integrity_failed: bool,
    pub integrity_failures: Vec<String>,
    pub toc_entries: i64,
    pub raw_chunks: i64,
    pub vectors: i64,
}

impl SourceResult {
    fn new(source: String, job_id: String) -> Self {
        Self {
            source,
            job_id,
            timings: Vec::new(),
            pass_results: BTreeMap::new(),
            success: false,
            error: None,
            failure_reason: None,
            failed_pass: None,
            aborted_after_pass: None,
            integrity_failed: false,
            integrity_failures: Vec::new(),
            toc_entries: 0,
            raw_chunks: 0,
            vectors: 0,
        }
    }

    /// Serialise for the batch summary
    pub fn to_json(&self) -> Value {
        json!({
            "source": &self.source,
            "job_id": &self.job_id,
            "success": self.success,
            "error": &self.error,
            "failure_reason": &self.failure_reason,
            "failed_pass": &self.failed_pass,
            "aborted_after_pass": &self.aborted_after_pass,
            "integrity_failed": self.integrity_failed,
            "integrity_failures": &self.integrity_failures,
            "toc_entries": self.toc_entries,
            "raw_chunks": self.raw_chunks,
            "vectors": self.vectors,
            "timings": self
                .timings
                .iter()
                .map(|t| {
                    json!({
                        "step": t.name,
                        "duration_ms": t.duration_ms(),
                        "start_ms": t.start_ms,
                        "end_ms": t.end_ms,
                    })
                })
                .collect::<Vec<Value>>(),
            "pass_results": &self.pass_results,
            "total_time_ms": self.timings.iter().map(|t| t.duration_ms()).sum::<i64>(),
        })
    }
}

/// Options for one `process_source` invocation
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub resume: bool,
    pub force_dict_init: bool,
    pub barrier_timeout: Duration,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            resume: false,
            force_dict_init: false,
            barrier_timeout: Duration::from_secs(1800),
        }
    }
}

/// Six-pass pipeline orchestrator
pub struct IngestionPipeline {
    ctx: Arc<PipelineContext>,
    guardrails: GuardrailPolicy,
    /// Per-source barrier map, guarded by one coarse mutex
    source_locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl IngestionPipeline {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        let guardrails = GuardrailPolicy::new(ctx.config.env);
        Self {
            ctx,
            guardrails,
            source_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    /// Get or create the barrier for a source path
    pub fn source_lock(&self, source_path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .source_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(source_path.to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Stable 12-character hash of filename, size, and mtime
    pub fn source_hash12(pdf_path: &Path) -> String {
        let name = pdf_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (size, mtime) = std::fs::metadata(pdf_path)
            .map(|m| {
                let mtime = m
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                (m.len(), mtime)
            })
            .unwrap_or((0, 0));

        let digest = md5::compute(format!("{}_{}_{}", name, size, mtime).as_bytes());
        format!("{:x}", digest)[..12].to_string()
    }

    fn resolve_job_id(&self, pdf_path: &Path, resume: bool) -> String {
        let hash = Self::source_hash12(pdf_path);
        if resume {
            if let Some(existing) = self.find_existing_job(&hash) {
                info!("resuming existing job {}", existing);
                return existing;
            }
        }
        format!("job_{}_{}", chrono::Utc::now().timestamp(), hash)
    }

    /// Most recent job directory for this source hash, if one exists
    fn find_existing_job(&self, source_hash12: &str) -> Option<String> {
        let env_dir = self.ctx.config.env_artifacts_dir();
        let suffix = format!("_{}", source_hash12);
        let mut candidates: Vec<String> = std::fs::read_dir(&env_dir)
            .ok()?
            .flatten()
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with("job_") && name.ends_with(&suffix))
            .filter(|name| env_dir.join(name).join("manifest.json").exists())
            .collect();
        candidates.sort();
        candidates.pop()
    }

    /// Process one source through the complete six-pass pipeline
    pub async fn process_source(&self, pdf_path: &Path, opts: &ProcessOptions) -> SourceResult {
        let source_name = pdf_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let lock = self.source_lock(pdf_path);
        let guard = match tokio::time::timeout(opts.barrier_timeout, lock.lock_owned()).await {
            Ok(guard) => guard,
            Err(_) => {
                let message = format!(
                    "Failed to acquire lock for {} within {}s",
                    source_name,
                    opts.barrier_timeout.as_secs()
                );
                error!("{}", message);
                let mut result = SourceResult::new(
                    source_name,
                    self.resolve_job_id(pdf_path, opts.resume),
                );
                result.error = Some(message);
                return result;
            }
        };

        let result = self.process_sequential(pdf_path, &source_name, opts).await;
        drop(guard);
        result
    }

    async fn process_sequential(
        &self,
        pdf_path: &Path,
        source_name: &str,
        opts: &ProcessOptions,
    ) -> SourceResult {
        let job_id = self.resolve_job_id(pdf_path, opts.resume);
        let job_dir = self.ctx.job_dir(&job_id);
        if let Err(e) = std::fs::create_dir_all(&job_dir) {
            let mut result = SourceResult::new(source_name.to_string(), job_id);
            result.error = Some(format!("failed to create job directory: {}", e));
            return result;
        }

        let mut result = SourceResult::new(source_name.to_string(), job_id.clone());
        info!(
            "starting 6-pass pipeline for {} (job: {})",
            source_name, job_id
        );

        // Pass A: ToC parse (prime dictionary)
        let t_start = epoch_millis();
        if self.should_run_pass(PassId::A, &job_dir, opts.resume) || opts.force_dict_init {
            if opts.force_dict_init {
                info!("force running Pass A (dict init) for {}", source_name);
            } else {
                info!("running Pass A for {}", source_name);
            }
            let pass_result =
                pass_a::process_pass_a(&self.ctx, pdf_path, &job_dir, &job_id, opts.force_dict_init)
                    .await;
            if !pass_result.success {
                return self.fail(result, PassId::A, pass_result.error_message);
            }
            result
                .pass_results
                .insert("A".to_string(), to_value(&pass_result));
        } else {
            info!("Pass A artifacts exist; skipping for resume");
            result
                .pass_results
                .insert("A".to_string(), json!({"skipped": true}));
        }
        result.timings.push(StepTiming::new(
            PassId::A.timing_label(),
            t_start,
            epoch_millis(),
        ));

        // Pass B: logical split (> 25 MiB)
        let t_start = epoch_millis();
        if self.should_run_pass(PassId::B, &job_dir, opts.resume) {
            info!("running Pass B for {}", source_name);
            let pass_result = pass_b::process_pass_b(&self.ctx, pdf_path, &job_dir, &job_id).await;
            if !pass_result.success {
                return self.fail(result, PassId::B, pass_result.error_message);
            }
            result
                .pass_results
                .insert("B".to_string(), to_value(&pass_result));
        } else {
            info!("Pass B artifacts exist; skipping for resume");
            result
                .pass_results
                .insert("B".to_string(), json!({"skipped": true}));
        }
        result.timings.push(StepTiming::new(
            PassId::B.timing_label(),
            t_start,
            epoch_millis(),
        ));

        // Pass C: extraction
        let t_start = epoch_millis();
        if self.should_run_pass(PassId::C, &job_dir, opts.resume) {
            info!("running Pass C for {}", source_name);
            let pass_result = pass_c::process_pass_c(&self.ctx, pdf_path, &job_dir, &job_id).await;
            if !pass_result.success {
                return self.fail(result, PassId::C, pass_result.error_message);
            }
            let value = to_value(&pass_result);
            result.pass_results.insert("C".to_string(), value.clone());

            if self.guardrails.should_abort_source(PassId::C, &value) {
                result.timings.push(StepTiming::new(
                    PassId::C.timing_label(),
                    t_start,
                    epoch_millis(),
                ));
                return self.abort(result, PassId::C, &value, source_name);
            }
        } else {
            info!("Pass C artifacts exist; skipping for resume");
            result
                .pass_results
                .insert("C".to_string(), json!({"skipped": true}));
        }
        result.timings.push(StepTiming::new(
            PassId::C.timing_label(),
            t_start,
            epoch_millis(),
        ));

        // Pass D: vectorisation & enrichment
        let t_start = epoch_millis();
        if self.should_run_pass(PassId::D, &job_dir, opts.resume) {
            info!("running Pass D for {}", source_name);
            let pass_result = pass_d::process_pass_d(&self.ctx, &job_dir, &job_id).await;
            if !pass_result.success {
                return self.fail(result, PassId::D, pass_result.error_message);
            }
            let value = to_value(&pass_result);
            result.pass_results.insert("D".to_string(), value.clone());

            if self.guardrails.should_abort_source(PassId::D, &value) {
                result.timings.push(StepTiming::new(
                    PassId::D.timing_label(),
                    t_start,
                    epoch_millis(),
                ));
                return self.abort(result, PassId::D, &value, source_name);
            }
        } else {
            info!("Pass D artifacts exist; skipping for resume");
            result
                .pass_results
                .insert("D".to_string(), json!({"skipped": true}));
        }
        result.timings.push(StepTiming::new(
            PassId::D.timing_label(),
            t_start,
            epoch_millis(),
        ));

        // Pass E: graph & cross-references
        let t_start = epoch_millis();
        if self.should_run_pass(PassId::E, &job_dir, opts.resume) {
            info!("running Pass E for {}", source_name);
            let pass_result = pass_e::process_pass_e(&self.ctx, &job_dir, &job_id).await;
            if !pass_result.success {
                return self.fail(result, PassId::E, pass_result.error_message);
            }
            result
                .pass_results
                .insert("E".to_string(), to_value(&pass_result));
        } else {
            info!("Pass E artifacts exist; skipping for resume");
            result
                .pass_results
                .insert("E".to_string(), json!({"skipped": true}));
        }
        result.timings.push(StepTiming::new(
            PassId::E.timing_label(),
            t_start,
            epoch_millis(),
        ));

        // Pass F: finalisation. On resume with a finalised manifest it is
        // skippable like any other pass.
        let t_start = epoch_millis();
        if self.should_run_pass(PassId::F, &job_dir, opts.resume) {
            info!("running Pass F (finalization) for {}", source_name);
            let pass_result = pass_f::process_pass_f(&self.ctx, &job_dir, &job_id).await;
            if !pass_result.success {
                return self.fail(result, PassId::F, pass_result.error_message);
            }
            result
                .pass_results
                .insert("F".to_string(), to_value(&pass_result));
        } else {
            info!("Pass F artifacts exist; skipping for resume");
            result
                .pass_results
                .insert("F".to_string(), json!({"skipped": true}));
        }
        result.timings.push(StepTiming::new(
            PassId::F.timing_label(),
            t_start,
            epoch_millis(),
        ));

        info!("6-pass pipeline completed for {}", source_name);
        result.success = true;
        result
    }

    fn fail(
        &self,
        mut result: SourceResult,
        pass: PassId,
        message: Option<String>,
    ) -> SourceResult {
        let message = format!(
            "Pass {} failed: {}",
            pass,
            message.unwrap_or_else(|| "unknown error".to_string())
        );
        error!("6-pass pipeline failed for {}: {}", result.source, message);
        result.success = false;
        result.error = Some(message);
        result
    }

    /// Guardrail abort: record failure metadata and skip downstream passes
    fn abort(
        &self,
        mut result: SourceResult,
        pass: PassId,
        pass_value: &Value,
        source_name: &str,
    ) -> SourceResult {
        error!(
            "[FATAL][{}] Pass {} produced zero output — aborting source after Pass {}",
            result.job_id, pass, pass
        );
        let summary = self.guardrails.failure_summary(pass, pass_value);
        let reason = summary["failure_reason"]
            .as_str()
            .unwrap_or("Unknown")
            .to_string();
        error!("[FATAL][{}] Failure reason: {}", result.job_id, reason);
        error!("[FATAL][{}] Source: {}", result.job_id, source_name);
        warn!("no downstream passes will execute for this source");

        result.success = false;
        result.error = Some(format!("Pipeline aborted after Pass {}", pass));
        result.failure_reason = Some(reason);
        result.failed_pass = Some(pass.letter().to_string());
        result.aborted_after_pass = Some(pass.letter().to_string());
        result
    }

    /// Resume logic: re-run unless the manifest marks the pass complete
    /// and its expected artifacts validate
    fn should_run_pass(&self, pass: PassId, job_dir: &Path, resume: bool) -> bool {
        if !resume {
            return true;
        }

        let manifest = match Manifest::load(job_dir) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("failed to read manifest for resume check: {}", e);
                return true;
            }
        };

        if !manifest.is_pass_complete(pass) {
            return true;
        }

        if self.validate_pass_artifacts(pass, job_dir, &manifest) {
            info!("skipping Pass {} - already completed with valid artifacts", pass);
            false
        } else {
            warn!(
                "Pass {} marked complete but artifacts missing/invalid - re-running",
                pass
            );
            true
        }
    }

    /// Expected-artifact validation per pass for resume decisions
    fn validate_pass_artifacts(&self, pass: PassId, job_dir: &Path, manifest: &Manifest) -> bool {
        let mut expected: Vec<PathBuf> = match pass {
            PassId::A | PassId::F => vec![job_dir.join("manifest.json")],
            PassId::B => {
                let mut files = vec![job_dir.join("manifest.json")];
                let split_performed = manifest
                    .pass_results(PassId::B)
                    .and_then(|r| r.get("split_performed"))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if split_performed {
                    files.push(job_dir.join("split_index.json"));
                }
                files
            }
            // Chunks live in the vector store; the manifest is the record
            PassId::C | PassId::D | PassId::E => Vec::new(),
        };

        if pass == PassId::F {
            expected.push(job_dir.join("cleanup_report.json"));
        }

        for path in &expected {
            let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            if size == 0 {
                warn!("missing or empty artifact for Pass {}: {}", pass, path.display());
                return false;
            }
        }

        // A pass that recorded a failure in the manifest is not resumable
        if let Some(results) = manifest.pass_results(pass) {
            if results.get("success").and_then(|v| v.as_bool()) == Some(false) {
                warn!("Pass {} marked as failed in manifest", pass);
                return false;
            }
        }

        true
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|_| json!({}))
}
