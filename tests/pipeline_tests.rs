//! End-to-end pipeline scenarios over synthetic documents and the
//! in-memory backends.

mod test_helpers;

use loreforge::config::EnvName;
use loreforge::dictionary::{DictTerm, TermSource};
use loreforge::driver::{run_bulk_ingest, BulkIngestOptions, EXIT_FAILURES, EXIT_SUCCESS};
use loreforge::manifest::Manifest;
use loreforge::orchestrator::{IngestionPipeline, ProcessOptions};
use loreforge::passes::PassId;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use test_helpers::{
    build_context, rule_elements, snapshot_mtimes, toc_pages, write_stub_pdf, StubBehaviour,
};

fn default_options() -> BulkIngestOptions {
    BulkIngestOptions {
        skip_preflight: true,
        no_cleanup: true,
        ..Default::default()
    }
}

fn find_summary(env_dir: &Path) -> serde_json::Value {
    let summary_path = std::fs::read_dir(env_dir)
        .expect("env dir exists")
        .flatten()
        .map(|e| e.path())
        .find(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().ends_with("_summary.json"))
                .unwrap_or(false)
        })
        .expect("summary artifact written");
    serde_json::from_str(&std::fs::read_to_string(summary_path).expect("readable"))
        .expect("valid summary JSON")
}

#[tokio::test]
async fn happy_path_small_pdf() {
    let dir = TempDir::new().unwrap();
    let uploads = dir.path().join("uploads");
    std::fs::create_dir_all(&uploads).unwrap();
    write_stub_pdf(&uploads, "players_handbook.pdf", 4096);

    let ctx = Arc::new(build_context(
        &dir.path().join("artifacts"),
        EnvName::Dev,
        toc_pages(),
        StubBehaviour::Elements(rule_elements()),
    ));
    let vector_store = ctx.vector_store.clone();
    let dictionary = ctx.dictionary.clone();
    let env_dir = ctx.config.env_artifacts_dir();
    let pipeline = Arc::new(IngestionPipeline::new(ctx));

    let mut options = default_options();
    options.upload_dir = Some(uploads);
    let exit_code = run_bulk_ingest(pipeline, &options).await;
    assert_eq!(exit_code, EXIT_SUCCESS);

    let summary = find_summary(&env_dir);
    assert_eq!(summary["summary_stats"]["total_sources"], 1);
    assert_eq!(summary["summary_stats"]["successful"], 1);
    assert_eq!(summary["summary_stats"]["failed"], 0);

    let source = &summary["sources"][0];
    assert_eq!(source["success"], true);
    assert_eq!(source["integrity_failed"], false);
    assert!(source["toc_entries"].as_i64().unwrap() >= 3);
    assert!(source["raw_chunks"].as_i64().unwrap() >= 3);
    assert_eq!(source["vectors"], source["raw_chunks"]);
    assert_eq!(
        source["pass_results"]["B"]["split_performed"],
        serde_json::json!(false)
    );

    // All six passes recorded with timings
    for pass in ["A", "B", "C", "D", "E", "F"] {
        assert!(source["pass_results"].get(pass).is_some(), "missing {pass}");
    }
    assert_eq!(source["timings"].as_array().unwrap().len(), 6);

    // The job manifest is finalised with every pass
    let job_id = source["job_id"].as_str().unwrap();
    let manifest = Manifest::load(&env_dir.join(job_id)).unwrap();
    for pass in PassId::ALL {
        assert!(manifest.is_pass_complete(pass), "pass {pass} incomplete");
    }
    assert_eq!(manifest.job_status.as_deref(), Some("completed"));
    assert!(manifest.chunks.is_empty());

    // Chunks persisted once per unique chunk id; dictionary seeded
    use loreforge::vector_store::VectorStore;
    assert!(vector_store.count_documents().await.unwrap() >= 3);
    assert!(dictionary.term_count().await.unwrap() >= 3);
}

#[tokio::test]
async fn guardrail_abort_at_pass_c() {
    let dir = TempDir::new().unwrap();
    let uploads = dir.path().join("uploads");
    std::fs::create_dir_all(&uploads).unwrap();
    write_stub_pdf(&uploads, "empty_scan.pdf", 4096);

    let ctx = Arc::new(build_context(
        &dir.path().join("artifacts"),
        EnvName::Dev,
        toc_pages(),
        StubBehaviour::Empty,
    ));
    let env_dir = ctx.config.env_artifacts_dir();
    let pipeline = Arc::new(IngestionPipeline::new(ctx));

    let mut options = default_options();
    options.upload_dir = Some(uploads);
    let exit_code = run_bulk_ingest(pipeline, &options).await;
    assert_eq!(exit_code, EXIT_FAILURES);

    let summary = find_summary(&env_dir);
    let source = &summary["sources"][0];
    assert_eq!(source["success"], false);
    assert_eq!(source["failed_pass"], "C");
    assert_eq!(source["aborted_after_pass"], "C");
    assert_eq!(source["failure_reason"], "Zero output at Pass C");

    // Downstream passes never executed
    assert!(source["pass_results"].get("D").is_none());
    assert!(source["pass_results"].get("E").is_none());
    assert!(source["pass_results"].get("F").is_none());
}

#[tokio::test]
async fn resume_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let pdf = write_stub_pdf(dir.path(), "book.pdf", 4096);

    let ctx = Arc::new(build_context(
        &dir.path().join("artifacts"),
        EnvName::Dev,
        toc_pages(),
        StubBehaviour::Elements(rule_elements()),
    ));
    let vector_store = ctx.vector_store.clone();
    let env_dir = ctx.config.env_artifacts_dir();
    let pipeline = IngestionPipeline::new(ctx);

    let first = pipeline
        .process_source(&pdf, &ProcessOptions::default())
        .await;
    assert!(first.success, "first run failed: {:?}", first.error);

    use loreforge::vector_store::VectorStore;
    let count_before = vector_store.count_documents().await.unwrap();
    let job_dir = env_dir.join(&first.job_id);
    let mtimes_before = snapshot_mtimes(&job_dir);

    let second = pipeline
        .process_source(
            &pdf,
            &ProcessOptions {
                resume: true,
                ..Default::default()
            },
        )
        .await;
    assert!(second.success);
    assert_eq!(second.job_id, first.job_id, "resume reuses the job");

    for pass in ["A", "B", "C", "D", "E", "F"] {
        assert_eq!(
            second.pass_results[pass],
            serde_json::json!({"skipped": true}),
            "pass {pass} was not skipped"
        );
    }

    assert_eq!(vector_store.count_documents().await.unwrap(), count_before);
    assert_eq!(snapshot_mtimes(&job_dir), mtimes_before);
}

#[tokio::test]
async fn resume_reruns_passes_with_invalid_artifacts() {
    let dir = TempDir::new().unwrap();
    let pdf = write_stub_pdf(dir.path(), "book.pdf", 4096);

    let ctx = Arc::new(build_context(
        &dir.path().join("artifacts"),
        EnvName::Dev,
        toc_pages(),
        StubBehaviour::Elements(rule_elements()),
    ));
    let env_dir = ctx.config.env_artifacts_dir();
    let pipeline = IngestionPipeline::new(ctx);

    let first = pipeline
        .process_source(&pdf, &ProcessOptions::default())
        .await;
    assert!(first.success);

    // Losing the finalisation artifact invalidates Pass F's resume check
    let job_dir = env_dir.join(&first.job_id);
    std::fs::remove_file(job_dir.join("cleanup_report.json")).unwrap();

    let second = pipeline
        .process_source(
            &pdf,
            &ProcessOptions {
                resume: true,
                ..Default::default()
            },
        )
        .await;
    assert!(second.success);

    // A through E stay skipped; only the finaliser re-runs
    for pass in ["A", "B", "C", "D", "E"] {
        assert_eq!(
            second.pass_results[pass],
            serde_json::json!({"skipped": true})
        );
    }
    assert!(second.pass_results["F"].get("skipped").is_none());
    assert!(job_dir.join("cleanup_report.json").exists());
}

#[tokio::test]
async fn lock_timeout_fails_second_worker() {
    let dir = TempDir::new().unwrap();
    let pdf = write_stub_pdf(dir.path(), "contended.pdf", 4096);

    let ctx = Arc::new(build_context(
        &dir.path().join("artifacts"),
        EnvName::Dev,
        toc_pages(),
        StubBehaviour::Elements(rule_elements()),
    ));
    let env_dir = ctx.config.env_artifacts_dir();
    let pipeline = IngestionPipeline::new(ctx);

    // First worker holds the barrier
    let lock = pipeline.source_lock(&pdf);
    let _guard = lock.lock().await;

    let result = pipeline
        .process_source(
            &pdf,
            &ProcessOptions {
                barrier_timeout: Duration::from_secs(1),
                ..Default::default()
            },
        )
        .await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.starts_with("Failed to acquire lock"), "got: {error}");
    assert!(error.ends_with("within 1s"), "got: {error}");

    // The losing worker created nothing
    assert!(!env_dir.join(&result.job_id).join("manifest.json").exists());
}

#[tokio::test]
async fn integrity_demotion_by_ratio() {
    let dir = TempDir::new().unwrap();
    let uploads = dir.path().join("uploads");
    std::fs::create_dir_all(&uploads).unwrap();
    write_stub_pdf(&uploads, "thin_book.pdf", 4096);

    let ctx = Arc::new(build_context(
        &dir.path().join("artifacts"),
        EnvName::Dev,
        toc_pages(),
        StubBehaviour::Elements(rule_elements()),
    ));

    // A pre-loaded dictionary drowns the batch ratio below 0.05
    let flood: Vec<DictTerm> = (0..200)
        .map(|i| DictTerm {
            term: format!("Imported Term {}", i),
            definition: "Imported from an earlier ingestion run".to_string(),
            category: "general".to_string(),
            sources: vec![TermSource {
                source: "older_book.pdf".to_string(),
                method: "toc_parse".to_string(),
                page: Some(1),
                section_id: None,
                level: Some(1),
                relations: None,
            }],
        })
        .collect();
    ctx.dictionary.upsert_terms(&flood).await.unwrap();

    let env_dir = ctx.config.env_artifacts_dir();
    let pipeline = Arc::new(IngestionPipeline::new(ctx));

    let mut options = default_options();
    options.upload_dir = Some(uploads);
    let exit_code = run_bulk_ingest(pipeline, &options).await;
    assert_eq!(exit_code, EXIT_FAILURES);

    let summary = find_summary(&env_dir);
    let source = &summary["sources"][0];
    assert_eq!(source["success"], false);
    assert_eq!(source["integrity_failed"], true);
    let failures = source["integrity_failures"].as_array().unwrap();
    assert!(
        failures
            .iter()
            .any(|f| f.as_str().unwrap().contains("critical threshold")),
        "failures: {failures:?}"
    );
    assert_eq!(source["error"], "Integrity validation failed");
}

#[tokio::test]
async fn large_pdf_triggers_split() {
    let dir = TempDir::new().unwrap();
    let uploads = dir.path().join("uploads");
    std::fs::create_dir_all(&uploads).unwrap();
    // 30 MiB file, well over the 25 MiB threshold
    let pdf = write_stub_pdf(&uploads, "encyclopedia.pdf", 30 * 1024 * 1024);

    // 200 content pages behind a 12-chapter ToC
    let toc_body = (1..=12)
        .map(|i| format!("Chapter {} ........ {}", i, (i - 1) * 17 + 1))
        .collect::<Vec<_>>()
        .join("\n");
    let mut pages = vec![format!("Table of Contents\n{}", toc_body)];
    for page in 2..=200 {
        pages.push(format!("Body text for page {page} of the encyclopedia."));
    }

    let ctx = Arc::new(build_context(
        &dir.path().join("artifacts"),
        EnvName::Dev,
        pages,
        StubBehaviour::Elements(rule_elements()),
    ));
    let env_dir = ctx.config.env_artifacts_dir();
    let pipeline = IngestionPipeline::new(ctx);

    let result = pipeline
        .process_source(&pdf, &ProcessOptions::default())
        .await;
    assert!(result.success, "pipeline failed: {:?}", result.error);

    let pass_b = &result.pass_results["B"];
    assert_eq!(pass_b["split_performed"], serde_json::json!(true));
    let parts_created = pass_b["parts_created"].as_u64().unwrap();
    assert!(
        (2..=8).contains(&parts_created),
        "unexpected part count {parts_created}"
    );

    let split_index: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(env_dir.join(&result.job_id).join("split_index.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(split_index["parts_count"].as_u64().unwrap(), parts_created);
    for part in split_index["parts"].as_array().unwrap() {
        let pages = part["page_end"].as_u64().unwrap() - part["page_start"].as_u64().unwrap() + 1;
        assert!(pages >= 10, "part below minimum size: {pages} pages");
        assert!(Path::new(part["file_path"].as_str().unwrap()).exists());
    }

    let pass_c = &result.pass_results["C"];
    assert_eq!(
        pass_c["parts_processed"].as_u64().unwrap(),
        parts_created,
        "Pass C must process every split part"
    );
}

#[tokio::test]
async fn extractor_failure_falls_back_to_text_layer() {
    let dir = TempDir::new().unwrap();
    let pdf = write_stub_pdf(dir.path(), "book.pdf", 4096);

    // Pages long enough for the text-layer paragraph extractor
    let mut pages = toc_pages();
    pages[1] = format!(
        "{}\n\n{}",
        "A spell is a discrete magical effect, a single shaping of the magical energies that \
         suffuse the multiverse into a specific, limited expression.",
        "Casting a spell always costs a slot of the spell's level or higher, and the slot is \
         expended whether or not the casting succeeds in its purpose."
    );

    let ctx = Arc::new(build_context(
        &dir.path().join("artifacts"),
        EnvName::Dev,
        pages,
        StubBehaviour::Fail,
    ));
    let pipeline = IngestionPipeline::new(ctx);

    let result = pipeline
        .process_source(&pdf, &ProcessOptions::default())
        .await;
    assert!(result.success, "pipeline failed: {:?}", result.error);

    let pass_c = &result.pass_results["C"];
    assert_eq!(pass_c["extraction_method"], "text_fallback");
    assert!(pass_c["chunks_extracted"].as_i64().unwrap() >= 2);
}
