//! Post-run integrity validation
//!
//! After the pipeline returns, the batch driver checks every apparently
//! successful source against minimum output counts and the batch-level
//! chunk-to-dictionary ratio, demoting sources that fail. The ratio is
//! computed across the whole batch, so one dominant source can mask
//! another's under-production.

use crate::dictionary::DictionaryStore;
use crate::orchestrator::SourceResult;
use serde::Serialize;
use tracing::{error, warn};

/// Ratio below which the batch is considered an integrity failure
pub const RATIO_CRITICAL: f64 = 0.05;

/// Ratio below which a warning is recorded
pub const RATIO_WARNING: f64 = 0.20;

/// Ratio above which over-chunking is suspected
pub const RATIO_OVERCHUNKING: f64 = 10.0;

/// Batch-level chunk vs dictionary consistency report
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsistencyReport {
    pub chunk_count: i64,
    pub dictionary_count: i64,
    pub chunk_to_dict_ratio: f64,
    pub warnings: Vec<String>,
}

/// Compute the consistency report across all successful sources
pub async fn check_chunk_dictionary_consistency(
    results: &[SourceResult],
    dictionary: &dyn DictionaryStore,
) -> ConsistencyReport {
    let mut report = ConsistencyReport::default();

    for result in results.iter().filter(|r| r.success) {
        for pass_data in result.pass_results.values() {
            if let Some(count) = pass_data.get("chunks_processed").and_then(|v| v.as_i64()) {
                report.chunk_count += count;
            }
        }
    }

    match dictionary.term_count().await {
        Ok(count) => report.dictionary_count = count as i64,
        Err(e) => {
            report
                .warnings
                .push(format!("Failed to get dictionary count: {}", e));
            return report;
        }
    }

    if report.dictionary_count > 0 {
        let ratio = report.chunk_count as f64 / report.dictionary_count as f64;
        report.chunk_to_dict_ratio = ratio;

        if ratio < RATIO_CRITICAL {
            report.warnings.push(format!(
                "CRITICAL: chunk-to-dictionary ratio ({:.3}) < {} - pipeline integrity failure",
                ratio, RATIO_CRITICAL
            ));
        } else if ratio < RATIO_WARNING {
            report.warnings.push(format!(
                "WARNING: chunk-to-dictionary ratio ({:.3}) < {} - possible chunk loss",
                ratio, RATIO_WARNING
            ));
        } else if ratio > RATIO_OVERCHUNKING {
            report.warnings.push(format!(
                "WARNING: High chunk-to-dictionary ratio ({:.2}) - possible over-chunking",
                ratio
            ));
        }
    } else {
        report
            .warnings
            .push("Dictionary is empty - this should not happen after ingestion".to_string());
    }

    report
}

/// Per-source success-criteria validation
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityValidation {
    pub passed: bool,
    pub failures: Vec<String>,
    pub toc_entries: i64,
    pub raw_chunks: i64,
    pub vectors: i64,
    pub chunk_to_dict_ratio: f64,
}

/// Validate one source against the success criteria: ToC entries,
/// raw chunks, vectors all ≥ 1 and the batch ratio ≥ the critical floor
pub fn validate_source_success_criteria(
    result: &SourceResult,
    report: &ConsistencyReport,
) -> IntegrityValidation {
    let mut validation = IntegrityValidation {
        passed: true,
        failures: Vec::new(),
        toc_entries: 0,
        raw_chunks: 0,
        vectors: 0,
        chunk_to_dict_ratio: report.chunk_to_dict_ratio,
    };

    if !result.success {
        validation.passed = false;
        validation.failures.push(format!(
            "Original processing failed: {}",
            result.error.as_deref().unwrap_or("unknown")
        ));
        return validation;
    }

    for (pass_id, pass_data) in &result.pass_results {
        let skipped = pass_data
            .get("skipped")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if skipped {
            continue;
        }

        match pass_id.as_str() {
            "A" => {
                validation.toc_entries = pass_data
                    .get("toc_entries")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0)
            }
            "C" => {
                validation.raw_chunks = pass_data
                    .get("chunks_extracted")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0)
            }
            "D" => {
                validation.vectors = pass_data
                    .get("chunks_vectorized")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0)
            }
            _ => {}
        }
    }

    if validation.toc_entries < 1 {
        validation.passed = false;
        validation
            .failures
            .push("ToC entries < 1 (Pass A incomplete)".to_string());
    }
    if validation.raw_chunks < 1 {
        validation.passed = false;
        validation
            .failures
            .push("Raw chunks < 1 (Pass C incomplete)".to_string());
    }
    if validation.vectors < 1 {
        validation.passed = false;
        validation
            .failures
            .push("Vectors < 1 (Pass D incomplete)".to_string());
    }

    let ratio = validation.chunk_to_dict_ratio;
    if ratio < RATIO_CRITICAL {
        validation.passed = false;
        validation.failures.push(format!(
            "chunk_to_dict_ratio {:.3} < {} (critical threshold)",
            ratio, RATIO_CRITICAL
        ));
    } else if ratio < RATIO_WARNING {
        // Recorded but non-demoting
        validation.failures.push(format!(
            "chunk_to_dict_ratio {:.3} < {} (warning threshold)",
            ratio, RATIO_WARNING
        ));
    } else if ratio > RATIO_OVERCHUNKING {
        validation.failures.push(format!(
            "High chunk_to_dictionary ratio {:.2} - possible over-chunking",
            ratio
        ));
    }

    validation
}

/// Apply validation to every successful result, demoting failures
pub fn apply_integrity_validation(results: &mut [SourceResult], report: &ConsistencyReport) {
    for warning in &report.warnings {
        warn!("Consistency check: {}", warning);
    }

    for result in results.iter_mut() {
        if !result.success {
            continue;
        }

        let validation = validate_source_success_criteria(result, report);
        result.integrity_failed = !validation.passed;
        result.integrity_failures = validation.failures.clone();
        result.toc_entries = validation.toc_entries;
        result.raw_chunks = validation.raw_chunks;
        result.vectors = validation.vectors;

        if result.integrity_failed {
            result.success = false;
            if result.error.is_none() {
                result.error = Some("Integrity validation failed".to_string());
            }
            result.failure_reason = Some(validation.failures.join("; "));

            error!(
                "[INTEGRITY FAILURE] {}: {}",
                result.source,
                result.failure_reason.as_deref().unwrap_or("")
            );
            for failure in &validation.failures {
                error!("[INTEGRITY] {}: {}", result.source, failure);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::{DictTerm, DictionaryStore, MemoryDictionaryStore, TermSource};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn successful_result(toc: i64, raw: i64, vectors: i64) -> SourceResult {
        let mut pass_results = BTreeMap::new();
        pass_results.insert(
            "A".to_string(),
            json!({"toc_entries": toc, "sections_parsed": toc}),
        );
        pass_results.insert("B".to_string(), json!({"split_performed": false}));
        pass_results.insert(
            "C".to_string(),
            json!({"chunks_extracted": raw, "chunks_loaded": raw}),
        );
        pass_results.insert(
            "D".to_string(),
            json!({"chunks_processed": raw, "chunks_vectorized": vectors}),
        );

        SourceResult {
            source: "book.pdf".to_string(),
            job_id: "job_1_abc".to_string(),
            timings: Vec::new(),
            pass_results,
            success: true,
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

    fn report(chunks: i64, terms: i64) -> ConsistencyReport {
        ConsistencyReport {
            chunk_count: chunks,
            dictionary_count: terms,
            chunk_to_dict_ratio: if terms > 0 {
                chunks as f64 / terms as f64
            } else {
                0.0
            },
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_healthy_source_passes() {
        let result = successful_result(3, 12, 12);
        let validation = validate_source_success_criteria(&result, &report(12, 15));
        assert!(validation.passed);
        assert_eq!(validation.toc_entries, 3);
        assert_eq!(validation.raw_chunks, 12);
        assert_eq!(validation.vectors, 12);
    }

    #[test]
    fn test_ratio_demotion() {
        let result = successful_result(3, 3, 3);
        let validation = validate_source_success_criteria(&result, &report(3, 200));
        assert!(!validation.passed);
        assert!(validation
            .failures
            .iter()
            .any(|f| f.contains("0.015") && f.contains("critical threshold")));
    }

    #[test]
    fn test_ratio_warning_does_not_demote() {
        let result = successful_result(3, 10, 10);
        // ratio 0.1: warning band
        let validation = validate_source_success_criteria(&result, &report(10, 100));
        assert!(validation.passed);
        assert!(validation
            .failures
            .iter()
            .any(|f| f.contains("warning threshold")));
    }

    #[test]
    fn test_overchunking_warning() {
        let result = successful_result(3, 100, 100);
        let validation = validate_source_success_criteria(&result, &report(1000, 10));
        assert!(validation.passed);
        assert!(validation
            .failures
            .iter()
            .any(|f| f.contains("over-chunking")));
    }

    #[test]
    fn test_zero_counts_demote() {
        let result = successful_result(0, 12, 12);
        let validation = validate_source_success_criteria(&result, &report(12, 15));
        assert!(!validation.passed);
        assert!(validation
            .failures
            .contains(&"ToC entries < 1 (Pass A incomplete)".to_string()));
    }

    #[test]
    fn test_apply_demotes_and_annotates() {
        let mut results = vec![successful_result(3, 3, 3)];
        apply_integrity_validation(&mut results, &report(3, 200));

        let result = &results[0];
        assert!(!result.success);
        assert!(result.integrity_failed);
        assert_eq!(result.error.as_deref(), Some("Integrity validation failed"));
        assert!(result.failure_reason.as_deref().unwrap().contains("0.015"));
        assert_eq!(result.toc_entries, 3);
    }

    #[tokio::test]
    async fn test_consistency_report_counts() {
        let dictionary = MemoryDictionaryStore::new();
        dictionary
            .upsert_terms(&[DictTerm {
                term: "Rage".to_string(),
                definition: "def".to_string(),
                category: "mechanics".to_string(),
                sources: vec![TermSource {
                    source: "s".to_string(),
                    method: "toc_parse".to_string(),
                    page: None,
                    section_id: None,
                    level: None,
                    relations: None,
                }],
            }])
            .await
            .unwrap();

        let results = vec![successful_result(3, 12, 12)];
        let report = check_chunk_dictionary_consistency(&results, &dictionary).await;
        assert_eq!(report.chunk_count, 12);
        assert_eq!(report.dictionary_count, 1);
        assert!(report.chunk_to_dict_ratio > RATIO_OVERCHUNKING);
        assert!(!report.warnings.is_empty());
    }
}
