//! Guardrail policy for pipeline passes
//!
//! Passes C and D carry critical output thresholds that abort a source
//! when violated; passes A and E are warning-only. Thresholds are
//! strictly-greater comparisons and tighten in prod. Skipped passes
//! (resume) and unknown passes always pass.

use crate::config::EnvName;
use crate::passes::PassId;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

/// Result of a guardrail validation check
#[derive(Debug, Clone)]
pub struct GuardrailResult {
    pub passed: bool,
    pub pass_name: String,
    pub threshold_name: String,
    pub actual_value: i64,
    pub threshold_value: i64,
    pub failure_reason: Option<String>,
}

impl GuardrailResult {
    fn passing(pass: PassId, threshold_name: &str) -> Self {
        Self {
            passed: true,
            pass_name: pass.letter().to_string(),
            threshold_name: threshold_name.to_string(),
            actual_value: 0,
            threshold_value: 0,
            failure_reason: None,
        }
    }

    /// Descriptive message for a failed check
    pub fn failure_message(&self) -> String {
        if self.passed {
            return String::new();
        }
        format!(
            "Pass {} failed guardrail: {} (actual: {}, required: >{})",
            self.pass_name, self.threshold_name, self.actual_value, self.threshold_value
        )
    }
}

/// Per-environment output thresholds
pub struct GuardrailPolicy {
    env: EnvName,
    pass_c_threshold: i64,
    pass_d_threshold: i64,
}

impl GuardrailPolicy {
    pub fn new(env: EnvName) -> Self {
        // test behaves like dev; prod tightens to "more than one"
        let (pass_c_threshold, pass_d_threshold) = match env {
            EnvName::Dev | EnvName::Test => (0, 0),
            EnvName::Prod => (1, 1),
        };
        Self {
            env,
            pass_c_threshold,
            pass_d_threshold,
        }
    }

    pub fn env(&self) -> EnvName {
        self.env
    }

    fn is_critical(&self, pass: PassId) -> bool {
        matches!(pass, PassId::C | PassId::D)
    }

    /// Validate a pass result (serialised pass-result object) against the
    /// configured thresholds
    pub fn validate_pass_output(&self, pass: PassId, result: &Value) -> GuardrailResult {
        if result
            .get("skipped")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            debug!("Pass {} was skipped (resume mode)", pass);
            return GuardrailResult::passing(pass, "skipped");
        }

        let (threshold_name, threshold) = match pass {
            PassId::C => ("chunks_extracted", self.pass_c_threshold),
            PassId::D => ("chunks_vectorized", self.pass_d_threshold),
            PassId::A => {
                // Warning-only: empty ToCs are legitimate for some documents
                let toc_entries = metric(result, "toc_entries");
                if toc_entries == 0 {
                    warn!("Pass A produced no ToC entries");
                }
                return GuardrailResult::passing(pass, "warning");
            }
            PassId::E => {
                let graph_nodes = metric(result, "graph_nodes");
                if graph_nodes == 0 {
                    warn!("Pass E produced an empty graph");
                }
                return GuardrailResult::passing(pass, "warning");
            }
            _ => return GuardrailResult::passing(pass, "default"),
        };

        let actual = metric(result, threshold_name);
        let passed = actual > threshold;
        let failure_reason = if passed {
            None
        } else {
            error!(
                "CRITICAL: Pass {} produced {} {} (required: >{})",
                pass, actual, threshold_name, threshold
            );
            Some(format!("Zero output at Pass {}", pass))
        };

        GuardrailResult {
            passed,
            pass_name: pass.letter().to_string(),
            threshold_name: threshold_name.to_string(),
            actual_value: actual,
            threshold_value: threshold,
            failure_reason,
        }
    }

    /// True when the source must be aborted after this pass
    pub fn should_abort_source(&self, pass: PassId, result: &Value) -> bool {
        let validation = self.validate_pass_output(pass, result);
        if !validation.passed && self.is_critical(pass) {
            error!(
                "[FATAL] Pass {} guardrail failure — aborting source processing",
                pass
            );
            error!(
                "[FATAL] Reason: {}",
                validation.failure_reason.as_deref().unwrap_or("unknown")
            );
            return true;
        }
        false
    }

    /// Detailed failure summary for job reports
    pub fn failure_summary(&self, pass: PassId, result: &Value) -> Value {
        let validation = self.validate_pass_output(pass, result);
        json!({
            "failed": !validation.passed,
            "failed_pass": if validation.passed { Value::Null } else { json!(pass.letter()) },
            "failure_reason": validation.failure_reason,
            "threshold_name": validation.threshold_name,
            "actual_value": validation.actual_value,
            "threshold_value": validation.threshold_value,
        })
    }
}

/// Unparseable results count as zero output
fn metric(result: &Value, key: &str) -> i64 {
    result.get(key).and_then(|v| v.as_i64()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_thresholds_strictly_greater() {
        let policy = GuardrailPolicy::new(EnvName::Dev);

        // Zero chunks fails even in dev: the comparison is strict
        let zero = json!({"chunks_extracted": 0});
        assert!(!policy.validate_pass_output(PassId::C, &zero).passed);
        assert!(policy.should_abort_source(PassId::C, &zero));

        let one = json!({"chunks_extracted": 1});
        assert!(policy.validate_pass_output(PassId::C, &one).passed);
        assert!(!policy.should_abort_source(PassId::C, &one));
    }

    #[test]
    fn test_prod_thresholds() {
        let policy = GuardrailPolicy::new(EnvName::Prod);

        let one = json!({"chunks_vectorized": 1});
        assert!(!policy.validate_pass_output(PassId::D, &one).passed);

        let two = json!({"chunks_vectorized": 2});
        assert!(policy.validate_pass_output(PassId::D, &two).passed);
    }

    #[test]
    fn test_test_env_matches_dev() {
        let dev = GuardrailPolicy::new(EnvName::Dev);
        let test = GuardrailPolicy::new(EnvName::Test);
        let one = json!({"chunks_extracted": 1});
        assert_eq!(
            dev.validate_pass_output(PassId::C, &one).passed,
            test.validate_pass_output(PassId::C, &one).passed
        );
    }

    #[test]
    fn test_skipped_passes_always_pass() {
        let policy = GuardrailPolicy::new(EnvName::Prod);
        let skipped = json!({"skipped": true});
        assert!(policy.validate_pass_output(PassId::C, &skipped).passed);
        assert!(!policy.should_abort_source(PassId::D, &skipped));
    }

    #[test]
    fn test_warning_passes_never_abort() {
        let policy = GuardrailPolicy::new(EnvName::Prod);
        let empty = json!({"toc_entries": 0});
        assert!(policy.validate_pass_output(PassId::A, &empty).passed);
        assert!(!policy.should_abort_source(PassId::A, &empty));

        let no_graph = json!({"graph_nodes": 0});
        assert!(!policy.should_abort_source(PassId::E, &no_graph));
    }

    #[test]
    fn test_unparseable_results_count_as_zero() {
        let policy = GuardrailPolicy::new(EnvName::Dev);
        let junk = json!({"unrelated": "fields"});
        let result = policy.validate_pass_output(PassId::C, &junk);
        assert!(!result.passed);
        assert_eq!(result.actual_value, 0);
    }

    #[test]
    fn test_failure_summary() {
        let policy = GuardrailPolicy::new(EnvName::Dev);
        let summary = policy.failure_summary(PassId::C, &json!({"chunks_extracted": 0}));
        assert_eq!(summary["failed"], json!(true));
        assert_eq!(summary["failed_pass"], json!("C"));
        assert_eq!(summary["failure_reason"], json!("Zero output at Pass C"));
        assert_eq!(summary["threshold_name"], json!("chunks_extracted"));
    }

    #[test]
    fn test_failure_message_format() {
        let policy = GuardrailPolicy::new(EnvName::Prod);
        let result = policy.validate_pass_output(PassId::C, &json!({"chunks_extracted": 1}));
        assert_eq!(
            result.failure_message(),
            "Pass C failed guardrail: chunks_extracted (actual: 1, required: >1)"
        );
    }
}
