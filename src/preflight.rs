//! External-tool preflight checks
//!
//! PDF processing depends on the Poppler utilities (`pdfinfo`,
//! `pdftoppm`) and on Tesseract for OCR. Missing or non-functional tools
//! fail fast before any source is touched.

use crate::error::{PreflightError, Result};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info, warn};

const TOOL_TIMEOUT: Duration = Duration::from_secs(5);

/// Validates availability of external PDF and OCR tooling
#[derive(Debug, Default)]
pub struct PreflightValidator {
    pub tools_status: BTreeMap<String, String>,
}

impl PreflightValidator {
    pub fn new() -> Self {
        Self::default()
    }

    async fn run_tool(&mut self, tool: &'static str, args: &[&str]) -> Result<()> {
        let spawned = Command::new(tool)
            .args(args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .output();

        let output = match tokio::time::timeout(TOOL_TIMEOUT, spawned).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                self.tools_status
                    .insert(tool.to_string(), "Not found in PATH".to_string());
                return Err(PreflightError::ToolMissing { tool }.into());
            }
            Ok(Err(e)) => {
                self.tools_status
                    .insert(tool.to_string(), format!("Not functional: {}", e));
                return Err(PreflightError::ToolNotFunctional {
                    tool,
                    detail: e.to_string(),
                }
                .into());
            }
            Err(_) => {
                self.tools_status
                    .insert(tool.to_string(), "Timed out".to_string());
                return Err(PreflightError::ToolNotFunctional {
                    tool,
                    detail: format!("timed out after {:?}", TOOL_TIMEOUT),
                }
                .into());
            }
        };

        // Version banners routinely land on stderr (pdfinfo -v does)
        let banner = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).into_owned()
        } else {
            String::from_utf8_lossy(&output.stdout).into_owned()
        };
        let version_line = banner.lines().next().unwrap_or("").trim().to_string();
        self.tools_status
            .insert(tool.to_string(), format!("Available: {}", version_line));
        info!("{}: {}", tool, version_line);
        Ok(())
    }

    /// Validate Poppler utilities
    pub async fn validate_poppler_tools(&mut self) -> Result<()> {
        self.run_tool("pdfinfo", &["-v"]).await?;
        self.run_tool("pdftoppm", &["-v"]).await?;
        Ok(())
    }

    /// Validate Tesseract OCR
    pub async fn validate_tesseract(&mut self) -> Result<()> {
        self.run_tool("tesseract", &["--version"]).await
    }

    fn log_failure_guidance(&self) {
        error!("Preflight dependency check failed. Tool status:");
        for (tool, status) in &self.tools_status {
            error!("  {}: {}", tool, status);
        }
        error!("Remediation:");
        error!("  - Install Poppler utilities (pdfinfo, pdftoppm)");
        error!("  - Install Tesseract OCR");
        error!("  - Verify with: loreforge-ingest --verify-deps");
    }
}

/// Run all preflight checks, failing on the first missing dependency
pub async fn run_preflight_checks() -> Result<()> {
    let mut validator = PreflightValidator::new();

    if let Err(e) = validator.validate_poppler_tools().await {
        validator.log_failure_guidance();
        return Err(e);
    }
    if let Err(e) = validator.validate_tesseract().await {
        validator.log_failure_guidance();
        return Err(e);
    }

    info!("preflight checks passed: Poppler and Tesseract available");
    Ok(())
}

/// Preflight with an explicit skip, logged loudly
pub async fn run_preflight_checks_with_skip(skip: bool) -> Result<()> {
    if skip {
        warn!("skipping preflight dependency checks (--skip-preflight enabled)");
        warn!("this may result in silent failures during PDF processing");
        return Ok(());
    }
    run_preflight_checks().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_tool_reports_status() {
        let mut validator = PreflightValidator::new();
        let result = validator
            .run_tool("definitely-not-a-real-tool-xyz", &["--version"])
            .await;
        assert!(result.is_err());
        assert_eq!(
            validator.tools_status["definitely-not-a-real-tool-xyz"],
            "Not found in PATH"
        );
    }

    #[tokio::test]
    async fn test_skip_flag_bypasses_checks() {
        assert!(run_preflight_checks_with_skip(true).await.is_ok());
    }
}
