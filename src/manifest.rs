//! Per-job manifest document
//!
//! The manifest at `{job_dir}/manifest.json` is the single source of truth
//! for resume decisions: which passes completed, which artifacts exist and
//! what their checksums were, and after Pass F the finalised run summary.

use crate::artifacts::{
    self, epoch_seconds, file_mtime, sha256_file, write_json_atomic,
};
use crate::error::Result;
use crate::passes::PassId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Checksummed record for one artifact file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub file: String,
    pub path: String,
    pub size: u64,
    pub mtime: f64,
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<f64>,
}

impl ArtifactRecord {
    /// Stat and checksum a file into a record
    pub fn for_file(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path)?;
        Ok(Self {
            file: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: path.to_string_lossy().into_owned(),
            size: metadata.len(),
            mtime: file_mtime(path),
            checksum: sha256_file(path),
            verified_at: None,
        })
    }
}

/// Identity of the source PDF captured at Pass A
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceInfo {
    pub file_size: u64,
    pub file_mtime: f64,
    pub source_hash: String,
}

/// The per-job manifest document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub job_id: String,
    pub source_file: String,
    pub source_path: String,
    pub environment: String,
    pub created_at: f64,

    #[serde(default)]
    pub completed_passes: Vec<String>,

    /// Always present, never populated: downstream schema validators
    /// require the key even though chunks live in the vector store.
    #[serde(default)]
    pub chunks: Vec<Value>,

    #[serde(default)]
    pub source_info: SourceInfo,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_a_results: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_b_results: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_c_results: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_d_results: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_e_results: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_f_results: Option<Value>,

    #[serde(default)]
    pub artifacts: Vec<ArtifactRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_summary: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_version: Option<String>,

    /// Free-form fields individual passes stamp (e.g. `pass`, `stage`)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Manifest {
    /// Path of the manifest inside a job directory
    pub fn path_for(job_dir: &Path) -> PathBuf {
        job_dir.join("manifest.json")
    }

    /// Start a fresh manifest for a job
    pub fn new(job_id: &str, source_path: &Path, environment: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            source_file: source_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            source_path: source_path.to_string_lossy().into_owned(),
            environment: environment.to_string(),
            created_at: epoch_seconds(),
            completed_passes: Vec::new(),
            chunks: Vec::new(),
            source_info: SourceInfo::default(),
            pass_a_results: None,
            pass_b_results: None,
            pass_c_results: None,
            pass_d_results: None,
            pass_e_results: None,
            pass_f_results: None,
            artifacts: Vec::new(),
            finalized_at: None,
            job_status: None,
            run_summary: None,
            pipeline_version: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Load the manifest from a job directory
    pub fn load(job_dir: &Path) -> Result<Self> {
        let value = artifacts::load_json(&Self::path_for(job_dir))?;
        Ok(serde_json::from_value(value)?)
    }

    /// Atomically persist the manifest into a job directory
    pub fn save(&self, job_dir: &Path) -> Result<PathBuf> {
        let path = Self::path_for(job_dir);
        write_json_atomic(self, &path)?;
        Ok(path)
    }

    pub fn is_pass_complete(&self, pass: PassId) -> bool {
        self.completed_passes.iter().any(|p| p == pass.letter())
    }

    /// Add a pass to the completed set, keeping the ordering sorted
    pub fn mark_pass_complete(&mut self, pass: PassId) {
        if !self.is_pass_complete(pass) {
            self.completed_passes.push(pass.letter().to_string());
            self.completed_passes.sort();
        }
    }

    pub fn pass_results(&self, pass: PassId) -> Option<&Value> {
        match pass {
            PassId::A => self.pass_a_results.as_ref(),
            PassId::B => self.pass_b_results.as_ref(),
            PassId::C => self.pass_c_results.as_ref(),
            PassId::D => self.pass_d_results.as_ref(),
            PassId::E => self.pass_e_results.as_ref(),
            PassId::F => self.pass_f_results.as_ref(),
        }
    }

    pub fn set_pass_results(&mut self, pass: PassId, results: Value) {
        let slot = match pass {
            PassId::A => &mut self.pass_a_results,
            PassId::B => &mut self.pass_b_results,
            PassId::C => &mut self.pass_c_results,
            PassId::D => &mut self.pass_d_results,
            PassId::E => &mut self.pass_e_results,
            PassId::F => &mut self.pass_f_results,
        };
        *slot = Some(results);
    }

    /// Stat, checksum, and record an artifact file if it exists
    pub fn record_artifact(&mut self, path: &Path) -> Result<()> {
        if path.exists() {
            let record = ArtifactRecord::for_file(path)?;
            self.artifacts.retain(|a| a.path != record.path);
            self.artifacts.push(record);
        }
        Ok(())
    }
}
