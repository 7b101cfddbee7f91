//! Atomic artifact persistence and integrity checking
//!
//! Every JSON artifact is written through a sibling temp file with a
//! unique suffix, fsynced, then renamed over the target. Loading goes
//! through validation plus retry with exponential backoff to ride out
//! concurrent writers.

use crate::error::{ArtifactError, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Current unix time as fractional seconds, the timestamp format artifacts use
pub fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Current unix time in whole milliseconds
pub fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn temp_path_for(target: &Path) -> PathBuf {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or(0);
    let mut name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    name.push_str(&format!(".tmp.{}.{}", std::process::id(), micros));
    target.with_file_name(name)
}

fn write_atomic_bytes(bytes: &[u8], target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let temp_path = temp_path_for(target);
    let result = (|| -> Result<()> {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, target)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    } else {
        debug!("atomically wrote {} ({} bytes)", target.display(), bytes.len());
    }
    result
}

/// Write a value as pretty-printed JSON via temp file + fsync + rename
pub fn write_json_atomic<T: Serialize>(value: &T, target: &Path) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic_bytes(&bytes, target)
}

/// Write rows as JSON lines via temp file + fsync + rename
pub fn write_jsonl_atomic<T: Serialize>(rows: &[T], target: &Path) -> Result<()> {
    let mut lines = Vec::with_capacity(rows.len());
    for row in rows {
        lines.push(serde_json::to_string(row)?);
    }
    write_atomic_bytes(lines.join("\n").as_bytes(), target)
}

/// Validate that a JSON artifact exists, is plausibly sized, parses, and
/// carries the required top-level keys
pub fn validate_json_artifact(
    path: &Path,
    required_keys: Option<&[&str]>,
) -> std::result::Result<serde_json::Value, ArtifactError> {
    if !path.exists() {
        return Err(ArtifactError::Missing(path.to_path_buf()));
    }

    let size = fs::metadata(path)
        .map(|m| m.len())
        .map_err(|_| ArtifactError::Missing(path.to_path_buf()))?;
    if size == 0 {
        return Err(ArtifactError::Empty(path.to_path_buf()));
    }
    if size < 10 {
        return Err(ArtifactError::Truncated {
            path: path.to_path_buf(),
            size,
        });
    }

    let content = fs::read_to_string(path).map_err(|e| ArtifactError::InvalidJson {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| ArtifactError::InvalidJson {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    if let Some(required) = required_keys {
        let missing: Vec<String> = match value.as_object() {
            Some(map) => required
                .iter()
                .filter(|k| !map.contains_key(**k))
                .map(|k| k.to_string())
                .collect(),
            None => required.iter().map(|k| k.to_string()).collect(),
        };
        if !missing.is_empty() {
            return Err(ArtifactError::MissingKeys {
                path: path.to_path_buf(),
                keys: missing,
            });
        }
    }

    Ok(value)
}

/// Load a JSON artifact once without retry
pub fn load_json(path: &Path) -> Result<serde_json::Value> {
    Ok(validate_json_artifact(path, None)?)
}

/// Load a JSON artifact with validation and exponential-backoff retry
pub async fn load_json_with_retry(
    path: &Path,
    required_keys: Option<&[&str]>,
) -> Result<serde_json::Value> {
    const MAX_RETRIES: u32 = 3;
    const BASE_DELAY_MS: u64 = 250;

    let mut last_error = String::new();
    for attempt in 0..=MAX_RETRIES {
        match validate_json_artifact(path, required_keys) {
            Ok(value) => {
                debug!(
                    "loaded JSON from {} on attempt {}",
                    path.display(),
                    attempt + 1
                );
                return Ok(value);
            }
            Err(e) => {
                last_error = e.to_string();
                if attempt < MAX_RETRIES {
                    let delay = BASE_DELAY_MS * (1 << attempt);
                    warn!(
                        "JSON load failed on attempt {}/{}: {}. Retrying in {}ms",
                        attempt + 1,
                        MAX_RETRIES + 1,
                        last_error,
                        delay
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        }
    }

    Err(ArtifactError::RetriesExhausted {
        path: path.to_path_buf(),
        attempts: MAX_RETRIES + 1,
        message: last_error,
    }
    .into())
}

/// SHA-256 digest of a file as lowercase hex; empty string on read failure
pub fn sha256_file(path: &Path) -> String {
    let mut hasher = Sha256::new();
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            warn!("failed to compute hash for {}: {}", path.display(), e);
            return String::new();
        }
    };

    let mut buffer = [0u8; 4096];
    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) => {
                warn!("failed to compute hash for {}: {}", path.display(), e);
                return String::new();
            }
        }
    }
    format!("{:x}", hasher.finalize())
}

/// SHA-256 digest of a byte slice as lowercase hex
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// File modification time as fractional unix seconds
pub fn file_mtime(path: &Path) -> f64 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
