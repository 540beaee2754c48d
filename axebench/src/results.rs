//! Result file persistence
//!
//! Two kinds of JSON documents live in the results directory:
//! - `benchmark_summary.json`, rewritten after every completed iteration and
//!   on pause/stop/completion
//! - `bitaxe_benchmark_results_<address>_<YYYYmmdd-HHMMSS>.json`, written
//!   once when a run that produced results finishes
//!
//! Both share [`ResultsDocument`]; the final file adds the applied settings
//! and total duration.

use crate::tuning::search;
use axebench_common::events::{AppliedSettings, BenchmarkSummary, IterationResult};
use axebench_common::{Error, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable overriding the results directory
pub const RESULTS_DIR_ENV: &str = "AXEBENCH_RESULTS_DIR";

/// Running summary file name
pub const SUMMARY_FILENAME: &str = "benchmark_summary.json";

/// Entries in each ranked list
const TOP_N: usize = 5;

/// Result with its 1-based rank, serialized flat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub rank: usize,
    #[serde(flatten)]
    pub result: IterationResult,
}

fn ranked(results: Vec<IterationResult>) -> Vec<RankedResult> {
    results
        .into_iter()
        .enumerate()
        .map(|(i, result)| RankedResult { rank: i + 1, result })
        .collect()
}

/// Persisted view of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsDocument {
    pub bitaxe_ip: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Lifecycle label: running, paused, stopped, completed, error...
    pub state: String,
    pub iterations_completed: usize,
    pub all_results: Vec<IterationResult>,
    /// Top results by hashrate (error-free only)
    pub top_performers: Vec<RankedResult>,
    /// Top results by efficiency (error-free only)
    pub most_efficient: Vec<RankedResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_settings: Option<AppliedSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration_seconds: Option<f64>,
}

impl ResultsDocument {
    pub fn new(
        address: &str,
        started_at: DateTime<Utc>,
        state: impl Into<String>,
        results: &[IterationResult],
    ) -> Self {
        Self {
            bitaxe_ip: address.to_string(),
            started_at,
            updated_at: Utc::now(),
            state: state.into(),
            iterations_completed: results.len(),
            all_results: results.to_vec(),
            top_performers: ranked(search::top_by_hashrate(results, TOP_N)),
            most_efficient: ranked(search::top_by_efficiency(results, TOP_N)),
            applied_settings: None,
            total_duration_seconds: None,
        }
    }

    /// Final document for a finished run
    pub fn completed(address: &str, started_at: DateTime<Utc>, summary: &BenchmarkSummary) -> Self {
        let mut doc = Self::new(address, started_at, "completed", &summary.all_results);
        doc.applied_settings = summary.applied_settings;
        doc.total_duration_seconds = Some(summary.total_duration_seconds);
        doc
    }
}

/// Directory listing entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultFileInfo {
    pub filename: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Results accepted by an import
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportedResults {
    pub results: Vec<IterationResult>,
    pub bitaxe_ip: Option<String>,
    pub state: Option<String>,
    pub iterations_completed: usize,
}

/// Result files under one directory
#[derive(Debug, Clone)]
pub struct ResultsStore {
    dir: PathBuf,
}

impl ResultsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory from `AXEBENCH_RESULTS_DIR`, else `./results`
    pub fn from_env() -> Self {
        match std::env::var(RESULTS_DIR_ENV) {
            Ok(dir) if !dir.is_empty() => Self::new(dir),
            _ => Self::new("results"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join(SUMMARY_FILENAME)
    }

    /// Rewrite the running summary file
    pub fn write_summary(&self, doc: &ResultsDocument) -> Result<PathBuf> {
        let path = self.summary_path();
        self.write_json(&path, doc)?;
        debug!(path = %path.display(), state = %doc.state, "Summary updated");
        Ok(path)
    }

    /// Write the timestamped final results file
    pub fn save_final(&self, doc: &ResultsDocument) -> Result<PathBuf> {
        let path = self
            .dir
            .join(final_filename(&doc.bitaxe_ip, Local::now()));
        self.write_json(&path, doc)?;
        info!("Results saved to {}", path.display());
        Ok(path)
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(value)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// JSON files in the directory, newest first
    pub fn list(&self) -> Result<Vec<ResultFileInfo>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            files.push(ResultFileInfo {
                filename: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.len(),
                modified,
            });
        }

        files.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| b.filename.cmp(&a.filename))
        });
        Ok(files)
    }

    /// Parse one result file by bare name
    ///
    /// # Errors
    /// - `InvalidInput` for names containing a path separator or `..`
    /// - `NotFound` when no such file exists
    pub fn read(&self, filename: &str) -> Result<serde_json::Value> {
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename.contains("..")
        {
            return Err(Error::InvalidInput(format!(
                "Invalid result file name: {}",
                filename
            )));
        }

        let path = self.dir.join(filename);
        if !path.is_file() {
            return Err(Error::NotFound("Result not found".to_string()));
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Newest result file, parsed
    pub fn latest(&self) -> Result<Option<serde_json::Value>> {
        match self.list()?.first() {
            Some(info) => self.read(&info.filename).map(Some),
            None => Ok(None),
        }
    }
}

/// `bitaxe_benchmark_results_<address>_<YYYYmmdd-HHMMSS>.json`
///
/// The address segment is reduced to a plain file name component.
pub fn final_filename(address: &str, at: DateTime<Local>) -> String {
    format!(
        "bitaxe_benchmark_results_{}_{}.json",
        filename_segment(address),
        at.format("%Y%m%d-%H%M%S")
    )
}

/// Device address without scheme, with anything outside `[A-Za-z0-9._-]`
/// replaced by `_`, no `..` and no leading dot
fn filename_segment(address: &str) -> String {
    let trimmed = address.trim();
    let bare = trimmed
        .split_once("://")
        .map_or(trimmed, |(_, rest)| rest)
        .trim_end_matches('/');

    let mut segment = String::with_capacity(bare.len());
    for c in bare.chars() {
        let keep = c.is_ascii_alphanumeric()
            || matches!(c, '_' | '-')
            || (c == '.' && !segment.ends_with('.'));
        segment.push(if keep { c } else { '_' });
    }
    let segment = segment.trim_start_matches('.');

    if segment.is_empty() {
        "unknown".to_string()
    } else {
        segment.to_string()
    }
}

/// Check a previously exported document before loading it
///
/// # Errors
/// `InvalidInput` unless the document has an `all_results` array of valid
/// iteration results
pub fn validate_import(doc: &serde_json::Value) -> Result<ImportedResults> {
    let Some(raw) = doc.get("all_results").and_then(|v| v.as_array()) else {
        return Err(Error::InvalidInput(
            "File must contain 'all_results' array".to_string(),
        ));
    };

    let results = raw
        .iter()
        .map(|r| serde_json::from_value::<IterationResult>(r.clone()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::InvalidInput(format!("Invalid result data: {}", e)))?;

    Ok(ImportedResults {
        iterations_completed: results.len(),
        bitaxe_ip: doc
            .get("bitaxe_ip")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        state: doc.get("state").and_then(|v| v.as_str()).map(str::to_string),
        results,
    })
}
