//! I/O operations for evaluation inputs and outputs.
//!
//! Replay records are read from the results folder written by the replay
//! command; evaluations and the markdown summary go to the output directory.

use crate::result::EvaluationResult;
use anyhow::{Context, Result};
use rca_sentinel_core::events::ReplayRecord;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default output directory for evaluation results.
pub const DEFAULT_OUTPUT_DIR: &str = "evaluation";

/// Summary markdown file name.
pub const SUMMARY_FILE: &str = "summary.md";

/// Records with fewer rows than this are reported as incomplete.
pub const EXPECTED_ROWS: usize = 48;

/// I/O handler for evaluation runs.
#[derive(Debug, Clone)]
pub struct EvaluationIO {
    /// Replay record files, one per dataset.
    results_dir: PathBuf,

    /// Evaluation outputs.
    output_dir: PathBuf,
}

impl EvaluationIO {
    /// Create a new EvaluationIO reading from `results_dir`.
    pub fn new(results_dir: impl AsRef<Path>, output_dir: impl AsRef<Path>) -> Self {
        Self {
            results_dir: results_dir.as_ref().to_path_buf(),
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    /// Get the results directory path.
    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Get the output directory path.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Get the summary file path.
    pub fn summary_path(&self) -> PathBuf {
        self.output_dir.join(SUMMARY_FILE)
    }

    /// Ensure the output directory exists.
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create output directory: {:?}", self.output_dir))?;

        debug!("Ensured evaluation output directory exists");
        Ok(())
    }

    /// Read one replay record.
    pub fn read_record(&self, path: impl AsRef<Path>) -> Result<ReplayRecord> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read record from {:?}", path))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse record from {:?}", path))
    }

    /// Read every replay record in the results directory, keyed by dataset tag.
    pub fn read_all_records(&self) -> Result<Vec<(String, ReplayRecord)>> {
        if !self.results_dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();

        for entry in fs::read_dir(&self.results_dir)
            .with_context(|| format!("Failed to list {:?}", self.results_dir))?
        {
            let path = entry?.path();

            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let Some(tag) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };

            match self.read_record(&path) {
                Ok(record) => {
                    if record.test_results.len() < EXPECTED_ROWS {
                        warn!(
                            dataset = %tag,
                            rows = record.test_results.len(),
                            "Record holds fewer rows than expected"
                        );
                    }
                    records.push((tag, record));
                }
                Err(e) => {
                    debug!("Skipping invalid record file {:?}: {:#}", path, e);
                }
            }
        }

        records.sort_by(|a, b| a.0.cmp(&b.0));
        info!(
            datasets = records.len(),
            dir = %self.results_dir.display(),
            "Loaded replay records"
        );
        Ok(records)
    }

    /// Write an evaluation result to a timestamped JSON file.
    pub fn write_evaluation(&self, result: &EvaluationResult) -> Result<PathBuf> {
        self.ensure_directories()?;

        let filename = format!(
            "evaluation_{}.json",
            result.generated_at.format("%Y%m%d_%H%M%S")
        );
        let path = self.output_dir.join(&filename);

        let json = result.to_json()?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write evaluation to {:?}", path))?;

        info!("Wrote evaluation result to {:?}", path);
        Ok(path)
    }

    /// Read an evaluation result from a JSON file.
    pub fn read_evaluation(&self, path: impl AsRef<Path>) -> Result<EvaluationResult> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read evaluation from {:?}", path))?;

        EvaluationResult::from_json(&content)
            .with_context(|| format!("Failed to parse evaluation from {:?}", path))
    }

    /// Write the summary markdown file.
    pub fn write_summary(&self, content: &str) -> Result<PathBuf> {
        self.ensure_directories()?;

        let path = self.summary_path();
        fs::write(&path, content)
            .with_context(|| format!("Failed to write summary to {:?}", path))?;

        info!("Wrote evaluation summary to {:?}", path);
        Ok(path)
    }

    /// Read the summary markdown file if it exists.
    pub fn read_summary(&self) -> Result<Option<String>> {
        let path = self.summary_path();

        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read summary from {:?}", path))?;

        Ok(Some(content))
    }
}
