//! Replay result records.
//!
//! A record file holds one [`ReplayRecord`]. It is rewritten after every
//! analysed row so an interrupted replay resumes where it stopped.

use rca_sentinel_core::{events::ReplayRecord, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// JSON file holding the results of one replay
#[derive(Debug, Clone)]
pub struct ResultStore {
    path: PathBuf,
}

impl ResultStore {
    /// Store at an explicit path
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Store for a dataset tag inside `output_folder`
    pub fn for_dataset(output_folder: impl AsRef<Path>, tag: &str) -> Self {
        Self::new(output_folder.as_ref().join(format!("{}.json", tag)))
    }

    /// Record file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the existing record, or an empty one
    pub async fn load_or_default(&self) -> Result<ReplayRecord> {
        if fs::metadata(&self.path).await.is_err() {
            return Ok(ReplayRecord::default());
        }
        let content = fs::read_to_string(&self.path).await?;
        let record: ReplayRecord = serde_json::from_str(&content)?;
        info!(
            path = %self.path.display(),
            rows = record.test_results.len(),
            "Resuming from stored results"
        );
        Ok(record)
    }

    /// Overwrite the record file
    pub async fn save(&self, record: &ReplayRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, serde_json::to_vec_pretty(record)?).await?;
        fs::rename(&staging, &self.path).await?;
        debug!(path = %self.path.display(), rows = record.test_results.len(), "Saved results");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rca_sentinel_core::events::CheckResult;
    use std::collections::BTreeMap;

    fn result() -> CheckResult {
        CheckResult {
            predictions: Vec::new(),
            violation_time: Some("2024-05-01 10:00:00".into()),
            analysis_start_time: Utc::now(),
            root_cause_analysis_time: Utc::now(),
            discrete_data: BTreeMap::new(),
            raw_data: BTreeMap::new(),
            incident: None,
            actual_results: [("edgex_core_data".to_string(), 1)].into_iter().collect(),
        }
    }

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::for_dataset(dir.path(), "run");
        let record = store.load_or_default().await.unwrap();
        assert!(record.test_results.is_empty());
        assert!(record.training_completion_time.is_none());
    }

    #[tokio::test]
    async fn test_saved_results_resume() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::for_dataset(dir.path().join("results"), "run");
        let record = ReplayRecord {
            training_completion_time: Some(12.5),
            test_results: vec![result(), result()],
        };
        store.save(&record).await.unwrap();

        let resumed = store.load_or_default().await.unwrap();
        assert_eq!(resumed.training_completion_time, Some(12.5));
        assert_eq!(resumed.test_results.len(), 2);
        assert!(resumed.test_results[0].is_actual_incident());
    }
}
