//! File-backed artifact store.
//!
//! Layout under the configured directories:
//! - `<model_dir>/<tag>.model.json`: complete [`TrainedModel`]
//! - `<model_dir>/<tag>.structure.json`: learned structure with fingerprint
//! - `<graph_dir>/<tag>.dot`: pruned graph rendering

use rca_sentinel_core::{config::StorageConfig, Result};
use rca_sentinel_detection::{
    structure::StructureModel,
    training::{StructureCache, TrainedModel},
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Serialize, Deserialize)]
struct StructureArtifact {
    fingerprint: String,
    structure: StructureModel,
}

/// Stores models, structures and graphs on the local filesystem
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    model_dir: PathBuf,
    graph_dir: PathBuf,
}

impl ArtifactStore {
    /// Create a store over the configured directories
    pub fn new(config: &StorageConfig) -> Self {
        Self::with_dirs(&config.model_dir, &config.graph_dir)
    }

    /// Create a store over explicit directories
    pub fn with_dirs(model_dir: impl AsRef<Path>, graph_dir: impl AsRef<Path>) -> Self {
        Self {
            model_dir: model_dir.as_ref().to_path_buf(),
            graph_dir: graph_dir.as_ref().to_path_buf(),
        }
    }

    /// Path of a trained model
    pub fn model_path(&self, tag: &str) -> PathBuf {
        self.model_dir.join(format!("{}.model.json", tag))
    }

    /// Path of a learned structure
    pub fn structure_path(&self, tag: &str) -> PathBuf {
        self.model_dir.join(format!("{}.structure.json", tag))
    }

    /// Path of a graph rendering
    pub fn graph_path(&self, tag: &str) -> PathBuf {
        self.graph_dir.join(format!("{}.dot", tag))
    }

    fn write(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let staging = path.with_extension("tmp");
        fs::write(&staging, content)?;
        fs::rename(&staging, path)?;
        Ok(())
    }

    /// Persist a trained model under its dataset tag
    pub fn save_model(&self, model: &TrainedModel) -> Result<PathBuf> {
        let path = self.model_path(&model.dataset_tag);
        Self::write(&path, &serde_json::to_string(model)?)?;
        info!(path = %path.display(), "Saved trained model");
        Ok(path)
    }

    /// Load the model stored for `tag`, if any
    pub fn load_model(&self, tag: &str) -> Result<Option<TrainedModel>> {
        let path = self.model_path(tag);
        if !path.exists() {
            return Ok(None);
        }
        let model: TrainedModel = serde_json::from_str(&fs::read_to_string(&path)?)?;
        info!(path = %path.display(), trained_at = %model.trained_at, "Loaded trained model");
        Ok(Some(model))
    }
}

impl StructureCache for ArtifactStore {
    fn load_structure(&self, tag: &str, fingerprint: &str) -> Result<Option<StructureModel>> {
        let path = self.structure_path(tag);
        if !path.exists() {
            return Ok(None);
        }
        let artifact: StructureArtifact = serde_json::from_str(&fs::read_to_string(&path)?)?;
        if artifact.fingerprint != fingerprint {
            info!(
                tag = %tag,
                stored = %artifact.fingerprint,
                "Stored structure was learned from different data, relearning"
            );
            return Ok(None);
        }
        artifact.structure.validate()?;
        debug!(path = %path.display(), "Loaded stored structure");
        Ok(Some(artifact.structure))
    }

    fn store_structure(&self, tag: &str, fingerprint: &str, structure: &StructureModel) -> Result<()> {
        let artifact = StructureArtifact {
            fingerprint: fingerprint.to_string(),
            structure: structure.clone(),
        };
        let path = self.structure_path(tag);
        Self::write(&path, &serde_json::to_string_pretty(&artifact)?)?;
        info!(path = %path.display(), edges = structure.edge_count(), "Stored learned structure");
        Ok(())
    }

    fn store_graph(&self, tag: &str, dot: &str) -> Result<()> {
        let path = self.graph_path(tag);
        Self::write(&path, dot)?;
        debug!(path = %path.display(), "Wrote graph rendering");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rca_sentinel_core::config::Config;
    use rca_sentinel_core::frame::MetricFrame;
    use rca_sentinel_detection::models::FaultPredictor;
    use rca_sentinel_detection::training::TrainingPipeline;
    use std::collections::{BTreeMap, BTreeSet};

    fn structure() -> StructureModel {
        let roots: BTreeSet<String> = ["edgex_core_data".to_string()].into_iter().collect();
        let mut model = StructureModel::new(["edgex_core_data", "latency_edgex_ui_edgex_core_data"], roots);
        model
            .add_edge("edgex_core_data", "latency_edgex_ui_edgex_core_data", 0.8)
            .unwrap();
        model
    }

    #[test]
    fn test_structure_cache_checks_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::with_dirs(dir.path().join("models"), dir.path().join("graphs"));

        assert!(store.load_structure("run", "abc").unwrap().is_none());
        store.store_structure("run", "abc", &structure()).unwrap();

        let hit = store.load_structure("run", "abc").unwrap().unwrap();
        assert_eq!(
            hit.edge_weight("edgex_core_data", "latency_edgex_ui_edgex_core_data"),
            Some(0.8)
        );
        assert!(store.load_structure("run", "other").unwrap().is_none());
    }

    #[test]
    fn test_graph_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::with_dirs(dir.path(), dir.path().join("graphs"));
        store.store_graph("run", "digraph structure {}\n").unwrap();
        let content = fs::read_to_string(store.graph_path("run")).unwrap();
        assert!(content.starts_with("digraph"));
    }

    #[test]
    fn test_trained_model_roundtrip() {
        let n = 60;
        let faults = [25usize, 40, 55];
        let frame = MetricFrame::new(vec![
            (
                "edgex_core_data".into(),
                (0..n).map(|i| Some(if faults.contains(&i) { 1.0 } else { 0.0 })).collect(),
            ),
            (
                "latency_edgex_ui_edgex_core_data".into(),
                (0..n)
                    .map(|i| Some(if faults.contains(&i) { 0.9 } else { 0.1 + (i % 3) as f64 * 0.001 }))
                    .collect(),
            ),
        ])
        .unwrap();
        let mut config = Config::default();
        config.training.services_for_fault_injection = vec!["edgex-core-data".into()];

        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::with_dirs(dir.path(), dir.path());
        let trained = TrainingPipeline::new(&config, &store).train(frame, "run").unwrap();
        store.save_model(&trained).unwrap();
        assert!(store.structure_path("run").exists());
        assert!(store.graph_path("run").exists());

        let loaded = store.load_model("run").unwrap().unwrap();
        assert_eq!(loaded.fingerprint, trained.fingerprint);
        let evidence: BTreeMap<String, u32> =
            [("latency_edgex_ui_edgex_core_data".to_string(), 1)].into_iter().collect();
        let before = trained.model.predict_fault_distribution(&evidence).unwrap();
        let after = loaded.model.predict_fault_distribution(&evidence).unwrap();
        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(&after) {
            assert_eq!(a.service_name, b.service_name);
            assert!((a.probability - b.probability).abs() < 1e-9);
        }
        assert!(store.load_model("missing").unwrap().is_none());
    }
}
