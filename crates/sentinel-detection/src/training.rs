//! End-to-end training: curation, discretization and model construction.

use crate::curator::{ColumnCurator, CuratedColumns};
use crate::discretizer::{DiscretizerSet, MetricDiscretizer};
use crate::models::{CausalModel, FaultModel, ForestModel, LabeledRows, SvmModel};
use crate::structure::{StructureLearner, StructureModel};
use chrono::{DateTime, Utc};
use rca_sentinel_core::{
    config::{Config, DataConfig, ModelType},
    frame::{DiscreteFrame, MetricFrame},
    types::ColumnClassifier,
    Error, Result,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Reuse of learned structures across runs, keyed by dataset tag
pub trait StructureCache {
    /// Structure stored for `tag`, if its fingerprint matches
    fn load_structure(&self, tag: &str, fingerprint: &str) -> Result<Option<StructureModel>>;

    /// Store a freshly learned structure
    fn store_structure(&self, tag: &str, fingerprint: &str, structure: &StructureModel) -> Result<()>;

    /// Store the DOT rendering of the pruned graph
    fn store_graph(&self, _tag: &str, _dot: &str) -> Result<()> {
        Ok(())
    }
}

/// Cache that never hits
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStructureCache;

impl StructureCache for NoopStructureCache {
    fn load_structure(&self, _tag: &str, _fingerprint: &str) -> Result<Option<StructureModel>> {
        Ok(None)
    }

    fn store_structure(&self, _tag: &str, _fingerprint: &str, _structure: &StructureModel) -> Result<()> {
        Ok(())
    }
}

/// Everything the online loop needs from training
#[derive(Debug, Serialize, Deserialize)]
pub struct TrainedModel {
    /// Tag of the training file set
    pub dataset_tag: String,
    /// SHA-256 of the discretized training matrix
    pub fingerprint: String,
    /// Frozen per-column discretizers
    pub discretizers: DiscretizerSet,
    /// Columns removed during training
    pub curated: CuratedColumns,
    /// Ground-truth means used to fill gaps
    pub baseline_means: BTreeMap<String, f64>,
    /// Discretized training matrix
    pub training_data: DiscreteFrame,
    /// Fault-injection services
    pub services_for_fault_injection: Vec<String>,
    /// Prefix shared by service-status columns
    pub service_prefix: String,
    /// Trained variant
    pub model: FaultModel,
    /// Completion time
    pub trained_at: DateTime<Utc>,
    /// Wall-clock training duration
    pub training_seconds: f64,
}

impl TrainedModel {
    /// Classifier the model was trained with
    pub fn classifier(&self) -> ColumnClassifier {
        ColumnClassifier::new(&self.services_for_fault_injection, &self.service_prefix)
    }

    /// Whether training saw `column`, either discretised or curated out
    pub fn covers_metric(&self, column: &str) -> bool {
        self.discretizers.contains(column) || self.curated.contains(column)
    }

    /// Metric columns excluded from the causal graph
    pub fn independent_nodes(&self) -> &[String] {
        self.model.independent_nodes()
    }
}

/// Tag for a training file set: paths joined with `_`, anything outside
/// `[A-Za-z0-9_-]` replaced by `_`
pub fn dataset_tag<P: AsRef<Path>>(paths: &[P]) -> String {
    paths
        .iter()
        .map(|p| p.as_ref().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Hex SHA-256 over column names and states
pub fn fingerprint(data: &DiscreteFrame) -> String {
    let mut hasher = Sha256::new();
    for (column, states) in data.iter_columns() {
        hasher.update(column.as_bytes());
        hasher.update([0u8]);
        for state in states {
            hasher.update(state.to_le_bytes());
        }
    }
    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut hex, byte| {
            hex.push_str(&format!("{:02x}", byte));
            hex
        })
}

/// Split a loaded frame into training rows and test rows
pub fn split_dataset(frame: &MetricFrame, data: &DataConfig) -> (MetricFrame, MetricFrame) {
    let training = frame.head(data.number_of_training_data);
    let mut test = if data.test_false_positive {
        frame.head(data.number_of_test_false_positive_data)
    } else {
        frame.head(0)
    };
    test.append(frame.tail(data.number_of_test_data));
    (training, test)
}

/// Trains a [`TrainedModel`] from a raw metric frame
pub struct TrainingPipeline<'a> {
    config: &'a Config,
    cache: &'a dyn StructureCache,
}

impl fmt::Debug for TrainingPipeline<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrainingPipeline")
            .field("model_type", &self.config.training.model_type)
            .finish_non_exhaustive()
    }
}

impl<'a> TrainingPipeline<'a> {
    /// Create a pipeline
    pub fn new(config: &'a Config, cache: &'a dyn StructureCache) -> Self {
        Self { config, cache }
    }

    /// Run every training stage on `raw`
    pub fn train(&self, mut raw: MetricFrame, dataset_tag: &str) -> Result<TrainedModel> {
        let started = Instant::now();
        let training = &self.config.training;
        let curator = ColumnCurator::new(training, &self.config.discretization);
        let classifier = curator.classifier().clone();
        let mut curated = CuratedColumns::new();

        info!(
            dataset = %dataset_tag,
            rows = raw.n_rows(),
            columns = raw.n_cols(),
            model_type = training.model_type.as_str(),
            "Starting training"
        );

        curator.filter_data(&mut raw, &mut curated);
        raw.take_timestamps();
        let baseline_means = curator.fill_gaps(&mut raw, &mut curated);
        curator.remove_single_value_columns(&mut raw, &mut curated);
        if raw.n_rows() == 0 || raw.n_cols() == 0 {
            return Err(Error::validation("no training data left after curation"));
        }

        let discretizer = MetricDiscretizer::new(self.config.discretization.clone());
        let (mut discretizers, mut metric_states) =
            DiscretizerSet::fit_frame(&discretizer, &raw, &classifier, &baseline_means, &mut curated)?;
        curator.remove_small_effect(&mut metric_states, &mut curated);
        curator.remove_unstable(&mut metric_states, &mut curated);

        let mut training_data = DiscreteFrame::with_rows(raw.n_rows());
        for (column, values) in raw.iter_columns() {
            if classifier.is_service_status(column) {
                let codes = values
                    .iter()
                    .map(|v| v.unwrap_or(0.0).round().max(0.0) as u32)
                    .collect();
                training_data.insert_column(column, codes)?;
            } else if let Some(states) = metric_states.column(column) {
                training_data.insert_column(column, states.to_vec())?;
            }
        }
        curator.remove_single_state_columns(&mut training_data, &mut curated);

        let dropped: Vec<String> = discretizers
            .columns()
            .filter(|c| !training_data.contains(c))
            .map(str::to_string)
            .collect();
        for column in &dropped {
            discretizers.remove(column);
        }

        let status_columns: BTreeSet<String> = training_data
            .columns()
            .iter()
            .filter(|c| classifier.is_service_status(c))
            .cloned()
            .collect();
        if status_columns.is_empty() {
            warn!("No service-status column survived curation; predictions will be empty");
        }
        info!(
            columns = training_data.n_cols(),
            curated = curated.len(),
            status_columns = status_columns.len(),
            "Training matrix ready"
        );

        let fingerprint = fingerprint(&training_data);
        let model = match training.model_type {
            ModelType::Causal => {
                let structure = match self.cache.load_structure(dataset_tag, &fingerprint)? {
                    Some(structure) => {
                        info!(dataset = %dataset_tag, "Reusing stored causal structure");
                        structure
                    }
                    None => {
                        let structure = StructureLearner::new(training.max_iter, training.max_parents)
                            .learn(&training_data, &status_columns)?;
                        self.cache.store_structure(dataset_tag, &fingerprint, &structure)?;
                        structure
                    }
                };
                let causal = CausalModel::build(
                    structure,
                    &training_data,
                    training.min_number_of_edges_per_node,
                    training.weak_link_threshold,
                )?;
                self.cache
                    .store_graph(dataset_tag, &causal.structure().to_dot(&classifier))?;
                FaultModel::Causal(causal)
            }
            ModelType::RandomForest => {
                let rows = LabeledRows::from_frame(&training_data, &classifier);
                FaultModel::Forest(ForestModel::fit(
                    &rows,
                    training.number_of_trees,
                    training.random_state,
                )?)
            }
            ModelType::Svm => {
                let rows = LabeledRows::from_frame(&training_data, &classifier);
                FaultModel::Svm(SvmModel::fit(&rows, training.random_state)?)
            }
        };

        let training_seconds = started.elapsed().as_secs_f64();
        info!(
            dataset = %dataset_tag,
            seconds = training_seconds,
            independent_nodes = model.independent_nodes().len(),
            "Training completed"
        );
        debug!(curated = ?curated.iter().collect::<Vec<_>>(), "Curated columns");

        Ok(TrainedModel {
            dataset_tag: dataset_tag.to_string(),
            fingerprint,
            discretizers,
            curated,
            baseline_means,
            training_data,
            services_for_fault_injection: training.normalized_fault_services(),
            service_prefix: training.service_prefix.clone(),
            model,
            trained_at: Utc::now(),
            training_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_dataset_tag_sanitizes_paths() {
        let tag = dataset_tag(&["data/run 1.csv", "data/run-2.csv"]);
        assert_eq!(tag, "data_run_1_csv_data_run-2_csv");
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = DiscreteFrame::new(vec![("cpu_a".into(), vec![0, 1])]).unwrap();
        let b = DiscreteFrame::new(vec![("cpu_a".into(), vec![1, 0])]).unwrap();
        assert_eq!(fingerprint(&a).len(), 64);
        assert_eq!(fingerprint(&a), fingerprint(&a.clone()));
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_split_prefixes_false_positive_rows() {
        let frame = MetricFrame::new(vec![(
            "cpu_a".into(),
            (0..10).map(|i| Some(i as f64)).collect(),
        )])
        .unwrap();
        let data = DataConfig {
            number_of_training_data: 6,
            number_of_test_data: 3,
            test_false_positive: true,
            number_of_test_false_positive_data: 2,
            ..DataConfig::default()
        };
        let (training, test) = split_dataset(&frame, &data);
        assert_eq!(training.n_rows(), 6);
        let values: Vec<Option<f64>> = test.column("cpu_a").unwrap().to_vec();
        assert_eq!(values, vec![Some(0.0), Some(1.0), Some(7.0), Some(8.0), Some(9.0)]);
    }

    #[derive(Default)]
    struct MemoryCache {
        stored: RefCell<Vec<(String, String)>>,
        graphs: RefCell<usize>,
    }

    impl StructureCache for MemoryCache {
        fn load_structure(&self, _tag: &str, _fingerprint: &str) -> Result<Option<StructureModel>> {
            Ok(None)
        }

        fn store_structure(&self, tag: &str, fingerprint: &str, _structure: &StructureModel) -> Result<()> {
            self.stored
                .borrow_mut()
                .push((tag.to_string(), fingerprint.to_string()));
            Ok(())
        }

        fn store_graph(&self, _tag: &str, dot: &str) -> Result<()> {
            assert!(dot.starts_with("digraph"));
            *self.graphs.borrow_mut() += 1;
            Ok(())
        }
    }

    fn raw_training() -> MetricFrame {
        let n = 60;
        let faults: Vec<usize> = vec![20, 35, 50];
        let status = (0..n)
            .map(|i| Some(if faults.contains(&i) { 1.0 } else { 0.0 }))
            .collect();
        let latency = (0..n)
            .map(|i| {
                Some(if faults.contains(&i) {
                    0.8 + (i % 3) as f64 * 0.01
                } else {
                    0.1 + (i % 5) as f64 * 0.002
                })
            })
            .collect();
        let constant = (0..n).map(|_| Some(5.0)).collect();
        MetricFrame::new(vec![
            ("edgex_core_data".into(), status),
            ("latency_edgex_ui_edgex_core_data".into(), latency),
            ("memory_edgex_redis".into(), constant),
        ])
        .unwrap()
    }

    #[test]
    fn test_causal_training_uses_cache_and_curates() {
        let mut config = Config::default();
        config.training.services_for_fault_injection = vec!["edgex-core-data".into()];
        config.training.number_of_initial_steps = 15;
        let cache = MemoryCache::default();

        let trained = TrainingPipeline::new(&config, &cache)
            .train(raw_training(), "synthetic")
            .unwrap();

        assert_eq!(cache.stored.borrow().len(), 1);
        assert_eq!(cache.stored.borrow()[0].1, trained.fingerprint);
        assert_eq!(*cache.graphs.borrow(), 1);
        assert!(trained.curated.contains("memory_edgex_redis"));
        assert!(trained.discretizers.contains("latency_edgex_ui_edgex_core_data"));
        assert!(trained.training_data.contains("edgex_core_data"));
        match &trained.model {
            FaultModel::Causal(model) => {
                assert!(model
                    .structure()
                    .children("edgex_core_data")
                    .contains(&"latency_edgex_ui_edgex_core_data"));
            }
            other => panic!("unexpected model {:?}", other.model_type()),
        }
    }

    #[test]
    fn test_forest_training() {
        let mut config = Config::default();
        config.training.services_for_fault_injection = vec!["edgex-core-data".into()];
        config.training.number_of_initial_steps = 15;
        config.training.model_type = ModelType::RandomForest;
        config.training.number_of_trees = 5;

        let trained = TrainingPipeline::new(&config, &NoopStructureCache)
            .train(raw_training(), "synthetic")
            .unwrap();
        assert!(matches!(trained.model, FaultModel::Forest(_)));
        assert!(trained.independent_nodes().is_empty());
    }
}
