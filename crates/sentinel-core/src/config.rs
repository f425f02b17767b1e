//! Configuration for training, discretization, storage and serving.
//!
//! Loaded from YAML (`config/sentinel.yaml` by default). Every section has a
//! `Default` so partial files are accepted; `validate` runs after loading.

use crate::types::{normalize_column_name, ColumnClassifier, MetricCategory};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Curation and structure-learning options
    pub training: TrainingConfig,
    /// Mixture-model discretization options
    pub discretization: DiscretizationConfig,
    /// Input datasets
    pub data: DataConfig,
    /// Artifact locations
    pub storage: StorageConfig,
    /// Online loop options
    pub serving: ServingConfig,
}

impl Config {
    /// Load configuration from a YAML file and apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::config(format!("Failed to parse config: {}", e)))
    }

    /// Override storage locations from `SENTINEL_MODEL_DIR` / `SENTINEL_OUTPUT_FOLDER`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("SENTINEL_MODEL_DIR") {
            self.storage.model_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("SENTINEL_OUTPUT_FOLDER") {
            self.storage.output_folder = PathBuf::from(dir);
        }
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        self.training.validate()?;
        self.discretization.validate()?;
        self.serving.validate()?;
        Ok(())
    }
}

/// Which trained-model variant to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Causal DAG with per-component inference engines
    #[default]
    Causal,
    /// Bagged decision trees
    RandomForest,
    /// One-vs-rest linear SVM
    Svm,
}

impl ModelType {
    /// Get the model type as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Causal => "causal",
            ModelType::RandomForest => "random_forest",
            ModelType::Svm => "svm",
        }
    }
}

/// Curation and structure-learning options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Services eligible as causal roots
    pub services_for_fault_injection: Vec<String>,
    /// Services whose rows and columns are excluded
    pub services_skipped: Vec<String>,
    /// Experiment name to fault code, rows running these are excluded
    pub experiments_skipped: BTreeMap<String, u32>,
    /// Metric-name prefixes that are excluded
    pub metrics_skipped: Vec<String>,
    /// Ground-truth window size at the start of the training data
    pub number_of_initial_steps: usize,
    /// Incoming edges per node that survive pruning regardless of weight
    pub min_number_of_edges_per_node: usize,
    /// Remaining incoming edges below this weight are pruned
    pub weak_link_threshold: f64,
    /// Iteration cap of the structure search
    pub max_iter: usize,
    /// Upper bound on parents per node during the search
    pub max_parents: usize,
    /// Prefix shared by service identifiers (`edgex` for EdgeX deployments)
    pub service_prefix: String,
    /// Trained-model variant
    pub model_type: ModelType,
    /// Trees in the random forest variant
    pub number_of_trees: usize,
    /// Seed for the forest and SVM variants
    pub random_state: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            services_for_fault_injection: Vec::new(),
            services_skipped: Vec::new(),
            experiments_skipped: BTreeMap::new(),
            metrics_skipped: Vec::new(),
            number_of_initial_steps: 20,
            min_number_of_edges_per_node: 1,
            weak_link_threshold: 0.1,
            max_iter: 1000,
            max_parents: 3,
            service_prefix: "edgex".to_string(),
            model_type: ModelType::Causal,
            number_of_trees: 25,
            random_state: 42,
        }
    }
}

impl TrainingConfig {
    fn validate(&self) -> Result<()> {
        if self.number_of_initial_steps == 0 {
            return Err(Error::config("number_of_initial_steps must be > 0"));
        }
        if !(self.weak_link_threshold >= 0.0) {
            return Err(Error::config("weak_link_threshold must be >= 0"));
        }
        if self.max_iter == 0 {
            return Err(Error::config("max_iter must be > 0"));
        }
        if self.max_parents == 0 {
            return Err(Error::config("max_parents must be > 0"));
        }
        if self.model_type == ModelType::RandomForest && self.number_of_trees == 0 {
            return Err(Error::config("number_of_trees must be > 0"));
        }
        Ok(())
    }

    /// Column classifier for this deployment
    pub fn classifier(&self) -> ColumnClassifier {
        ColumnClassifier::new(&self.services_for_fault_injection, &self.service_prefix)
    }

    /// Skipped services with dashes normalised
    pub fn normalized_services_skipped(&self) -> Vec<String> {
        self.services_skipped
            .iter()
            .map(|s| normalize_column_name(s))
            .collect()
    }

    /// Injectable services with dashes normalised
    pub fn normalized_fault_services(&self) -> Vec<String> {
        self.services_for_fault_injection
            .iter()
            .map(|s| normalize_column_name(s))
            .collect()
    }
}

/// Mixture-model discretization options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscretizationConfig {
    /// Components requested by the first mixture fit
    pub initial_components: usize,
    /// Refits allowed after the mixture collapses
    pub max_refits: usize,
    /// EM iterations per fit
    pub max_em_iterations: usize,
    /// EM convergence tolerance on the mean log-likelihood
    pub tolerance: f64,
    /// Bandwidth used when the series spread is zero or already unit-scaled
    pub default_bandwidth: f64,
    /// Categories whose ordinal states run from highest to lowest value
    pub reversed_categories: Vec<MetricCategory>,
    /// Ground-truth missing ratio above which a column is dropped
    pub max_missing_ratio: f64,
    /// Median-state share above which a column is dropped as small effect
    pub small_effect_ratio: f64,
    /// Median-state share in the ground-truth window below which a column is unstable
    pub unstable_ratio: f64,
    /// Infrastructure noise substring removed from every dataset
    pub infra_noise: String,
}

impl Default for DiscretizationConfig {
    fn default() -> Self {
        Self {
            initial_components: 3,
            max_refits: 3,
            max_em_iterations: 200,
            tolerance: 1e-6,
            default_bandwidth: 0.1,
            reversed_categories: vec![MetricCategory::Availability],
            max_missing_ratio: 0.7,
            small_effect_ratio: 0.98,
            unstable_ratio: 0.7,
            infra_noise: "istio_init".to_string(),
        }
    }
}

impl DiscretizationConfig {
    fn validate(&self) -> Result<()> {
        if self.initial_components == 0 {
            return Err(Error::config("initial_components must be > 0"));
        }
        if self.max_em_iterations == 0 {
            return Err(Error::config("max_em_iterations must be > 0"));
        }
        for (name, ratio) in [
            ("max_missing_ratio", self.max_missing_ratio),
            ("small_effect_ratio", self.small_effect_ratio),
            ("unstable_ratio", self.unstable_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(Error::config(format!("{name} must be within [0, 1]")));
            }
        }
        Ok(())
    }

    /// Whether a category maps its highest values to state 0
    pub fn is_reversed(&self, category: MetricCategory) -> bool {
        self.reversed_categories.contains(&category)
    }
}

/// Input datasets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Training CSV files
    pub training_data: Vec<PathBuf>,
    /// Test CSV files for archive replay
    pub test_data: Vec<PathBuf>,
    /// Rows taken from the head of the training files
    pub number_of_training_data: usize,
    /// Rows taken from the tail of the test files
    pub number_of_test_data: usize,
    /// Prefix the test rows with fault-free rows from the head
    pub test_false_positive: bool,
    /// Fault-free rows prepended when `test_false_positive` is set
    pub number_of_test_false_positive_data: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            training_data: Vec::new(),
            test_data: Vec::new(),
            number_of_training_data: 150,
            number_of_test_data: 50,
            test_false_positive: false,
            number_of_test_false_positive_data: 0,
        }
    }
}

/// Artifact locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Trained-model and structure artifacts
    pub model_dir: PathBuf,
    /// DOT renderings of learned graphs
    pub graph_dir: PathBuf,
    /// Replay result records
    pub output_folder: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("structure_models"),
            graph_dir: PathBuf::from("graphs"),
            output_folder: PathBuf::from("results"),
        }
    }
}

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts before giving up
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 5_000,
            max_backoff_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given attempt (1-based); the first attempt has none
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u64 << (attempt - 2).min(16);
        let millis = self.initial_backoff_ms.saturating_mul(factor);
        Duration::from_millis(millis.min(self.max_backoff_ms))
    }
}

/// Online loop options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    /// Probability at which a prediction counts as flagged
    pub decision_threshold: f64,
    /// Drop observation columns unknown to the training matrix (archive replay)
    pub prune_unknown_columns: bool,
    /// Retry policy for rebuilding an invalidated model
    pub retrain: RetryPolicy,
    /// Identifier attached to outgoing incident reports
    pub reporting_identifier: String,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            decision_threshold: 0.184,
            prune_unknown_columns: false,
            retrain: RetryPolicy::default(),
            reporting_identifier: "rca-sentinel".to_string(),
        }
    }
}

impl ServingConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.decision_threshold) {
            return Err(Error::config("decision_threshold must be within [0, 1]"));
        }
        if self.retrain.max_attempts == 0 {
            return Err(Error::config("retrain.max_attempts must be > 0"));
        }
        Ok(())
    }
}
