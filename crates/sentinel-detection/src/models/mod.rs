//! Trained fault models behind one prediction interface.
//!
//! - [`CausalModel`]: learned DAG plus partitioned inference engines
//! - [`ForestModel`]: bagged decision trees over discrete states
//! - [`SvmModel`]: one-vs-rest linear classifier

mod causal;
mod forest;
mod svm;

pub use causal::CausalModel;
pub use forest::ForestModel;
pub use svm::SvmModel;

use rca_sentinel_core::{
    config::ModelType, events::Prediction, frame::DiscreteFrame, types::ColumnClassifier, Error,
    Result,
};
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use std::collections::BTreeMap;
use std::fmt;

/// Capability shared by every trained model
pub trait FaultPredictor {
    /// Rank service-status columns by fault probability, highest first
    fn predict_fault_distribution(&self, evidence: &BTreeMap<String, u32>) -> Result<Vec<Prediction>>;
}

/// Trained model variant
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FaultModel {
    /// Causal graph with inference engines
    Causal(CausalModel),
    /// Random forest
    Forest(ForestModel),
    /// Linear SVM
    Svm(SvmModel),
}

impl FaultModel {
    /// Configured type this variant corresponds to
    pub fn model_type(&self) -> ModelType {
        match self {
            Self::Causal(_) => ModelType::Causal,
            Self::Forest(_) => ModelType::RandomForest,
            Self::Svm(_) => ModelType::Svm,
        }
    }

    /// Metric columns without any edge in the causal graph
    pub fn independent_nodes(&self) -> &[String] {
        match self {
            Self::Causal(model) => model.independent_nodes(),
            Self::Forest(_) | Self::Svm(_) => &[],
        }
    }
}

impl FaultPredictor for FaultModel {
    fn predict_fault_distribution(&self, evidence: &BTreeMap<String, u32>) -> Result<Vec<Prediction>> {
        match self {
            Self::Causal(model) => model.predict_fault_distribution(evidence),
            Self::Forest(model) => model.predict_fault_distribution(evidence),
            Self::Svm(model) => model.predict_fault_distribution(evidence),
        }
    }
}

/// Supervised class: a fault code on one service, or no fault at all
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FaultClass {
    /// Faulty service-status column, `None` for the no-fault class
    pub service: Option<String>,
    /// Fault code, 0 for the no-fault class
    pub code: u32,
}

impl FaultClass {
    fn no_fault() -> Self {
        Self {
            service: None,
            code: 0,
        }
    }
}

impl fmt::Display for FaultClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.service {
            Some(service) => write!(f, "{}_{}", service, self.code),
            None => f.write_str("no_fault"),
        }
    }
}

/// Feature matrix and labels for the supervised variants
#[derive(Debug, Clone)]
pub(crate) struct LabeledRows {
    pub(crate) features: Vec<String>,
    pub(crate) rows: Vec<Vec<f64>>,
    pub(crate) classes: Vec<FaultClass>,
    pub(crate) labels: Vec<usize>,
}

impl LabeledRows {
    /// Metric columns become features; each row is labelled by its first
    /// service-status column with a non-zero code.
    pub(crate) fn from_frame(data: &DiscreteFrame, classifier: &ColumnClassifier) -> Self {
        let (status, features): (Vec<&str>, Vec<&str>) = data
            .columns()
            .iter()
            .map(String::as_str)
            .partition(|c| classifier.is_service_status(c));

        let mut classes = vec![FaultClass::no_fault()];
        let mut labels = Vec::with_capacity(data.n_rows());
        let mut rows = Vec::with_capacity(data.n_rows());
        for row in 0..data.n_rows() {
            let class = status
                .iter()
                .find_map(|column| {
                    let code = data.column(column)?[row];
                    (code != 0).then(|| FaultClass {
                        service: Some(column.to_string()),
                        code,
                    })
                })
                .unwrap_or_else(FaultClass::no_fault);
            let label = match classes.iter().position(|c| *c == class) {
                Some(label) => label,
                None => {
                    classes.push(class);
                    classes.len() - 1
                }
            };
            labels.push(label);
            rows.push(
                features
                    .iter()
                    .map(|f| data.column(f).map_or(0.0, |s| f64::from(s[row])))
                    .collect(),
            );
        }

        Self {
            features: features.into_iter().map(str::to_string).collect(),
            rows,
            classes,
            labels,
        }
    }
}

/// Feature vector for one evidence row; absent columns read as state 0
pub(crate) fn feature_vector(features: &[String], evidence: &BTreeMap<String, u32>) -> Vec<f64> {
    features
        .iter()
        .map(|f| evidence.get(f).map_or(0.0, |s| f64::from(*s)))
        .collect()
}

/// Dense row-major matrix for the supervised variants
pub(crate) fn feature_matrix(rows: &[Vec<f64>]) -> Result<DenseMatrix<f64>> {
    DenseMatrix::from_2d_vec(&rows.to_vec())
        .map_err(|e| Error::validation(format!("feature matrix: {}", e)))
}

/// Fold per-class probabilities into ranked per-service predictions
pub(crate) fn predictions_from_classes(classes: &[FaultClass], probabilities: &[f64]) -> Vec<Prediction> {
    let mut per_service: Vec<(String, BTreeMap<u32, f64>)> = Vec::new();
    for (class, p) in classes.iter().zip(probabilities) {
        let Some(service) = &class.service else {
            continue;
        };
        if *p <= 0.0 {
            continue;
        }
        match per_service.iter_mut().find(|(s, _)| s == service) {
            Some((_, distribution)) => {
                *distribution.entry(class.code).or_insert(0.0) += p;
            }
            None => per_service.push((service.clone(), BTreeMap::from([(class.code, *p)]))),
        }
    }

    let predictions = per_service
        .into_iter()
        .map(|(service, mut distribution)| {
            let probability: f64 = distribution.values().sum();
            distribution.insert(0, (1.0 - probability).max(0.0));
            Prediction {
                service_name: service,
                probability,
                fault_distribution: round_distribution(distribution),
            }
        })
        .collect();
    rank(predictions)
}

/// Stable sort, highest probability first
pub(crate) fn rank(mut predictions: Vec<Prediction>) -> Vec<Prediction> {
    predictions.sort_by(|a, b| b.probability.total_cmp(&a.probability));
    predictions
}

/// Round every mass to three decimals
pub(crate) fn round_distribution(distribution: BTreeMap<u32, f64>) -> BTreeMap<u32, f64> {
    distribution
        .into_iter()
        .map(|(state, p)| (state, (p * 1000.0).round() / 1000.0))
        .collect()
}
