use super::{feature_matrix, feature_vector, FaultClass, FaultPredictor, LabeledRows};
use rca_sentinel_core::{events::Prediction, Error, Result};
use serde::{Deserialize, Serialize};
use smartcore::svm::svc::{SVCParameters, SVC};
use smartcore::svm::Kernels;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Soft-margin penalty
const C: f64 = 10.0;

/// Linear decision function `w · x + b`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Hyperplane {
    weights: Vec<f64>,
    bias: f64,
}

impl Hyperplane {
    /// Read the plane back from its scores at the origin followed by every
    /// unit vector
    fn from_basis_scores(scores: &[f64]) -> Self {
        let bias = scores.first().copied().unwrap_or(0.0);
        Self {
            weights: scores.iter().skip(1).map(|s| s - bias).collect(),
            bias,
        }
    }

    fn score(&self, x: &[f64]) -> f64 {
        self.bias + self.weights.iter().zip(x).map(|(w, v)| w * v).sum::<f64>()
    }
}

/// One-vs-rest linear SVM. Each class is separated from the rest by an
/// SMO-trained support vector classifier; only the resulting hyperplanes
/// are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvmModel {
    features: Vec<String>,
    classes: Vec<FaultClass>,
    hyperplanes: Vec<Hyperplane>,
}

/// Origin followed by the unit vector of every feature
fn basis_rows(n_features: usize) -> Vec<Vec<f64>> {
    let mut rows = vec![vec![0.0; n_features]];
    rows.extend((0..n_features).map(|j| {
        let mut unit = vec![0.0; n_features];
        unit[j] = 1.0;
        unit
    }));
    rows
}

impl SvmModel {
    /// Train one hyperplane per class
    pub(crate) fn fit(data: &LabeledRows, random_state: u64) -> Result<Self> {
        if data.rows.is_empty() {
            return Err(Error::validation("cannot train an SVM on an empty matrix"));
        }
        let mut model = Self {
            features: data.features.clone(),
            classes: data.classes.clone(),
            hyperplanes: Vec::new(),
        };
        if data.classes.len() < 2 || data.features.is_empty() {
            warn!(
                classes = data.classes.len(),
                features = data.features.len(),
                "Nothing to separate; the SVM predicts no faults"
            );
            return Ok(model);
        }

        let x = feature_matrix(&data.rows)?;
        let basis = feature_matrix(&basis_rows(data.features.len()))?;
        let parameters = SVCParameters::default()
            .with_c(C)
            .with_kernel(Kernels::linear())
            .with_seed(Some(random_state));
        for class in 0..data.classes.len() {
            let y: Vec<i32> = data
                .labels
                .iter()
                .map(|l| if *l == class { 1 } else { -1 })
                .collect();
            let scores = SVC::fit(&x, &y, &parameters)
                .and_then(|svc| svc.decision_function(&basis))
                .map_err(|e| Error::internal(format!("svm: {}", e)))?;
            model.hyperplanes.push(Hyperplane::from_basis_scores(&scores));
        }

        let correct = data
            .rows
            .iter()
            .zip(&data.labels)
            .filter(|(x, y)| model.decide(x) == Some(**y))
            .count();
        info!(
            classes = model.classes.len(),
            training_accuracy = correct as f64 / data.rows.len() as f64,
            "Trained linear SVM"
        );
        Ok(model)
    }

    /// Index of the highest-scoring class
    fn decide(&self, x: &[f64]) -> Option<usize> {
        self.hyperplanes
            .iter()
            .map(|plane| plane.score(x))
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, s)| match best {
                Some((_, top)) if top >= s => best,
                _ => Some((i, s)),
            })
            .map(|(i, _)| i)
    }
}

impl FaultPredictor for SvmModel {
    fn predict_fault_distribution(&self, evidence: &BTreeMap<String, u32>) -> Result<Vec<Prediction>> {
        let x = feature_vector(&self.features, evidence);
        let Some(class) = self.decide(&x).and_then(|i| self.classes.get(i)) else {
            return Ok(Vec::new());
        };
        Ok(match &class.service {
            Some(service) => vec![Prediction {
                service_name: service.clone(),
                probability: 1.0,
                fault_distribution: BTreeMap::from([(0, 0.0), (class.code, 1.0)]),
            }],
            None => Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rca_sentinel_core::{frame::DiscreteFrame, types::ColumnClassifier};

    fn labeled() -> LabeledRows {
        let status: Vec<u32> = (0..60).map(|i| if i % 5 == 0 { 4 } else { 0 }).collect();
        let availability: Vec<u32> = status.iter().map(|s| u32::from(*s != 0)).collect();
        let data = DiscreteFrame::new(vec![
            ("edgex_core_data".into(), status),
            ("availability_edgex_core_data".into(), availability),
        ])
        .unwrap();
        LabeledRows::from_frame(&data, &ColumnClassifier::new(&["edgex_core_data"], "edgex"))
    }

    #[test]
    fn test_winning_class_gets_full_probability() {
        let svm = SvmModel::fit(&labeled(), 42).unwrap();
        let outage: BTreeMap<String, u32> =
            [("availability_edgex_core_data".to_string(), 1)].into_iter().collect();
        let predictions = svm.predict_fault_distribution(&outage).unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].probability, 1.0);
        assert_eq!(predictions[0].most_likely_fault(), Some(4));

        let calm: BTreeMap<String, u32> =
            [("availability_edgex_core_data".to_string(), 0)].into_iter().collect();
        assert!(svm.predict_fault_distribution(&calm).unwrap().is_empty());
    }

    #[test]
    fn test_hyperplane_from_basis_scores() {
        let plane = Hyperplane::from_basis_scores(&[0.5, 2.5, -1.5]);
        assert_eq!(plane.bias, 0.5);
        assert_eq!(plane.weights, vec![2.0, -2.0]);
        assert_eq!(plane.score(&[1.0, 1.0]), 0.5);
    }
}
