use super::{
    feature_matrix, feature_vector, predictions_from_classes, FaultClass, FaultPredictor, LabeledRows,
};
use rca_sentinel_core::{events::Prediction, Error, Result};
use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_classifier::{
    RandomForestClassifier, RandomForestClassifierParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;
use std::collections::BTreeMap;
use tracing::{info, warn};

const MAX_DEPTH: u16 = 12;

/// Single bagged CART tree: stratified bootstrap, random feature subsets
type BaggedTree = RandomForestClassifier<f64, u32, DenseMatrix<f64>, Vec<u32>>;

/// Bagged CART classifier over discrete metric states.
///
/// Every tree is grown with its own seed, so class probabilities are the
/// share of trees voting for each class.
#[derive(Debug, Serialize, Deserialize)]
pub struct ForestModel {
    features: Vec<String>,
    classes: Vec<FaultClass>,
    trees: Vec<BaggedTree>,
}

impl ForestModel {
    /// Grow `n_trees` trees seeded from `random_state`
    pub(crate) fn fit(data: &LabeledRows, n_trees: usize, random_state: u64) -> Result<Self> {
        if data.rows.is_empty() {
            return Err(Error::validation("cannot train a forest on an empty matrix"));
        }
        let mut model = Self {
            features: data.features.clone(),
            classes: data.classes.clone(),
            trees: Vec::new(),
        };
        if data.classes.len() < 2 || data.features.is_empty() {
            warn!(
                classes = data.classes.len(),
                features = data.features.len(),
                "Nothing to separate; the forest predicts no faults"
            );
            return Ok(model);
        }

        let x = feature_matrix(&data.rows)?;
        let y: Vec<u32> = data.labels.iter().map(|l| *l as u32).collect();
        let max_features = ((data.features.len() as f64).sqrt().ceil() as usize).max(1);
        for tree in 0..n_trees.max(1) as u64 {
            let parameters = RandomForestClassifierParameters::default()
                .with_n_trees(1)
                .with_max_depth(MAX_DEPTH)
                .with_m(max_features)
                .with_seed(random_state.wrapping_add(tree));
            let fitted = BaggedTree::fit(&x, &y, parameters)
                .map_err(|e| Error::internal(format!("random forest: {}", e)))?;
            model.trees.push(fitted);
        }

        let mut correct = 0;
        for (row, label) in data.rows.iter().zip(&data.labels) {
            if argmax(&model.class_probabilities(row)?) == *label {
                correct += 1;
            }
        }
        info!(
            trees = model.trees.len(),
            classes = model.classes.len(),
            training_accuracy = correct as f64 / data.rows.len() as f64,
            "Trained random forest"
        );
        Ok(model)
    }

    fn class_probabilities(&self, x: &[f64]) -> Result<Vec<f64>> {
        let mut votes = vec![0.0; self.classes.len()];
        if self.trees.is_empty() {
            return Ok(votes);
        }
        let row = feature_matrix(&[x.to_vec()])?;
        for tree in &self.trees {
            let predicted = tree
                .predict(&row)
                .map_err(|e| Error::internal(format!("random forest: {}", e)))?;
            if let Some(vote) = predicted.first().and_then(|c| votes.get_mut(*c as usize)) {
                *vote += 1.0;
            }
        }
        let n = self.trees.len() as f64;
        votes.iter_mut().for_each(|v| *v /= n);
        Ok(votes)
    }
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, v)| if *v > best.1 { (i, *v) } else { best })
        .0
}

impl FaultPredictor for ForestModel {
    fn predict_fault_distribution(&self, evidence: &BTreeMap<String, u32>) -> Result<Vec<Prediction>> {
        let x = feature_vector(&self.features, evidence);
        Ok(predictions_from_classes(&self.classes, &self.class_probabilities(&x)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rca_sentinel_core::{frame::DiscreteFrame, types::ColumnClassifier};

    fn labeled() -> LabeledRows {
        let status: Vec<u32> = (0..60).map(|i| if i % 6 == 0 { 1 } else { 0 }).collect();
        let latency: Vec<u32> = status.iter().map(|s| s * 2).collect();
        let cpu: Vec<u32> = (0..60).map(|i| (i % 3) as u32).collect();
        let data = DiscreteFrame::new(vec![
            ("edgex_core_data".into(), status),
            ("latency_edgex_ui_edgex_core_data".into(), latency),
            ("cpu_edgex_redis".into(), cpu),
        ])
        .unwrap();
        LabeledRows::from_frame(&data, &ColumnClassifier::new(&["edgex_core_data"], "edgex"))
    }

    #[test]
    fn test_forest_separates_delay_faults() {
        let forest = ForestModel::fit(&labeled(), 15, 42).unwrap();
        let delayed: BTreeMap<String, u32> = [
            ("latency_edgex_ui_edgex_core_data".to_string(), 2),
            ("cpu_edgex_redis".to_string(), 1),
        ]
        .into_iter()
        .collect();
        let predictions = forest.predict_fault_distribution(&delayed).unwrap();
        assert_eq!(predictions[0].service_name, "edgex_core_data");
        assert!(predictions[0].probability > 0.5);
        assert_eq!(predictions[0].most_likely_fault(), Some(1));
    }

    #[test]
    fn test_forest_is_deterministic_for_a_seed() {
        let a = ForestModel::fit(&labeled(), 5, 7).unwrap();
        let b = ForestModel::fit(&labeled(), 5, 7).unwrap();
        let x = vec![0.0, 1.0];
        assert_eq!(
            a.class_probabilities(&x).unwrap(),
            b.class_probabilities(&x).unwrap()
        );
    }

    #[test]
    fn test_forest_without_faults_predicts_nothing() {
        let data = DiscreteFrame::new(vec![
            ("edgex_core_data".into(), vec![0; 10]),
            ("cpu_edgex_redis".into(), (0..10).map(|i| i % 2).collect()),
        ])
        .unwrap();
        let rows = LabeledRows::from_frame(&data, &ColumnClassifier::new(&["edgex_core_data"], "edgex"));
        let forest = ForestModel::fit(&rows, 5, 1).unwrap();
        let evidence: BTreeMap<String, u32> = [("cpu_edgex_redis".to_string(), 1)].into_iter().collect();
        assert!(forest.predict_fault_distribution(&evidence).unwrap().is_empty());
    }
}
