use super::{rank, round_distribution, FaultPredictor};
use crate::inference::{self, InferenceEngine};
use crate::structure::StructureModel;
use rca_sentinel_core::{events::Prediction, frame::DiscreteFrame, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Pruned causal graph compiled into per-component inference engines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalModel {
    structure: StructureModel,
    engines: Vec<InferenceEngine>,
    independent_nodes: Vec<String>,
    status_nodes: BTreeSet<String>,
}

impl CausalModel {
    /// Prune `structure`, set aside nodes left without edges and compile
    /// the remaining components against the training matrix.
    pub fn build(
        mut structure: StructureModel,
        data: &DiscreteFrame,
        min_edges_per_node: usize,
        weak_link_threshold: f64,
    ) -> Result<Self> {
        structure.validate()?;
        structure.prune_weak_edges(min_edges_per_node, weak_link_threshold);
        let independent_nodes = structure.remove_independent_nodes();
        let engines = inference::compile(&structure, data)?;
        let status_nodes = structure.roots().map(str::to_string).collect();
        debug!(independent = ?independent_nodes, "Nodes without causal links");
        Ok(Self {
            structure,
            engines,
            independent_nodes,
            status_nodes,
        })
    }

    /// Pruned structure
    pub fn structure(&self) -> &StructureModel {
        &self.structure
    }

    /// Compiled engines, one per component
    pub fn engines(&self) -> &[InferenceEngine] {
        &self.engines
    }

    /// Nodes removed for having no edge
    pub fn independent_nodes(&self) -> &[String] {
        &self.independent_nodes
    }
}

impl FaultPredictor for CausalModel {
    fn predict_fault_distribution(&self, evidence: &BTreeMap<String, u32>) -> Result<Vec<Prediction>> {
        let mut predictions = Vec::new();
        for engine in &self.engines {
            let filtered = engine.filter_evidence(evidence);
            let marginals = engine.query(&filtered)?;
            for column in engine.columns() {
                if !self.status_nodes.contains(column) {
                    continue;
                }
                let Some(distribution) = marginals.get(column) else {
                    continue;
                };
                let probability = 1.0 - distribution.get(&0).copied().unwrap_or(0.0);
                if probability > 0.0 {
                    predictions.push(Prediction {
                        service_name: column.to_string(),
                        probability,
                        fault_distribution: round_distribution(distribution.clone()),
                    });
                }
            }
        }
        Ok(rank(predictions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn training() -> DiscreteFrame {
        let faults: Vec<u32> = (0..40).map(|i| if i % 10 == 0 { 4 } else { 0 }).collect();
        let availability: Vec<u32> = faults.iter().map(|f| u32::from(*f != 0)).collect();
        DiscreteFrame::new(vec![
            ("edgex_core_data".into(), faults),
            ("availability_edgex_core_data".into(), availability),
            ("cpu_a".into(), (0..40).map(|i| (i % 2) as u32).collect()),
        ])
        .unwrap()
    }

    fn model() -> CausalModel {
        let data = training();
        let roots = ["edgex_core_data".to_string()].into_iter().collect();
        let mut structure = StructureModel::new(data.columns().iter().cloned(), roots);
        structure
            .add_edge("edgex_core_data", "availability_edgex_core_data", 0.9)
            .unwrap();
        CausalModel::build(structure, &data, 1, 0.1).unwrap()
    }

    #[test]
    fn test_independent_nodes_leave_the_engines() {
        let model = model();
        assert_eq!(model.independent_nodes(), &["cpu_a".to_string()]);
        assert_eq!(model.engines().len(), 1);
        assert!(!model.engines()[0].contains("cpu_a"));
    }

    #[test]
    fn test_outage_ranks_service_with_availability_fault() {
        let model = model();
        let evidence: BTreeMap<String, u32> =
            [("availability_edgex_core_data".to_string(), 1)].into_iter().collect();
        let predictions = model.predict_fault_distribution(&evidence).unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].service_name, "edgex_core_data");
        assert!(predictions[0].probability > 0.5);
        assert_eq!(predictions[0].most_likely_fault(), Some(4));
    }
}
