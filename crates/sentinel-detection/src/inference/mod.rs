//! Partitioned exact inference.
//!
//! A learned structure is split into weakly connected components and each
//! component is compiled into an independent [`InferenceEngine`]. Parameters
//! are estimated from the training matrix with a uniform (K2) prior, so
//! every conditional probability is strictly positive. Queries run variable
//! elimination with a greedy smallest-factor ordering.

mod factor;

use crate::structure::StructureModel;
use factor::Factor;
use rca_sentinel_core::{frame::DiscreteFrame, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Posterior state distribution per queried column
pub type Marginals = BTreeMap<String, BTreeMap<u32, f64>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EngineNode {
    name: String,
    /// Observed state values, ascending
    states: Vec<u32>,
    /// Indices of parent nodes
    parents: Vec<usize>,
    /// Row-major conditional table, one row of `states.len()` per parent
    /// configuration; the first parent is the most significant digit
    cpt: Vec<f64>,
}

impl EngineNode {
    fn state_index(&self, state: u32) -> Option<usize> {
        self.states.binary_search(&state).ok()
    }
}

/// Exact inference over one connected component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceEngine {
    nodes: Vec<EngineNode>,
    index: BTreeMap<String, usize>,
}

/// Compile one engine per weakly connected component of `structure`
pub fn compile(structure: &StructureModel, data: &DiscreteFrame) -> Result<Vec<InferenceEngine>> {
    let engines = structure
        .weakly_connected_components()
        .iter()
        .map(|component| {
            let sub = structure.subgraph(component)?;
            InferenceEngine::fit(&sub, data)
        })
        .collect::<Result<Vec<_>>>()?;
    info!(
        engines = engines.len(),
        nodes = structure.node_count(),
        "Compiled inference engines"
    );
    Ok(engines)
}

fn training_column<'d>(data: &'d DiscreteFrame, name: &str) -> Result<&'d [u32]> {
    data.column(name).ok_or_else(|| {
        Error::validation(format!(
            "structure node '{}' is missing from the training matrix",
            name
        ))
    })
}

impl InferenceEngine {
    /// Estimate conditional tables for every node of `structure`
    pub fn fit(structure: &StructureModel, data: &DiscreteFrame) -> Result<Self> {
        let order = structure.topological_order()?;
        let index: BTreeMap<String, usize> = order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        let mut nodes: Vec<EngineNode> = Vec::with_capacity(order.len());
        for name in &order {
            let column = training_column(data, name)?;
            let states: Vec<u32> = column.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
            let parents: Vec<usize> = structure.parents(name).iter().map(|p| index[*p]).collect();
            nodes.push(EngineNode {
                name: name.clone(),
                states,
                parents,
                cpt: Vec::new(),
            });
        }

        for i in 0..nodes.len() {
            let cpt = Self::estimate(&nodes, i, data)?;
            nodes[i].cpt = cpt;
        }
        debug!(nodes = nodes.len(), "Fitted component");
        Ok(Self { nodes, index })
    }

    fn estimate(nodes: &[EngineNode], i: usize, data: &DiscreteFrame) -> Result<Vec<f64>> {
        let node = &nodes[i];
        let r = node.states.len();
        let q: usize = node.parents.iter().map(|p| nodes[*p].states.len()).product();
        let mut counts = vec![0.0f64; q * r];

        let child = training_column(data, &node.name)?;
        let parent_columns: Vec<&[u32]> = node
            .parents
            .iter()
            .map(|p| training_column(data, &nodes[*p].name))
            .collect::<Result<_>>()?;

        for row in 0..data.n_rows() {
            let mut config = 0;
            for (p, column) in node.parents.iter().zip(&parent_columns) {
                let parent = &nodes[*p];
                let s = parent.state_index(column[row]).unwrap_or(0);
                config = config * parent.states.len() + s;
            }
            if let Some(s) = node.state_index(child[row]) {
                counts[config * r + s] += 1.0;
            }
        }

        for config in counts.chunks_mut(r) {
            let total: f64 = config.iter().sum();
            for c in config.iter_mut() {
                *c = (*c + 1.0) / (total + r as f64);
            }
        }
        Ok(counts)
    }

    /// Columns covered by this engine
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.name.as_str())
    }

    /// Check whether a column belongs to this engine
    pub fn contains(&self, column: &str) -> bool {
        self.index.contains_key(column)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the engine has no node
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Observed states of a column
    pub fn states(&self, column: &str) -> Option<&[u32]> {
        self.index.get(column).map(|i| self.nodes[*i].states.as_slice())
    }

    /// Restrict evidence to the columns of this engine
    pub fn filter_evidence(&self, evidence: &BTreeMap<String, u32>) -> BTreeMap<String, u32> {
        evidence
            .iter()
            .filter(|(column, _)| self.contains(column))
            .map(|(column, state)| (column.clone(), *state))
            .collect()
    }

    /// Posterior marginals of every non-evidence node
    pub fn query(&self, evidence: &BTreeMap<String, u32>) -> Result<Marginals> {
        let mut observed: BTreeMap<usize, usize> = BTreeMap::new();
        for (column, state) in evidence {
            let Some(&var) = self.index.get(column) else {
                return Err(Error::EvidenceOutOfDomain {
                    column: column.clone(),
                });
            };
            let node = &self.nodes[var];
            let s = node.state_index(*state).ok_or_else(|| {
                Error::validation(format!(
                    "state {} was never observed for column '{}'",
                    state, column
                ))
            })?;
            observed.insert(var, s);
        }

        let factors: Vec<Factor> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let mut vars = node.parents.clone();
                vars.push(i);
                let cards = vars.iter().map(|v| self.nodes[*v].states.len()).collect();
                let mut factor = Factor::new(vars, cards, node.cpt.clone());
                for (var, state) in &observed {
                    factor = factor.reduce(*var, *state);
                }
                factor
            })
            .collect();

        let mut marginals = Marginals::new();
        for (target, node) in self.nodes.iter().enumerate() {
            if observed.contains_key(&target) {
                continue;
            }
            let posterior = self.eliminate(factors.clone(), target, &observed);
            let distribution = node
                .states
                .iter()
                .copied()
                .zip(posterior)
                .collect();
            marginals.insert(node.name.clone(), distribution);
        }
        Ok(marginals)
    }

    fn eliminate(
        &self,
        mut factors: Vec<Factor>,
        target: usize,
        observed: &BTreeMap<usize, usize>,
    ) -> Vec<f64> {
        let mut hidden: Vec<usize> = (0..self.nodes.len())
            .filter(|v| *v != target && !observed.contains_key(v))
            .collect();

        while !hidden.is_empty() {
            let (pos, _) = hidden
                .iter()
                .enumerate()
                .map(|(pos, var)| (pos, self.elimination_cost(&factors, *var)))
                .min_by_key(|(_, cost)| *cost)
                .unwrap_or((0, 0));
            let var = hidden.swap_remove(pos);

            let (touching, rest): (Vec<Factor>, Vec<Factor>) =
                factors.into_iter().partition(|f| f.contains(var));
            factors = rest;
            if !touching.is_empty() {
                factors.push(Factor::product_all(&touching).marginalize(var));
            }
        }

        let joint = Factor::product_all(&factors);
        let card = self.nodes[target].states.len();
        let values = if joint.vars() == [target] {
            joint.values().to_vec()
        } else {
            vec![1.0; card]
        };
        let total: f64 = values.iter().sum();
        if total > 0.0 {
            values.iter().map(|v| v / total).collect()
        } else {
            vec![1.0 / card as f64; card]
        }
    }

    /// Size of the factor produced by eliminating `var`
    fn elimination_cost(&self, factors: &[Factor], var: usize) -> usize {
        let scope: BTreeSet<usize> = factors
            .iter()
            .filter(|f| f.contains(var))
            .flat_map(|f| f.vars().iter().copied())
            .collect();
        scope
            .iter()
            .map(|v| self.nodes[*v].states.len())
            .product()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structure() -> (StructureModel, DiscreteFrame) {
        let status: Vec<u32> = (0..40).map(|i| if i % 10 == 0 { 1 } else { 0 }).collect();
        let latency = status.clone();
        let cpu: Vec<u32> = (0..40).map(|i| (i % 2) as u32).collect();
        let memory = cpu.clone();
        let data = DiscreteFrame::new(vec![
            ("edgex_core_data".into(), status),
            ("latency_edgex_ui_edgex_core_data".into(), latency),
            ("cpu_a".into(), cpu),
            ("memory_b".into(), memory),
        ])
        .unwrap();
        let roots = ["edgex_core_data".to_string()].into_iter().collect();
        let mut model = StructureModel::new(data.columns().iter().cloned(), roots);
        model
            .add_edge("edgex_core_data", "latency_edgex_ui_edgex_core_data", 1.0)
            .unwrap();
        model.add_edge("cpu_a", "memory_b", 1.0).unwrap();
        (model, data)
    }

    #[test]
    fn test_one_engine_per_component() {
        let (model, data) = structure();
        let engines = compile(&model, &data).unwrap();
        assert_eq!(engines.len(), 2);
        assert!(engines[0].contains("edgex_core_data"));
        assert!(engines[1].contains("memory_b"));
    }

    #[test]
    fn test_posterior_follows_evidence() {
        let (model, data) = structure();
        let engines = compile(&model, &data).unwrap();
        let engine = &engines[0];

        let evidence: BTreeMap<String, u32> =
            [("latency_edgex_ui_edgex_core_data".to_string(), 1)].into_iter().collect();
        let marginals = engine.query(&evidence).unwrap();
        assert!(!marginals.contains_key("latency_edgex_ui_edgex_core_data"));
        let status = &marginals["edgex_core_data"];
        let total: f64 = status.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        // Prior P(fault) = 0.1; under delay evidence it must dominate.
        assert!(status[&1] > 0.7);

        let calm: BTreeMap<String, u32> =
            [("latency_edgex_ui_edgex_core_data".to_string(), 0)].into_iter().collect();
        let marginals = engine.query(&calm).unwrap();
        assert!(marginals["edgex_core_data"][&1] < 0.1);
    }

    #[test]
    fn test_cpt_uses_k2_prior() {
        let (model, data) = structure();
        let engines = compile(&model, &data).unwrap();
        // Root with 4 faults out of 40: (4 + 1) / (40 + 2).
        let marginals = engines[0].query(&BTreeMap::new()).unwrap();
        assert!((marginals["edgex_core_data"][&1] - 5.0 / 42.0).abs() < 1e-9);
    }

    #[test]
    fn test_foreign_evidence_is_rejected() {
        let (model, data) = structure();
        let engines = compile(&model, &data).unwrap();
        let evidence: BTreeMap<String, u32> = [("cpu_a".to_string(), 1)].into_iter().collect();
        assert!(matches!(
            engines[0].query(&evidence),
            Err(Error::EvidenceOutOfDomain { .. })
        ));
        assert_eq!(engines[0].filter_evidence(&evidence).len(), 0);
        assert_eq!(engines[1].filter_evidence(&evidence).len(), 1);
    }

    #[test]
    fn test_unseen_state_is_rejected() {
        let (model, data) = structure();
        let engines = compile(&model, &data).unwrap();
        let evidence: BTreeMap<String, u32> = [("cpu_a".to_string(), 7)].into_iter().collect();
        assert!(engines[1].query(&evidence).is_err());
    }
}
