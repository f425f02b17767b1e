use super::StructureModel;
use rca_sentinel_core::{frame::DiscreteFrame, Error, Result};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

const MIN_IMPROVEMENT: f64 = 1e-9;

/// Greedy hill-climbing search scored by BIC.
///
/// Only edge additions are considered. A candidate `u -> v` is skipped when
/// `v` is a service-status node, when `v` already has `max_parents` parents,
/// or when the edge would close a cycle. Learned edges are weighted by the
/// normalised mutual information of their endpoints.
#[derive(Debug, Clone)]
pub struct StructureLearner {
    max_iter: usize,
    max_parents: usize,
}

struct Encoded {
    values: Vec<Vec<usize>>,
    cardinalities: Vec<usize>,
    n_rows: usize,
}

impl Encoded {
    fn new(data: &DiscreteFrame) -> Self {
        let mut values = Vec::with_capacity(data.n_cols());
        let mut cardinalities = Vec::with_capacity(data.n_cols());
        for (_, states) in data.iter_columns() {
            let domain: BTreeSet<u32> = states.iter().copied().collect();
            let lookup: HashMap<u32, usize> =
                domain.iter().enumerate().map(|(i, s)| (*s, i)).collect();
            values.push(states.iter().map(|s| lookup[s]).collect());
            cardinalities.push(domain.len().max(1));
        }
        Self {
            values,
            cardinalities,
            n_rows: data.n_rows(),
        }
    }

    /// Joint counts of `child` for each parent configuration
    fn counts(&self, child: usize, parents: &[usize]) -> HashMap<usize, Vec<u32>> {
        let r = self.cardinalities[child];
        let mut counts: HashMap<usize, Vec<u32>> = HashMap::new();
        for row in 0..self.n_rows {
            let config = parents.iter().fold(0usize, |acc, p| {
                acc * self.cardinalities[*p] + self.values[*p][row]
            });
            counts.entry(config).or_insert_with(|| vec![0; r])[self.values[child][row]] += 1;
        }
        counts
    }

    fn bic(&self, child: usize, parents: &[usize]) -> f64 {
        let r = self.cardinalities[child];
        let q: usize = parents.iter().map(|p| self.cardinalities[*p]).product();
        let mut log_likelihood = 0.0;
        for row in self.counts(child, parents).values() {
            let total: u32 = row.iter().sum();
            for &n in row.iter().filter(|n| **n > 0) {
                log_likelihood += f64::from(n) * (f64::from(n) / f64::from(total)).ln();
            }
        }
        let penalty = 0.5 * (self.n_rows.max(1) as f64).ln() * ((r - 1) * q) as f64;
        log_likelihood - penalty
    }

    fn entropy(&self, column: usize) -> f64 {
        let mut counts = vec![0u32; self.cardinalities[column]];
        for v in &self.values[column] {
            counts[*v] += 1;
        }
        entropy_of(&counts, self.n_rows)
    }

    /// Mutual information over the normalising entropy, in `[0, 1]`
    fn normalized_mutual_information(&self, a: usize, b: usize) -> f64 {
        let h_a = self.entropy(a);
        let h_b = self.entropy(b);
        let norm = h_a.min(h_b);
        if norm <= 0.0 {
            return 0.0;
        }
        let joint: Vec<u32> = self.counts(a, &[b]).into_values().flatten().collect();
        let mi = h_a + h_b - entropy_of(&joint, self.n_rows);
        (mi / norm).clamp(0.0, 1.0)
    }
}

fn entropy_of(counts: &[u32], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    counts
        .iter()
        .filter(|c| **c > 0)
        .map(|c| {
            let p = f64::from(*c) / total;
            -p * p.ln()
        })
        .sum()
}

impl StructureLearner {
    /// Create a learner
    pub fn new(max_iter: usize, max_parents: usize) -> Self {
        Self {
            max_iter,
            max_parents,
        }
    }

    /// Learn a DAG over every column of `data`; `roots` are the
    /// service-status columns that must not receive parents.
    pub fn learn(&self, data: &DiscreteFrame, roots: &BTreeSet<String>) -> Result<StructureModel> {
        if data.n_cols() == 0 || data.n_rows() == 0 {
            return Err(Error::validation("cannot learn a structure from an empty matrix"));
        }
        let columns = data.columns();
        let encoded = Encoded::new(data);
        let mut model = StructureModel::new(
            columns.iter().cloned(),
            roots
                .iter()
                .filter(|r| data.contains(r))
                .cloned()
                .collect(),
        );

        let n = columns.len();
        let mut parents: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut scores: Vec<f64> = (0..n).map(|v| encoded.bic(v, &[])).collect();
        let mut deltas: Vec<Vec<Option<f64>>> = vec![vec![None; n]; n];

        let mut iterations = 0;
        while iterations < self.max_iter {
            iterations += 1;
            let mut best: Option<(usize, usize, f64)> = None;
            for v in 0..n {
                if model.is_root(&columns[v]) || parents[v].len() >= self.max_parents {
                    continue;
                }
                for u in 0..n {
                    if u == v || parents[v].contains(&u) {
                        continue;
                    }
                    let delta = match deltas[v][u] {
                        Some(delta) => delta,
                        None => {
                            let mut candidate = parents[v].clone();
                            candidate.push(u);
                            let delta = encoded.bic(v, &candidate) - scores[v];
                            deltas[v][u] = Some(delta);
                            delta
                        }
                    };
                    if delta <= MIN_IMPROVEMENT || best.map_or(false, |(_, _, b)| delta <= b) {
                        continue;
                    }
                    if model.would_create_cycle(&columns[u], &columns[v])? {
                        continue;
                    }
                    best = Some((u, v, delta));
                }
            }

            let Some((u, v, delta)) = best else {
                break;
            };
            model.add_edge(&columns[u], &columns[v], 0.0)?;
            parents[v].push(u);
            scores[v] += delta;
            deltas[v].iter_mut().for_each(|d| *d = None);
            debug!(source = %columns[u], target = %columns[v], delta, "Added edge");
        }

        for edge in model.edges() {
            let (Some(u), Some(v)) = (data.index_of(&edge.source), data.index_of(&edge.target)) else {
                continue;
            };
            model.set_weight(
                &edge.source,
                &edge.target,
                encoded.normalized_mutual_information(u, v),
            )?;
        }
        model.validate()?;

        info!(
            nodes = model.node_count(),
            edges = model.edge_count(),
            iterations,
            components = model.weakly_connected_components().len(),
            "Learned causal structure"
        );
        Ok(model)
    }
}
