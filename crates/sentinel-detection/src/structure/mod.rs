//! Causal structure over discretized columns.
//!
//! The graph is a DAG whose service-status nodes are roots: they never get a
//! predecessor. Every mutation goes through [`StructureModel::add_edge`],
//! which rejects edges that would break either rule.

mod learner;

pub use learner::StructureLearner;

use petgraph::algo::{has_path_connecting, is_cyclic_directed, toposort};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::unionfind::UnionFind;
use petgraph::visit::{EdgeRef, IntoEdgeReferences, NodeIndexable};
use petgraph::Direction;
use rca_sentinel_core::{
    types::{ColumnClassifier, MetricCategory},
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use tracing::debug;

/// Directed edge with its causal strength
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedEdge {
    /// Parent column
    pub source: String,
    /// Child column
    pub target: String,
    /// Non-negative strength
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StructureSnapshot {
    nodes: Vec<String>,
    roots: Vec<String>,
    edges: Vec<WeightedEdge>,
}

/// Learned causal DAG
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "StructureSnapshot", into = "StructureSnapshot")]
pub struct StructureModel {
    graph: StableDiGraph<String, f64>,
    index: BTreeMap<String, NodeIndex>,
    roots: BTreeSet<String>,
}

impl StructureModel {
    /// Graph without edges over the given nodes; `roots` must be among them
    pub fn new<I, S>(nodes: I, roots: BTreeSet<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut model = Self {
            graph: StableDiGraph::new(),
            index: BTreeMap::new(),
            roots,
        };
        for node in nodes {
            model.add_node(node.into());
        }
        model
    }

    fn add_node(&mut self, name: String) -> NodeIndex {
        if let Some(index) = self.index.get(&name) {
            return *index;
        }
        let index = self.graph.add_node(name.clone());
        self.index.insert(name, index);
        index
    }

    fn node(&self, name: &str) -> Result<NodeIndex> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| Error::validation(format!("unknown structure node '{}'", name)))
    }

    /// Check whether a node is a service-status root
    pub fn is_root(&self, name: &str) -> bool {
        self.roots.contains(name)
    }

    /// Service-status nodes still present in the graph
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.roots
            .iter()
            .filter(|r| self.index.contains_key(*r))
            .map(String::as_str)
    }

    /// Check whether a node exists
    pub fn contains_node(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Node names in insertion order
    pub fn nodes(&self) -> Vec<&str> {
        self.graph
            .node_indices()
            .map(|i| self.graph[i].as_str())
            .collect()
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// True if adding `source -> target` would close a cycle
    pub fn would_create_cycle(&self, source: &str, target: &str) -> Result<bool> {
        let source = self.node(source)?;
        let target = self.node(target)?;
        Ok(source == target || has_path_connecting(&self.graph, target, source, None))
    }

    /// Add an edge, enforcing the root and acyclicity constraints
    pub fn add_edge(&mut self, source: &str, target: &str, weight: f64) -> Result<()> {
        if self.is_root(target) {
            return Err(Error::structural(format!(
                "service-status node '{}' cannot have parent '{}'",
                target, source
            )));
        }
        if !(weight >= 0.0) {
            return Err(Error::structural(format!(
                "edge {} -> {} has invalid weight {}",
                source, target, weight
            )));
        }
        if self.would_create_cycle(source, target)? {
            return Err(Error::structural(format!(
                "edge {} -> {} would create a cycle",
                source, target
            )));
        }
        let (s, t) = (self.node(source)?, self.node(target)?);
        match self.graph.find_edge(s, t) {
            Some(edge) => self.graph[edge] = weight,
            None => {
                self.graph.add_edge(s, t, weight);
            }
        }
        Ok(())
    }

    /// Set the weight of an existing edge
    pub fn set_weight(&mut self, source: &str, target: &str, weight: f64) -> Result<()> {
        let (s, t) = (self.node(source)?, self.node(target)?);
        let edge = self.graph.find_edge(s, t).ok_or_else(|| {
            Error::validation(format!("no edge {} -> {}", source, target))
        })?;
        self.graph[edge] = weight;
        Ok(())
    }

    /// Weight of an edge, if present
    pub fn edge_weight(&self, source: &str, target: &str) -> Option<f64> {
        let s = self.index.get(source)?;
        let t = self.index.get(target)?;
        self.graph.find_edge(*s, *t).map(|e| self.graph[e])
    }

    /// Parents of a node in insertion order
    pub fn parents(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Children of a node in insertion order
    pub fn children(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Outgoing)
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<&str> {
        let Some(index) = self.index.get(name) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(*index, direction).collect();
        found.sort();
        found.into_iter().map(|i| self.graph[i].as_str()).collect()
    }

    /// Incoming edge count
    pub fn in_degree(&self, name: &str) -> usize {
        self.parents(name).len()
    }

    /// Outgoing edge count
    pub fn out_degree(&self, name: &str) -> usize {
        self.children(name).len()
    }

    /// All edges
    pub fn edges(&self) -> Vec<WeightedEdge> {
        self.graph
            .edge_references()
            .map(|e| WeightedEdge {
                source: self.graph[e.source()].clone(),
                target: self.graph[e.target()].clone(),
                weight: *e.weight(),
            })
            .collect()
    }

    /// Keep the `min_edges` strongest parents of every node and drop the
    /// remaining incoming edges weaker than `threshold`. Returns the number
    /// of edges removed.
    pub fn prune_weak_edges(&mut self, min_edges: usize, threshold: f64) -> usize {
        let mut removed = 0;
        let nodes: Vec<NodeIndex> = self.graph.node_indices().collect();
        for node in nodes {
            let mut incoming: Vec<_> = self
                .graph
                .edges_directed(node, Direction::Incoming)
                .map(|e| (e.id(), *e.weight()))
                .collect();
            incoming.sort_by(|a, b| b.1.total_cmp(&a.1));
            for (edge, weight) in incoming.into_iter().skip(min_edges) {
                if weight < threshold {
                    self.graph.remove_edge(edge);
                    removed += 1;
                }
            }
        }
        debug!(removed, "Pruned weak edges");
        removed
    }

    /// Remove nodes without any edge and return their names
    pub fn remove_independent_nodes(&mut self) -> Vec<String> {
        let isolated: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|n| {
                self.graph
                    .neighbors_undirected(*n)
                    .next()
                    .is_none()
            })
            .collect();
        let mut names = Vec::with_capacity(isolated.len());
        for node in isolated {
            if let Some(name) = self.graph.remove_node(node) {
                self.index.remove(&name);
                names.push(name);
            }
        }
        names
    }

    /// Weakly connected components, each listed in insertion order
    pub fn weakly_connected_components(&self) -> Vec<Vec<String>> {
        let mut sets = UnionFind::new(self.graph.node_bound());
        for edge in self.graph.edge_references() {
            sets.union(edge.source().index(), edge.target().index());
        }
        let mut components: Vec<(usize, Vec<String>)> = Vec::new();
        for node in self.graph.node_indices() {
            let label = sets.find(node.index());
            match components.iter_mut().find(|(l, _)| *l == label) {
                Some((_, members)) => members.push(self.graph[node].clone()),
                None => components.push((label, vec![self.graph[node].clone()])),
            }
        }
        components.into_iter().map(|(_, members)| members).collect()
    }

    /// Induced subgraph over the given nodes
    pub fn subgraph(&self, nodes: &[String]) -> Result<Self> {
        let keep: BTreeSet<&str> = nodes.iter().map(String::as_str).collect();
        let mut sub = Self::new(
            nodes.iter().cloned(),
            self.roots
                .iter()
                .filter(|r| keep.contains(r.as_str()))
                .cloned()
                .collect(),
        );
        for edge in self.edges() {
            if keep.contains(edge.source.as_str()) && keep.contains(edge.target.as_str()) {
                sub.add_edge(&edge.source, &edge.target, edge.weight)?;
            }
        }
        Ok(sub)
    }

    /// Nodes ordered parents-first
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let order = toposort(&self.graph, None)
            .map_err(|_| Error::structural("structure contains a cycle"))?;
        Ok(order.into_iter().map(|i| self.graph[i].clone()).collect())
    }

    /// Verify acyclicity and that no root has a predecessor
    pub fn validate(&self) -> Result<()> {
        if is_cyclic_directed(&self.graph) {
            return Err(Error::structural("structure contains a cycle"));
        }
        for root in self.roots() {
            if let Some(parent) = self.parents(root).first() {
                return Err(Error::structural(format!(
                    "service-status node '{}' has parent '{}'",
                    root, parent
                )));
            }
        }
        Ok(())
    }

    /// Graphviz rendering with nodes coloured by category
    pub fn to_dot(&self, classifier: &ColumnClassifier) -> String {
        let mut dot = String::from("digraph structure {\n    rankdir=LR;\n    node [style=filled];\n");
        for node in self.nodes() {
            let _ = writeln!(
                dot,
                "    \"{}\" [fillcolor=\"{}\"];",
                node,
                category_color(classifier.category(node))
            );
        }
        for edge in self.edges() {
            let _ = writeln!(
                dot,
                "    \"{}\" -> \"{}\" [label=\"{:.2}\"];",
                edge.source, edge.target, edge.weight
            );
        }
        dot.push_str("}\n");
        dot
    }
}

fn category_color(category: MetricCategory) -> &'static str {
    match category {
        MetricCategory::ServiceStatus => "#e41a1c",
        MetricCategory::Latency => "#377eb8",
        MetricCategory::Cpu => "#ff7f00",
        MetricCategory::Memory => "#4daf4a",
        MetricCategory::Availability => "#984ea3",
        MetricCategory::Error => "#f781bf",
        MetricCategory::Timestamp | MetricCategory::Other => "#999999",
    }
}

impl From<StructureModel> for StructureSnapshot {
    fn from(model: StructureModel) -> Self {
        Self {
            nodes: model.nodes().into_iter().map(str::to_string).collect(),
            roots: model.roots.iter().cloned().collect(),
            edges: model.edges(),
        }
    }
}

impl TryFrom<StructureSnapshot> for StructureModel {
    type Error = Error;

    fn try_from(snapshot: StructureSnapshot) -> Result<Self> {
        let mut model = Self::new(snapshot.nodes, snapshot.roots.into_iter().collect());
        for edge in snapshot.edges {
            model.add_edge(&edge.source, &edge.target, edge.weight)?;
        }
        Ok(model)
    }
}
