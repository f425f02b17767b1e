//! Evaluation result over a set of replay records.

use crate::kpi::{KpiReport, Spread, SweepPoint, ALL};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregated KPIs for every replay record found in a results folder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Dataset tags of the evaluated records
    pub datasets: Vec<String>,

    /// When the evaluation ran
    pub generated_at: DateTime<Utc>,

    /// Replayed rows across all datasets
    pub total_rows: usize,

    /// Rows with an injected fault
    pub incident_rows: usize,

    /// Threshold applied to each chunk of the overall evaluation
    pub thresholds: Vec<f64>,

    /// KPIs over all rows
    pub overall: KpiReport,

    /// KPIs per injected fault type, keyed by fault name
    pub by_fault: BTreeMap<String, KpiReport>,

    /// Missed incidents over incident rows
    pub miss_ratio: f64,

    /// Time from observation to ranking
    pub rca_time: Spread,

    /// Time spent training each dataset's model
    pub training_time: Spread,

    /// Accuracy and MRR across fixed thresholds
    pub sweep: Vec<SweepPoint>,
}

impl EvaluationResult {
    /// Overall accuracy, if any rows were evaluated
    pub fn accuracy(&self) -> Option<f64> {
        self.overall.accuracy.get(ALL).copied()
    }

    /// Overall mean reciprocal rank
    pub fn mrr(&self) -> Option<f64> {
        self.overall.mrr.get(ALL).copied()
    }

    /// Convert the result to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Create an EvaluationResult from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl std::fmt::Display for EvaluationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EvaluationResult {{ datasets: {}, rows: {}, incidents: {}, accuracy: {:.3}, mrr: {:.3}, generated_at: {} }}",
            self.datasets.len(),
            self.total_rows,
            self.incident_rows,
            self.accuracy().unwrap_or(0.0),
            self.mrr().unwrap_or(0.0),
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        )
    }
}
