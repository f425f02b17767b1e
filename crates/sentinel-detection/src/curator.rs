//! Column curation for training matrices and inference rows.
//!
//! Every removal is recorded in a [`CuratedColumns`] value that travels with
//! the trained model, so a single observation can be pruned exactly like the
//! training matrix was.

use crate::stats;
use rca_sentinel_core::{
    config::{DiscretizationConfig, TrainingConfig},
    frame::{DiscreteFrame, MetricFrame},
    types::{ColumnClassifier, MetricCategory},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info};

/// Why a column was curated out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// Name starts with a skipped metric prefix
    SkippedMetric,
    /// Name mentions a skipped service
    SkippedService,
    /// Infrastructure sidecar noise
    InfraNoise,
    /// Ground-truth window mostly empty
    MissingGroundTruth,
    /// One distinct value over the training window
    SingleValue,
    /// Mixture fit failed
    ClusteringFailed,
    /// Dominated by its median state
    SmallEffect,
    /// Ground-truth window not dominated by its median state
    Unstable,
    /// Neither a metric nor a service-status column
    Unclassified,
}

impl RemovalReason {
    /// Get the reason as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            RemovalReason::SkippedMetric => "skipped_metric",
            RemovalReason::SkippedService => "skipped_service",
            RemovalReason::InfraNoise => "infra_noise",
            RemovalReason::MissingGroundTruth => "missing_ground_truth",
            RemovalReason::SingleValue => "single_value",
            RemovalReason::ClusteringFailed => "clustering_failed",
            RemovalReason::SmallEffect => "small_effect",
            RemovalReason::Unstable => "unstable",
            RemovalReason::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only set of curated-out columns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CuratedColumns {
    removed: BTreeMap<String, RemovalReason>,
}

impl CuratedColumns {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a removal; the first recorded reason is kept
    pub fn remove(&mut self, column: &str, reason: RemovalReason) {
        self.removed.entry(column.to_string()).or_insert(reason);
    }

    /// Check whether a column was curated out
    pub fn contains(&self, column: &str) -> bool {
        self.removed.contains_key(column)
    }

    /// Reason a column was curated out
    pub fn reason(&self, column: &str) -> Option<RemovalReason> {
        self.removed.get(column).copied()
    }

    /// Number of curated-out columns
    pub fn len(&self) -> usize {
        self.removed.len()
    }

    /// True when nothing was removed
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }

    /// Iterate over `(column, reason)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, RemovalReason)> {
        self.removed.iter().map(|(c, r)| (c.as_str(), *r))
    }

    /// Drop curated-out columns from an inference row
    pub fn prune_row<V>(&self, row: &mut BTreeMap<String, V>) -> Vec<String> {
        let dropped: Vec<String> = row
            .keys()
            .filter(|c| self.contains(c))
            .cloned()
            .collect();
        for column in &dropped {
            row.remove(column);
        }
        if !dropped.is_empty() {
            debug!(columns = ?dropped, "Dropped previously curated columns");
        }
        dropped
    }
}

/// Filters and repairs training matrices
#[derive(Debug, Clone)]
pub struct ColumnCurator {
    classifier: ColumnClassifier,
    fault_services: Vec<String>,
    services_skipped: Vec<String>,
    experiments_skipped: BTreeMap<String, u32>,
    metrics_skipped: Vec<String>,
    ground_truth_size: usize,
    discretization: DiscretizationConfig,
}

impl ColumnCurator {
    /// Create a curator
    pub fn new(training: &TrainingConfig, discretization: &DiscretizationConfig) -> Self {
        Self {
            classifier: training.classifier(),
            fault_services: training.normalized_fault_services(),
            services_skipped: training.normalized_services_skipped(),
            experiments_skipped: training.experiments_skipped.clone(),
            metrics_skipped: training.metrics_skipped.clone(),
            ground_truth_size: training.number_of_initial_steps,
            discretization: discretization.clone(),
        }
    }

    /// Classifier the curator was built with
    pub fn classifier(&self) -> &ColumnClassifier {
        &self.classifier
    }

    /// Remove rows touched by skipped services or skipped experiments, then
    /// columns matching skip rules or infrastructure noise
    pub fn filter_data(&self, frame: &mut MetricFrame, curated: &mut CuratedColumns) {
        let mut drop_rows = vec![false; frame.n_rows()];
        for service in &self.services_skipped {
            if let Some(values) = frame.column(service) {
                for (row, value) in values.iter().enumerate() {
                    if value.map_or(false, |v| v != 0.0) {
                        drop_rows[row] = true;
                    }
                }
            }
        }
        for (experiment, code) in &self.experiments_skipped {
            for service in &self.fault_services {
                if let Some(values) = frame.column(service) {
                    for (row, value) in values.iter().enumerate() {
                        if *value == Some(f64::from(*code)) {
                            debug!(row, experiment = %experiment, service = %service, "Row runs a skipped experiment");
                            drop_rows[row] = true;
                        }
                    }
                }
            }
        }
        let removed_rows = drop_rows.iter().filter(|d| **d).count();
        if removed_rows > 0 {
            let keep: Vec<bool> = drop_rows.iter().map(|d| !d).collect();
            frame.retain_rows(&keep);
            info!(rows = removed_rows, "Removed rows of skipped services and experiments");
        }

        let mut removed = Vec::new();
        for column in frame.columns().to_vec() {
            let reason = if self
                .metrics_skipped
                .iter()
                .any(|prefix| column.starts_with(prefix.as_str()))
            {
                Some(RemovalReason::SkippedMetric)
            } else if self
                .services_skipped
                .iter()
                .any(|service| column.contains(service.as_str()))
            {
                Some(RemovalReason::SkippedService)
            } else if !self.discretization.infra_noise.is_empty()
                && column.contains(&self.discretization.infra_noise)
            {
                Some(RemovalReason::InfraNoise)
            } else if self.classifier.category(&column) == MetricCategory::Other {
                Some(RemovalReason::Unclassified)
            } else {
                None
            };
            if let Some(reason) = reason {
                frame.remove_column(&column);
                curated.remove(&column, reason);
                removed.push(column);
            }
        }
        if !removed.is_empty() {
            info!(columns = ?removed, "Removed columns because of skip configuration");
        }
    }

    /// Fill metric gaps with the ground-truth mean and return those means.
    /// Columns whose ground-truth window is mostly empty are dropped;
    /// service-status gaps mean "no fault".
    pub fn fill_gaps(
        &self,
        frame: &mut MetricFrame,
        curated: &mut CuratedColumns,
    ) -> BTreeMap<String, f64> {
        let window = self.ground_truth_size.min(frame.n_rows());
        let mut means = BTreeMap::new();
        for column in frame.columns().to_vec() {
            let Some(values) = frame.column_mut(&column) else {
                continue;
            };
            if self.classifier.is_service_status(&column) {
                values.iter_mut().for_each(|v| *v = Some(v.unwrap_or(0.0)));
                continue;
            }
            let ground_truth: Vec<f64> = values[..window].iter().flatten().copied().collect();
            let missing_in_window = window - ground_truth.len();
            if missing_in_window as f64 > self.ground_truth_size as f64 * self.discretization.max_missing_ratio {
                let missing_total = values.iter().filter(|v| v.is_none()).count();
                info!(
                    column = %column,
                    missing_in_window,
                    missing_total,
                    "Removing column with mostly empty ground truth"
                );
                frame.remove_column(&column);
                curated.remove(&column, RemovalReason::MissingGroundTruth);
                continue;
            }
            let mean = stats::mean(&ground_truth).unwrap_or(0.0);
            let filled = values.iter().filter(|v| v.is_none()).count();
            values.iter_mut().for_each(|v| *v = Some(v.unwrap_or(mean)));
            if filled > 0 {
                debug!(column = %column, filled, mean, "Filled empty cells with ground-truth mean");
            }
            means.insert(column, mean);
        }
        means
    }

    /// Drop columns holding one distinct value
    pub fn remove_single_value_columns(&self, frame: &mut MetricFrame, curated: &mut CuratedColumns) {
        let constant: Vec<String> = frame
            .iter_columns()
            .filter(|(_, values)| {
                let present: Vec<f64> = values.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
                stats::distinct_count(&present) <= 1
            })
            .map(|(name, _)| name.to_string())
            .collect();
        for column in &constant {
            frame.remove_column(column);
            curated.remove(column, RemovalReason::SingleValue);
        }
        if !constant.is_empty() {
            info!(columns = ?constant, "Removed columns with a single value");
        }
    }

    /// Drop state columns holding one distinct state
    pub fn remove_single_state_columns(
        &self,
        states: &mut DiscreteFrame,
        curated: &mut CuratedColumns,
    ) {
        let constant: Vec<String> = states
            .iter_columns()
            .filter(|(_, s)| s.iter().collect::<BTreeSet<_>>().len() <= 1)
            .map(|(name, _)| name.to_string())
            .collect();
        for column in &constant {
            states.remove_column(column);
            curated.remove(column, RemovalReason::SingleValue);
        }
        if !constant.is_empty() {
            info!(columns = ?constant, "Removed columns with a single state");
        }
    }

    /// Drop metric columns whose states are almost all the median state
    pub fn remove_small_effect(&self, states: &mut DiscreteFrame, curated: &mut CuratedColumns) {
        let threshold = self.discretization.small_effect_ratio;
        self.remove_by_median_share(states, curated, RemovalReason::SmallEffect, |s| {
            let share = stats::median_state_share(s);
            (share > threshold).then_some(share)
        });
    }

    /// Drop metric columns whose ground-truth window flips between states
    pub fn remove_unstable(&self, states: &mut DiscreteFrame, curated: &mut CuratedColumns) {
        let threshold = self.discretization.unstable_ratio;
        let window = self.ground_truth_size;
        self.remove_by_median_share(states, curated, RemovalReason::Unstable, |s| {
            let share = stats::median_state_share(&s[..window.min(s.len())]);
            (share < threshold).then_some(share)
        });
    }

    fn remove_by_median_share<F>(
        &self,
        states: &mut DiscreteFrame,
        curated: &mut CuratedColumns,
        reason: RemovalReason,
        verdict: F,
    ) where
        F: Fn(&[u32]) -> Option<f64>,
    {
        let flagged: Vec<(String, f64)> = states
            .iter_columns()
            .filter(|(name, _)| self.classifier.category(name).is_metric())
            .filter_map(|(name, s)| verdict(s).map(|share| (name.to_string(), share)))
            .collect();
        for (column, share) in flagged {
            info!(column = %column, median_ratio = share, reason = %reason, "Removing metric");
            states.remove_column(&column);
            curated.remove(&column, reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curator(initial_steps: usize) -> ColumnCurator {
        let training = TrainingConfig {
            services_for_fault_injection: vec!["edgex-core-data".into()],
            services_skipped: vec!["edgex-ui".into()],
            experiments_skipped: [("cpu".to_string(), 2)].into_iter().collect(),
            metrics_skipped: vec!["error".into()],
            number_of_initial_steps: initial_steps,
            ..Default::default()
        };
        ColumnCurator::new(&training, &DiscretizationConfig::default())
    }

    fn column(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().copied().map(Some).collect()
    }

    #[test]
    fn test_filter_rows_and_columns() {
        let mut frame = MetricFrame::new(vec![
            ("edgex_core_data".into(), column(&[0.0, 1.0, 2.0, 0.0])),
            ("edgex_ui".into(), column(&[0.0, 0.0, 0.0, 1.0])),
            ("latency_edgex_ui_edgex_core_data".into(), column(&[0.1, 0.2, 0.3, 0.4])),
            ("error_edgex_core_data".into(), column(&[0.0, 0.0, 0.1, 0.0])),
            ("cpu_istio_init_x".into(), column(&[0.1, 0.1, 0.1, 0.1])),
            ("cpu_edgex_core_data".into(), column(&[0.1, 0.5, 0.9, 0.2])),
            ("build_info".into(), column(&[1.0, 1.0, 1.0, 1.0])),
        ])
        .unwrap();
        let mut curated = CuratedColumns::new();
        curator(2).filter_data(&mut frame, &mut curated);

        // row 2 runs the cpu experiment, row 3 touches the skipped service
        assert_eq!(frame.n_rows(), 2);
        assert_eq!(frame.columns(), &["edgex_core_data", "cpu_edgex_core_data"]);
        assert_eq!(curated.reason("edgex_ui"), Some(RemovalReason::SkippedService));
        assert_eq!(
            curated.reason("latency_edgex_ui_edgex_core_data"),
            Some(RemovalReason::SkippedService)
        );
        assert_eq!(curated.reason("error_edgex_core_data"), Some(RemovalReason::SkippedMetric));
        assert_eq!(curated.reason("cpu_istio_init_x"), Some(RemovalReason::InfraNoise));
        assert_eq!(curated.reason("build_info"), Some(RemovalReason::Unclassified));
    }

    #[test]
    fn test_fill_gaps_uses_ground_truth_mean() {
        let mut frame = MetricFrame::new(vec![
            ("cpu_a".into(), vec![Some(1.0), Some(3.0), None, Some(9.0), None]),
            ("memory_b".into(), vec![None, None, None, Some(1.0), Some(1.0)]),
            ("edgex_core_data".into(), vec![Some(0.0), None, Some(1.0), None, None]),
        ])
        .unwrap();
        let mut curated = CuratedColumns::new();
        let means = curator(3).fill_gaps(&mut frame, &mut curated);

        assert_eq!(means["cpu_a"], 2.0);
        assert_eq!(
            frame.column("cpu_a").unwrap(),
            &[Some(1.0), Some(3.0), Some(2.0), Some(9.0), Some(2.0)]
        );
        assert!(!frame.contains("memory_b"));
        assert_eq!(curated.reason("memory_b"), Some(RemovalReason::MissingGroundTruth));
        assert_eq!(
            frame.column("edgex_core_data").unwrap(),
            &[Some(0.0), Some(0.0), Some(1.0), Some(0.0), Some(0.0)]
        );
    }

    #[test]
    fn test_small_effect_and_unstable() {
        let mut dominated = vec![0u32; 100];
        dominated[50] = 1;
        let mut noisy = vec![0u32; 100];
        for i in (0..10).step_by(2) {
            noisy[i] = 1;
        }
        noisy[70] = 2;
        let mut healthy = vec![0u32; 100];
        healthy[60..70].iter_mut().for_each(|s| *s = 1);

        let mut states = DiscreteFrame::new(vec![
            ("cpu_dominated".into(), dominated),
            ("cpu_noisy".into(), noisy),
            ("latency_healthy".into(), healthy),
            ("edgex_core_data".into(), vec![0; 100]),
        ])
        .unwrap();
        let mut curated = CuratedColumns::new();
        let curator = curator(10);
        curator.remove_small_effect(&mut states, &mut curated);
        curator.remove_unstable(&mut states, &mut curated);

        assert_eq!(curated.reason("cpu_dominated"), Some(RemovalReason::SmallEffect));
        assert_eq!(curated.reason("cpu_noisy"), Some(RemovalReason::Unstable));
        assert!(states.contains("latency_healthy"));
        // status columns are never judged by these rules
        assert!(states.contains("edgex_core_data"));

        curator.remove_single_state_columns(&mut states, &mut curated);
        assert!(!states.contains("edgex_core_data"));
    }

    #[test]
    fn test_curated_set_is_append_only_and_prunes_rows() {
        let mut curated = CuratedColumns::new();
        curated.remove("cpu_a", RemovalReason::SingleValue);
        curated.remove("cpu_a", RemovalReason::SmallEffect);
        assert_eq!(curated.reason("cpu_a"), Some(RemovalReason::SingleValue));

        let mut row: BTreeMap<String, Option<f64>> =
            [("cpu_a".to_string(), Some(1.0)), ("cpu_b".to_string(), None)]
                .into_iter()
                .collect();
        let dropped = curated.prune_row(&mut row);
        assert_eq!(dropped, vec!["cpu_a".to_string()]);
        assert!(row.contains_key("cpu_b"));
    }
}
