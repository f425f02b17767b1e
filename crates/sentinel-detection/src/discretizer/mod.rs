//! Metric discretization.
//!
//! Each metric column is normalised, clustered with a Gaussian mixture and
//! relabelled into ordinal states where 0 is the normal state. Fitted models
//! are frozen and reused unchanged at inference time.

mod mixture;

pub use mixture::{GaussianMixture, MixtureError, MixtureParams};

use crate::curator::{CuratedColumns, RemovalReason};
use crate::stats;
use rca_sentinel_core::{
    config::DiscretizationConfig,
    frame::{DiscreteFrame, MetricFrame},
    types::{ColumnClassifier, MetricCategory},
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Frozen discretization of one metric column
#[derive(Debug, Serialize, Deserialize)]
pub struct DiscretizationModel {
    /// Column name
    pub column: String,
    /// Category the ordering policy was chosen from
    pub category: MetricCategory,
    /// Divisor applied before clustering
    pub normalization_factor: f64,
    /// Spread of the normalised series
    pub bandwidth: f64,
    /// Ground-truth mean used to fill missing readings
    pub baseline_mean: f64,
    mixture: GaussianMixture,
    /// Ordinal state of each mixture component
    state_map: Vec<u32>,
}

impl DiscretizationModel {
    /// Number of ordinal states
    pub fn n_states(&self) -> usize {
        self.state_map.iter().collect::<BTreeSet<_>>().len()
    }

    /// Ordinal state of one raw reading
    pub fn state_of(&self, raw: f64) -> u32 {
        let cluster = self.mixture.predict(raw / self.normalization_factor);
        self.state_map[cluster]
    }

    /// Ordinal states of a raw series; missing readings take the baseline mean
    pub fn apply(&self, series: &[Option<f64>]) -> Vec<u32> {
        series
            .iter()
            .map(|v| self.state_of(v.unwrap_or(self.baseline_mean)))
            .collect()
    }
}

/// Fits [`DiscretizationModel`]s
#[derive(Debug, Clone)]
pub struct MetricDiscretizer {
    config: DiscretizationConfig,
}

impl MetricDiscretizer {
    /// Create a discretizer
    pub fn new(config: DiscretizationConfig) -> Self {
        Self { config }
    }

    /// Fit a model to a complete series and return it with the training states
    pub fn fit(
        &self,
        column: &str,
        category: MetricCategory,
        series: &[f64],
        baseline_mean: f64,
    ) -> Result<(DiscretizationModel, Vec<u32>)> {
        if series.is_empty() {
            return Err(Error::data_quality(column, "empty series"));
        }
        let (normalization_factor, bandwidth) = self.normalization(series);
        let normalized: Vec<f64> = series.iter().map(|v| v / normalization_factor).collect();

        let mut n_components = self.config.initial_components;
        let mut mixture = None;
        for attempt in 0..=self.config.max_refits {
            let params = MixtureParams {
                n_components,
                max_iterations: self.config.max_em_iterations,
                tolerance: self.config.tolerance,
                bandwidth,
            };
            let fitted = match GaussianMixture::fit(&normalized, params) {
                Ok(fitted) => fitted,
                Err(MixtureError::Fit(reason)) if n_components > 1 => {
                    debug!(
                        column = %column,
                        attempt,
                        requested = n_components,
                        reason = %reason,
                        "Mixture fit failed, requesting fewer components"
                    );
                    n_components -= 1;
                    continue;
                }
                Err(e) => return Err(Error::nonconvergence(column, e.to_string())),
            };
            let clusters = fitted.predict_all(&normalized);
            let occupied = occupied_components(&clusters).len();
            let stable = occupied == fitted.n_components();
            debug!(
                column = %column,
                attempt,
                requested = fitted.n_components(),
                occupied,
                "Mixture fitted"
            );
            n_components = occupied;
            mixture = Some((fitted, clusters));
            if stable {
                break;
            }
        }
        let (mixture, clusters) =
            mixture.ok_or_else(|| Error::nonconvergence(column, "no mixture fitted"))?;

        let state_map = self.state_map(category, series, &clusters, &mixture);
        let states: Vec<u32> = clusters.iter().map(|c| state_map[*c]).collect();
        log_clusters(column, series, &states);

        let model = DiscretizationModel {
            column: column.to_string(),
            category,
            normalization_factor,
            bandwidth,
            baseline_mean,
            mixture,
            state_map,
        };
        Ok((model, states))
    }

    /// Unit-scaled series keep factor 1; others are divided by their mean
    fn normalization(&self, series: &[f64]) -> (f64, f64) {
        let unit_scaled = series.iter().all(|v| (0.0..=1.0).contains(v));
        let mean = stats::mean(series).unwrap_or(0.0);
        if unit_scaled || mean == 0.0 || !mean.is_finite() {
            return (1.0, self.config.default_bandwidth);
        }
        let normalized: Vec<f64> = series.iter().map(|v| v / mean).collect();
        let spread = stats::std_dev(&normalized).unwrap_or(0.0);
        let bandwidth = if spread > 0.0 {
            spread
        } else {
            self.config.default_bandwidth
        };
        (mean, bandwidth)
    }

    /// Order clusters by the first raw reading assigned to them. Components
    /// that received no training reading share the state of the occupied
    /// component with the nearest mean.
    fn state_map(
        &self,
        category: MetricCategory,
        series: &[f64],
        clusters: &[usize],
        mixture: &GaussianMixture,
    ) -> Vec<u32> {
        let n_clusters = mixture.n_components();
        let mut first_value: Vec<Option<f64>> = vec![None; n_clusters];
        for (value, cluster) in series.iter().zip(clusters) {
            if first_value[*cluster].is_none() {
                first_value[*cluster] = Some(*value);
            }
        }
        let mut order: Vec<usize> = (0..n_clusters)
            .filter(|c| first_value[*c].is_some())
            .collect();
        order.sort_by(|a, b| {
            let a = first_value[*a].unwrap_or(f64::INFINITY);
            let b = first_value[*b].unwrap_or(f64::INFINITY);
            a.total_cmp(&b)
        });
        if self.config.is_reversed(category) {
            order.reverse();
        }
        let mut state_map = vec![0u32; n_clusters];
        for (rank, cluster) in order.iter().enumerate() {
            state_map[*cluster] = rank as u32;
        }

        let means = mixture.means();
        for cluster in (0..n_clusters).filter(|c| first_value[*c].is_none()) {
            let distance = |other: usize| (means[other] - means[cluster]).abs();
            if let Some(nearest) = order
                .iter()
                .copied()
                .min_by(|a, b| distance(*a).total_cmp(&distance(*b)))
            {
                state_map[cluster] = state_map[nearest];
            }
        }
        state_map
    }
}

fn occupied_components(labels: &[usize]) -> Vec<usize> {
    labels
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn log_clusters(column: &str, series: &[f64], states: &[u32]) {
    let mut by_state: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    for (value, state) in series.iter().zip(states) {
        by_state.entry(*state).or_default().push(*value);
    }
    for (state, values) in by_state {
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut histogram: BTreeMap<String, usize> = BTreeMap::new();
        for v in &values {
            *histogram.entry(format!("{:.2}", v)).or_default() += 1;
        }
        debug!(
            column = %column,
            "{}<{}>:({:.3}-{:.3}) {:?}",
            state,
            values.len(),
            min,
            max,
            histogram
        );
    }
}

/// Result of discretizing one inference-time row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Every column had a model
    States(BTreeMap<String, u32>),
    /// A column without a trained model was present
    UnseenMetric(String),
}

/// Frozen models for every discretized column
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DiscretizerSet {
    models: BTreeMap<String, DiscretizationModel>,
}

impl DiscretizerSet {
    /// Fit every metric column of a gap-free frame. Columns whose fit fails
    /// are recorded as curated out instead of failing the whole set.
    pub fn fit_frame(
        discretizer: &MetricDiscretizer,
        frame: &MetricFrame,
        classifier: &ColumnClassifier,
        baseline_means: &BTreeMap<String, f64>,
        curated: &mut CuratedColumns,
    ) -> Result<(Self, DiscreteFrame)> {
        let mut set = Self::default();
        let mut states = DiscreteFrame::with_rows(frame.n_rows());
        for (column, values) in frame.iter_columns() {
            let category = classifier.category(column);
            if !category.is_metric() {
                continue;
            }
            let series: Vec<f64> = values.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
            let baseline = baseline_means.get(column).copied().unwrap_or(0.0);
            match discretizer.fit(column, category, &series, baseline) {
                Ok((model, column_states)) => {
                    states.insert_column(column, column_states)?;
                    set.models.insert(column.to_string(), model);
                }
                Err(e) if e.is_column_local() => {
                    warn!(column = %column, error = %e, "Dropping column that could not be discretized");
                    curated.remove(column, RemovalReason::ClusteringFailed);
                }
                Err(e) => return Err(e),
            }
        }
        info!(models = set.len(), "Discretization models fitted");
        Ok((set, states))
    }

    /// Model of a column
    pub fn get(&self, column: &str) -> Option<&DiscretizationModel> {
        self.models.get(column)
    }

    /// Check whether a column has a model
    pub fn contains(&self, column: &str) -> bool {
        self.models.contains_key(column)
    }

    /// Drop a column's model
    pub fn remove(&mut self, column: &str) -> Option<DiscretizationModel> {
        self.models.remove(column)
    }

    /// Number of models
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// True when no model is stored
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Columns with a model
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Discretize one row of metric readings
    pub fn apply_observation(&self, values: &BTreeMap<String, Option<f64>>) -> ApplyOutcome {
        let mut states = BTreeMap::new();
        for (column, value) in values {
            let Some(model) = self.models.get(column) else {
                return ApplyOutcome::UnseenMetric(column.clone());
            };
            states.insert(
                column.clone(),
                model.state_of(value.unwrap_or(model.baseline_mean)),
            );
        }
        ApplyOutcome::States(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discretizer() -> MetricDiscretizer {
        MetricDiscretizer::new(DiscretizationConfig::default())
    }

    fn latency_series() -> Vec<f64> {
        let mut series: Vec<f64> = (0..40).map(|i| 0.10 + (i % 4) as f64 * 0.005).collect();
        series.extend([0.62, 0.65, 0.61, 0.64, 0.63]);
        series.extend((0..5).map(|i| 0.11 + i as f64 * 0.002));
        series
    }

    #[test]
    fn test_apply_reproduces_training_states() {
        let series = latency_series();
        let (model, states) = discretizer()
            .fit("latency_a_b", MetricCategory::Latency, &series, 0.1)
            .unwrap();
        let raw: Vec<Option<f64>> = series.iter().copied().map(Some).collect();
        assert_eq!(model.apply(&raw), states);
    }

    #[test]
    fn test_state_zero_is_lowest_for_latency() {
        let series = latency_series();
        let (model, states) = discretizer()
            .fit("latency_a_b", MetricCategory::Latency, &series, 0.1)
            .unwrap();
        assert!(model.n_states() >= 2);
        assert_eq!(states[0], 0);
        assert!(states[40] > 0);
    }

    #[test]
    fn test_ordering_follows_values_not_encounter_order() {
        let mut series = vec![0.9, 0.92, 0.91];
        series.extend((0..40).map(|i| 0.1 + (i % 5) as f64 * 0.002));
        let (_, states) = discretizer()
            .fit("latency_a_b", MetricCategory::Latency, &series, 0.1)
            .unwrap();
        assert_eq!(states[3], 0);
        assert!(states[0] > states[3]);
    }

    #[test]
    fn test_state_zero_is_highest_for_availability() {
        let mut series = vec![1.0; 40];
        series.extend([0.2, 0.25, 0.2, 0.22]);
        series.extend(vec![1.0; 6]);
        let (_, states) = discretizer()
            .fit("availability_a", MetricCategory::Availability, &series, 1.0)
            .unwrap();
        assert_eq!(states[0], 0);
        assert!(states[40] > 0);
    }

    #[test]
    fn test_large_scale_series_is_normalized_by_mean() {
        let mut series = vec![200.0; 30];
        series.extend([900.0, 950.0, 920.0]);
        series.extend(vec![210.0; 7]);
        let (model, states) = discretizer()
            .fit("memory_a", MetricCategory::Memory, &series, 200.0)
            .unwrap();
        let mean = stats::mean(&series).unwrap();
        assert!((model.normalization_factor - mean).abs() < 1e-9);
        assert!(states[30] > states[0]);
    }

    #[test]
    fn test_every_reading_maps_to_a_trained_state() {
        let series = latency_series();
        let (model, states) = discretizer()
            .fit("latency_a_b", MetricCategory::Latency, &series, 0.1)
            .unwrap();
        let trained: BTreeSet<u32> = states.into_iter().collect();
        for step in 0..200 {
            let reading = step as f64 * 0.01;
            assert!(trained.contains(&model.state_of(reading)));
        }
    }

    #[test]
    fn test_constant_series_collapses_to_single_state() {
        let series = vec![0.3; 25];
        let (model, states) = discretizer()
            .fit("cpu_a", MetricCategory::Cpu, &series, 0.3)
            .unwrap();
        assert_eq!(model.n_states(), 1);
        assert!(states.iter().all(|s| *s == 0));
    }

    #[test]
    fn test_non_finite_series_is_column_local_failure() {
        let err = discretizer()
            .fit("cpu_a", MetricCategory::Cpu, &[0.1, f64::NAN], 0.0)
            .unwrap_err();
        assert!(err.is_column_local());
    }

    #[test]
    fn test_apply_observation_signals_unseen_metric() {
        let series = latency_series();
        let (model, _) = discretizer()
            .fit("latency_a_b", MetricCategory::Latency, &series, 0.1)
            .unwrap();
        let mut set = DiscretizerSet::default();
        set.models.insert("latency_a_b".into(), model);

        let mut row = BTreeMap::new();
        row.insert("latency_a_b".to_string(), None);
        match set.apply_observation(&row) {
            ApplyOutcome::States(states) => assert_eq!(states["latency_a_b"], 0),
            other => panic!("unexpected outcome {:?}", other),
        }

        row.insert("latency_new_metric".to_string(), Some(0.5));
        assert_eq!(
            set.apply_observation(&row),
            ApplyOutcome::UnseenMetric("latency_new_metric".to_string())
        );
    }
}
