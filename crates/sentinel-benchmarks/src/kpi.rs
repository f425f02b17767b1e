//! Detection and ranking KPIs over replayed check results.
//!
//! A row counts as an incident when its `actual_results` is non-empty. A
//! prediction is flagged when its probability reaches the decision
//! threshold; flagged services keep the ranking order of the row.

use rand::seq::index;
use rand::Rng;
use rca_sentinel_core::events::{CheckResult, Prediction, ReplayRecord};
use rca_sentinel_core::types::FaultType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Threshold used when none has been calibrated
pub const DECISION_THRESHOLD: f64 = 0.184;

/// Cut-offs reported as HR@k
pub const PRECISION_LEVELS: [usize; 4] = [1, 2, 3, 4];

/// Key holding the aggregate over every service
pub const ALL: &str = "All";

/// Key for incidents with more than one faulty service
pub const MULTIPLE: &str = "Multiple";

/// Number of chunks used for cross-calibrated thresholds
const CHUNKS: usize = 5;

/// Binary detection quality at one threshold
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MlMetrics {
    pub accuracy: f64,
    pub recall: f64,
    pub fpr: f64,
    pub fnr: f64,
    /// Threshold maximising correct decisions on the same rows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_threshold: Option<f64>,
}

/// Outcome of the threshold sweep
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdScore {
    pub threshold: f64,
    pub score: usize,
    pub true_positives: usize,
    pub true_negatives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

/// Per-service KPI tables. Every map carries an [`ALL`] entry once filled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiReport {
    pub accuracy: BTreeMap<String, f64>,
    pub recall: BTreeMap<String, f64>,
    pub fpr: BTreeMap<String, f64>,
    pub fnr: BTreeMap<String, f64>,
    pub fault_type_recall: BTreeMap<String, f64>,
    /// `HR@k` -> service -> hit rate
    pub hit_rate: BTreeMap<String, BTreeMap<String, f64>>,
    pub mrr: BTreeMap<String, f64>,
    /// Incidents with no flagged service or with more flagged services than faulty ones
    pub miss_counter: usize,
}

impl KpiReport {
    /// Fold the report of chunk `index` into a running mean
    pub fn absorb(&mut self, partial: KpiReport, index: usize) {
        if index == 0 {
            *self = partial;
            return;
        }
        running_mean(&mut self.accuracy, &partial.accuracy, index);
        running_mean(&mut self.recall, &partial.recall, index);
        running_mean(&mut self.fpr, &partial.fpr, index);
        running_mean(&mut self.fnr, &partial.fnr, index);
        running_mean(&mut self.fault_type_recall, &partial.fault_type_recall, index);
        running_mean(&mut self.mrr, &partial.mrr, index);
        for (level, rates) in &partial.hit_rate {
            running_mean(self.hit_rate.entry(level.clone()).or_default(), rates, index);
        }
        self.miss_counter += partial.miss_counter;
    }
}

fn running_mean(aggregate: &mut BTreeMap<String, f64>, values: &BTreeMap<String, f64>, index: usize) {
    let weight = index as f64;
    for (key, value) in values {
        let previous = aggregate.get(key).copied().unwrap_or(0.0);
        aggregate.insert(key.clone(), (weight * previous + value) / (weight + 1.0));
    }
}

/// Sample mean and standard deviation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Spread {
    pub mean: f64,
    pub std: f64,
    pub count: usize,
}

impl Spread {
    pub fn of(values: &[f64]) -> Self {
        let count = values.len();
        if count == 0 {
            return Self::default();
        }
        let mean = values.iter().sum::<f64>() / count as f64;
        let std = if count < 2 {
            0.0
        } else {
            let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (count - 1) as f64).sqrt()
        };
        Self { mean, std, count }
    }
}

/// Accuracy and MRR at one threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    pub threshold: f64,
    pub accuracy: f64,
    pub mrr: f64,
}

fn flagged(result: &CheckResult, threshold: f64) -> Vec<&str> {
    result
        .predictions
        .iter()
        .filter(|p| p.probability >= threshold)
        .map(|p| p.service_name.as_str())
        .collect()
}

/// Every faulty service sits within the first `limit` flagged services
fn within(actual: &BTreeMap<String, u32>, flagged: &[&str], limit: usize) -> bool {
    let head = &flagged[..flagged.len().min(limit)];
    actual.keys().all(|service| head.contains(&service.as_str()))
}

fn inverse_rank(actual: &BTreeMap<String, u32>, flagged: &[&str]) -> f64 {
    let mut sum = 0usize;
    for service in actual.keys() {
        match flagged.iter().position(|s| *s == service.as_str()) {
            Some(position) => sum += position + 1,
            None => return 0.0,
        }
    }
    let n = actual.len();
    n as f64 / (sum + 1 - n) as f64
}

fn fault_type_matches(prediction: &Prediction, code: u32) -> bool {
    if !prediction.fault_distribution.contains_key(&code) {
        warn!(
            service = %prediction.service_name,
            code,
            "Fault type missing from predicted states"
        );
        return false;
    }
    let top = prediction
        .fault_distribution
        .iter()
        .fold(None, |best: Option<(u32, f64)>, (state, mass)| match best {
            Some((_, best_mass)) if best_mass >= *mass => best,
            _ => Some((*state, *mass)),
        });
    top.map(|(state, _)| state) == Some(code)
}

fn mean_of<T: Copy + Into<f64>>(values: &[T]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|v| (*v).into()).sum::<f64>() / values.len() as f64
}

fn mean_bool(values: &[bool]) -> f64 {
    let ones: Vec<f64> = values.iter().map(|v| if *v { 1.0 } else { 0.0 }).collect();
    mean_of(&ones)
}

/// Accuracy, recall, FPR and FNR at `threshold`.
///
/// An incident is a true positive when all faulty services appear among the
/// first `faulty + 1` flagged services. Recall and FNR divide by the incident
/// count, FPR by the normal count, each clamped to at least one.
pub fn ml_metrics(results: &[CheckResult], threshold: f64, calculate_threshold: bool) -> MlMetrics {
    let (mut tp, mut tn, mut fp, mut fneg) = (0usize, 0usize, 0usize, 0usize);
    let mut incident_confidence = Vec::new();
    let mut normal_confidence = Vec::new();

    for result in results {
        let flagged = flagged(result, threshold);
        if result.is_actual_incident() {
            let actual = &result.actual_results;
            if within(actual, &flagged, actual.len() + 1) {
                tp += 1;
            } else {
                fneg += 1;
            }
            let confidence = result
                .predictions
                .iter()
                .filter(|p| actual.contains_key(&p.service_name))
                .map(|p| p.probability)
                .fold(None, |low: Option<f64>, p| Some(low.map_or(p, |l| l.min(p))))
                .unwrap_or(0.0);
            incident_confidence.push(confidence);
        } else {
            if flagged.is_empty() {
                tn += 1;
            } else {
                fp += 1;
            }
            let highest = result
                .predictions
                .iter()
                .map(|p| p.probability)
                .fold(0.0, f64::max);
            normal_confidence.push(highest);
        }
    }

    let incidents = (tp + fneg).max(1) as f64;
    let normals = (tn + fp).max(1) as f64;
    let accuracy = if results.is_empty() {
        0.0
    } else {
        (tp + tn) as f64 / results.len() as f64
    };
    let mut metrics = MlMetrics {
        accuracy,
        recall: tp as f64 / incidents,
        fpr: fp as f64 / normals,
        fnr: fneg as f64 / incidents,
        best_threshold: None,
    };
    debug!(
        threshold,
        accuracy = metrics.accuracy,
        recall = metrics.recall,
        "Computed detection metrics"
    );

    if calculate_threshold {
        let best = optimal_threshold(&incident_confidence, &normal_confidence);
        metrics.best_threshold = Some(best.threshold);
    }
    metrics
}

/// Sweep thresholds in steps of 0.001 over (0, 1) and keep the one with the
/// most correct decisions. Ties resolve to the later threshold.
pub fn optimal_threshold(incident_confidence: &[f64], normal_confidence: &[f64]) -> ThresholdScore {
    let score_at = |t: f64| {
        normal_confidence.iter().filter(|c| **c < t).count()
            + incident_confidence.iter().filter(|c| **c > t).count()
    };

    let mut best = (0.0, 0usize);
    for step in 1..1000u32 {
        let threshold = f64::from(step) / 1000.0;
        let score = score_at(threshold);
        if score >= best.1 {
            best = (threshold, score);
        }
    }

    let (threshold, score) = best;
    let true_positives = incident_confidence.iter().filter(|c| **c > threshold).count();
    let true_negatives = normal_confidence.iter().filter(|c| **c < threshold).count();
    let outcome = ThresholdScore {
        threshold,
        score,
        true_positives,
        true_negatives,
        false_positives: normal_confidence.len() - true_negatives,
        false_negatives: incident_confidence.len() - true_positives,
    };
    info!(
        threshold,
        score,
        true_positives = outcome.true_positives,
        true_negatives = outcome.true_negatives,
        false_positives = outcome.false_positives,
        false_negatives = outcome.false_negatives,
        "Selected decision threshold"
    );
    outcome
}

/// Mean reciprocal rank over all incidents at `threshold`
pub fn mean_reciprocal_rank(results: &[CheckResult], threshold: f64) -> f64 {
    let ranks: Vec<f64> = results
        .iter()
        .filter(|r| r.is_actual_incident())
        .map(|r| {
            let flagged = flagged(r, threshold);
            if flagged.is_empty() {
                0.0
            } else {
                inverse_rank(&r.actual_results, &flagged)
            }
        })
        .collect();
    mean_of(&ranks)
}

/// Full KPI report at `threshold`.
///
/// Hit rates and reciprocal ranks are taken over true positives and false
/// negatives, keyed by the faulty service (or [`MULTIPLE`]). Per-service
/// detection metrics use that service's incidents interleaved with a sample
/// of normal rows drawn from `rng`.
pub fn kpis<R: Rng + ?Sized>(results: &[CheckResult], threshold: f64, rng: &mut R) -> KpiReport {
    let mut miss_counter = 0usize;
    let mut hits: BTreeMap<usize, BTreeMap<String, Vec<bool>>> = BTreeMap::new();
    let mut inverse_ranks: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut fault_type_hits: BTreeMap<String, Vec<bool>> = BTreeMap::new();
    let mut all_fault_type_hits = Vec::new();

    for result in results {
        if !result.is_actual_incident() {
            continue;
        }
        let actual = &result.actual_results;
        let flagged = flagged(result, threshold);
        if flagged.is_empty() || actual.len() < flagged.len() {
            miss_counter += 1;
        }

        let key = match actual.keys().next() {
            Some(service) if actual.len() == 1 => service.clone(),
            _ => MULTIPLE.to_string(),
        };
        for level in PRECISION_LEVELS {
            hits.entry(level)
                .or_default()
                .entry(key.clone())
                .or_default()
                .push(within(actual, &flagged, level));
        }
        inverse_ranks
            .entry(key)
            .or_default()
            .push(inverse_rank(actual, &flagged));

        for service in actual.keys() {
            fault_type_hits.entry(service.clone()).or_default();
        }
        if flagged.is_empty() || !within(actual, &flagged, actual.len() + 1) {
            continue;
        }
        for prediction in &result.predictions {
            let Some(code) = actual.get(&prediction.service_name) else {
                continue;
            };
            let right = fault_type_matches(prediction, *code);
            if let Some(entries) = fault_type_hits.get_mut(&prediction.service_name) {
                entries.push(right);
            }
            all_fault_type_hits.push(right);
        }
    }

    let mut report = KpiReport {
        miss_counter,
        ..KpiReport::default()
    };
    for (level, per_service) in &hits {
        let rates = report.hit_rate.entry(format!("HR@{}", level)).or_default();
        for (service, values) in per_service {
            rates.insert(service.clone(), mean_bool(values));
        }
    }
    let mut all_ranks = Vec::new();
    for (service, values) in &inverse_ranks {
        report.mrr.insert(service.clone(), mean_of(values));
        all_ranks.extend_from_slice(values);
    }
    report.mrr.insert(ALL.to_string(), mean_of(&all_ranks));

    for (service, values) in &fault_type_hits {
        if !values.is_empty() {
            report.fault_type_recall.insert(service.clone(), mean_bool(values));
        }
    }
    report
        .fault_type_recall
        .insert(ALL.to_string(), mean_bool(&all_fault_type_hits));

    let overall = ml_metrics(results, threshold, false);
    insert_detection(&mut report, ALL, &overall);
    for service in fault_type_hits.keys() {
        let filtered = filter_by_service(results, service, rng);
        if filtered.is_empty() {
            continue;
        }
        let metrics = ml_metrics(&filtered, threshold, false);
        insert_detection(&mut report, service, &metrics);
    }
    report
}

fn insert_detection(report: &mut KpiReport, key: &str, metrics: &MlMetrics) {
    report.accuracy.insert(key.to_string(), metrics.accuracy);
    report.recall.insert(key.to_string(), metrics.recall);
    report.fpr.insert(key.to_string(), metrics.fpr);
    report.fnr.insert(key.to_string(), metrics.fnr);
}

/// Interleave incidents with normal rows, sampling the normal rows down to
/// the incident count when there are more of them. Surplus rows of either
/// kind go to the end.
pub fn interleave_no_incidents<R: Rng + ?Sized>(
    incidents: Vec<CheckResult>,
    normal: Vec<CheckResult>,
    rng: &mut R,
) -> Vec<CheckResult> {
    let normal = if incidents.len() < normal.len() {
        let mut pool: Vec<Option<CheckResult>> = normal.into_iter().map(Some).collect();
        index::sample(rng, pool.len(), incidents.len())
            .into_iter()
            .filter_map(|i| pool[i].take())
            .collect()
    } else {
        normal
    };

    let mut merged = Vec::with_capacity(incidents.len() + normal.len());
    let mut normal = normal.into_iter();
    let mut incidents = incidents.into_iter();
    loop {
        match (incidents.next(), normal.next()) {
            (None, None) => break,
            (incident, other) => merged.extend(incident.into_iter().chain(other)),
        }
    }
    merged
}

/// Incidents on `service` interleaved with normal rows
pub fn filter_by_service<R: Rng + ?Sized>(
    results: &[CheckResult],
    service: &str,
    rng: &mut R,
) -> Vec<CheckResult> {
    let incidents: Vec<CheckResult> = results
        .iter()
        .filter(|r| r.actual_results.contains_key(service))
        .cloned()
        .collect();
    let normal: Vec<CheckResult> = results
        .iter()
        .filter(|r| !r.is_actual_incident())
        .cloned()
        .collect();
    debug!(service, incidents = incidents.len(), "Filtered incidents by service");
    interleave_no_incidents(incidents, normal, rng)
}

/// Incidents of one fault type interleaved with normal rows.
/// [`FaultType::None`] selects the normal rows only.
pub fn filter_by_fault<R: Rng + ?Sized>(
    results: &[CheckResult],
    fault: FaultType,
    rng: &mut R,
) -> Vec<CheckResult> {
    let normal: Vec<CheckResult> = results
        .iter()
        .filter(|r| !r.is_actual_incident())
        .cloned()
        .collect();
    if fault == FaultType::None {
        return normal;
    }
    let incidents: Vec<CheckResult> = results
        .iter()
        .filter(|r| r.actual_results.values().next() == Some(&fault.code()))
        .cloned()
        .collect();
    info!(fault = %fault, incidents = incidents.len(), "Filtered incidents by fault type");
    interleave_no_incidents(incidents, normal, rng)
}

/// KPI report with thresholds calibrated across chunks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkedKpis {
    /// Threshold applied to each chunk
    pub thresholds: Vec<f64>,
    /// Running mean of the per-chunk reports
    pub report: KpiReport,
}

/// Split the rows into five chunks and score each one at a threshold
/// calibrated on the previous chunk (the first chunk uses the last).
/// Thresholds given in `thresholds` are reused instead of calibrating.
pub fn chunked_kpis<R: Rng + ?Sized>(
    results: &[CheckResult],
    thresholds: Option<&[f64]>,
    rng: &mut R,
) -> ChunkedKpis {
    if results.is_empty() {
        return ChunkedKpis::default();
    }
    let size = (results.len() / CHUNKS).max(1);
    let chunks: Vec<&[CheckResult]> = results.chunks(size).take(CHUNKS).collect();

    let mut outcome = ChunkedKpis::default();
    for (i, chunk) in chunks.iter().enumerate() {
        let given = thresholds
            .and_then(|t| t.get(i))
            .copied()
            .filter(|t| *t >= 0.0);
        let threshold = match given {
            Some(t) => t,
            None => {
                let calibration = chunks[(i + chunks.len() - 1) % chunks.len()];
                ml_metrics(calibration, DECISION_THRESHOLD, true)
                    .best_threshold
                    .unwrap_or(DECISION_THRESHOLD)
            }
        };
        outcome.thresholds.push(threshold);
        let partial = kpis(chunk, threshold, rng);
        outcome.report.absorb(partial, i);
    }
    outcome
}

/// Accuracy and MRR for thresholds 0.00 to 0.99
pub fn threshold_sweep(results: &[CheckResult]) -> Vec<SweepPoint> {
    (0..100u32)
        .map(|step| {
            let threshold = f64::from(step) / 100.0;
            SweepPoint {
                threshold,
                accuracy: ml_metrics(results, threshold, false).accuracy,
                mrr: mean_reciprocal_rank(results, threshold),
            }
        })
        .collect()
}

/// Analysis durations in seconds
pub fn rca_times(results: &[CheckResult]) -> Vec<f64> {
    results.iter().map(CheckResult::rca_seconds).collect()
}

/// Training durations of the records that carry one
pub fn training_times(records: &[ReplayRecord]) -> Vec<f64> {
    records
        .iter()
        .filter_map(|r| r.training_completion_time)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn prediction(service: &str, probability: f64, distribution: &[(u32, f64)]) -> Prediction {
        Prediction {
            service_name: service.to_string(),
            probability,
            fault_distribution: distribution.iter().copied().collect(),
        }
    }

    fn row(predictions: Vec<Prediction>, actual: &[(&str, u32)]) -> CheckResult {
        let start = Utc::now();
        CheckResult {
            predictions,
            violation_time: None,
            analysis_start_time: start,
            root_cause_analysis_time: start + Duration::milliseconds(1500),
            discrete_data: BTreeMap::new(),
            raw_data: BTreeMap::new(),
            incident: None,
            actual_results: actual.iter().map(|(s, c)| (s.to_string(), *c)).collect(),
        }
    }

    fn alternating() -> Vec<CheckResult> {
        vec![
            // caught
            row(vec![prediction("core", 0.9, &[(0, 0.1), (1, 0.9)])], &[("core", 1)]),
            // quiet
            row(vec![prediction("core", 0.05, &[(0, 0.95), (1, 0.05)])], &[]),
            // missed
            row(vec![prediction("core", 0.1, &[(0, 0.9), (4, 0.1)])], &[("core", 4)]),
            // false alarm
            row(vec![prediction("redis", 0.5, &[(0, 0.5), (2, 0.5)])], &[]),
        ]
    }

    #[test]
    fn test_accuracy_counts_true_decisions() {
        let results = alternating();
        let metrics = ml_metrics(&results, DECISION_THRESHOLD, false);
        // TP = 1, TN = 1 out of 4 rows
        assert_eq!(metrics.accuracy, 2.0 / 4.0);
        assert_eq!(metrics.recall, 0.5);
        assert_eq!(metrics.fpr, 0.5);
        assert_eq!(metrics.fnr, 0.5);
        assert!(metrics.best_threshold.is_none());
    }

    #[test]
    fn test_metrics_on_empty_input() {
        let metrics = ml_metrics(&[], DECISION_THRESHOLD, false);
        assert_eq!(metrics.accuracy, 0.0);
        assert_eq!(metrics.recall, 0.0);
        assert_eq!(metrics.fpr, 0.0);
    }

    #[test]
    fn test_optimal_threshold_prefers_later_tie() {
        let best = optimal_threshold(&[0.8, 0.6], &[0.1, 0.3]);
        assert_eq!(best.score, 4);
        assert!((best.threshold - 0.599).abs() < 1e-9);
        assert_eq!(best.true_positives, 2);
        assert_eq!(best.true_negatives, 2);
        assert_eq!(best.false_positives, 0);
        assert_eq!(best.false_negatives, 0);
    }

    #[test]
    fn test_optimal_threshold_stays_inside_open_interval() {
        let best = optimal_threshold(&[], &[]);
        assert_eq!(best.score, 0);
        assert!(best.threshold > 0.0 && best.threshold < 1.0);
        assert!((best.threshold - 0.999).abs() < 1e-9);
    }

    #[test]
    fn test_calculated_threshold_separates_rows() {
        let metrics = ml_metrics(&alternating(), DECISION_THRESHOLD, true);
        let threshold = metrics.best_threshold.unwrap();
        // incident confidences 0.9 and 0.1, normal confidences 0.05 and 0.5
        assert!(threshold > 0.5 && threshold < 0.9);
    }

    #[test]
    fn test_hit_rate_and_reciprocal_rank() {
        let results = vec![
            row(
                vec![
                    prediction("redis", 0.9, &[(0, 0.1), (2, 0.9)]),
                    prediction("core", 0.8, &[(0, 0.2), (1, 0.8)]),
                ],
                &[("core", 1)],
            ),
            row(vec![prediction("core", 0.9, &[(0, 0.1), (4, 0.9)])], &[("core", 4)]),
        ];
        let mut rng = StdRng::seed_from_u64(7);
        let report = kpis(&results, DECISION_THRESHOLD, &mut rng);

        assert_eq!(report.hit_rate["HR@1"]["core"], 0.5);
        assert_eq!(report.hit_rate["HR@2"]["core"], 1.0);
        assert_eq!(report.mrr["core"], 0.75);
        assert_eq!(report.mrr[ALL], 0.75);
        assert_eq!(report.fault_type_recall["core"], 1.0);
        assert_eq!(report.fault_type_recall[ALL], 1.0);
        // the first row flags two services for one fault
        assert_eq!(report.miss_counter, 1);
        assert_eq!(report.accuracy[ALL], 1.0);
        assert_eq!(report.accuracy["core"], 1.0);
    }

    #[test]
    fn test_wrong_fault_type_lowers_recall() {
        let results = vec![row(
            vec![prediction("core", 0.9, &[(0, 0.1), (1, 0.2), (4, 0.7)])],
            &[("core", 1)],
        )];
        let mut rng = StdRng::seed_from_u64(7);
        let report = kpis(&results, DECISION_THRESHOLD, &mut rng);
        assert_eq!(report.fault_type_recall["core"], 0.0);
        assert_eq!(report.hit_rate["HR@1"]["core"], 1.0);
    }

    #[test]
    fn test_multiple_faulty_services_share_a_key() {
        let results = vec![row(
            vec![
                prediction("core", 0.9, &[(0, 0.1), (1, 0.9)]),
                prediction("redis", 0.6, &[(0, 0.4), (1, 0.6)]),
            ],
            &[("core", 1), ("redis", 1)],
        )];
        let mut rng = StdRng::seed_from_u64(7);
        let report = kpis(&results, DECISION_THRESHOLD, &mut rng);
        assert_eq!(report.hit_rate["HR@1"][MULTIPLE], 0.0);
        assert_eq!(report.hit_rate["HR@2"][MULTIPLE], 1.0);
        // ranks 1 and 2 -> 2 / (3 - 2 + 1)
        assert_eq!(report.mrr[MULTIPLE], 1.0);
    }

    #[test]
    fn test_interleave_samples_normal_rows() {
        let incidents = vec![row(vec![], &[("core", 1)]), row(vec![], &[("core", 1)])];
        let normal: Vec<CheckResult> = (0..5).map(|_| row(vec![], &[])).collect();
        let mut rng = StdRng::seed_from_u64(1);
        let merged = interleave_no_incidents(incidents, normal, &mut rng);

        assert_eq!(merged.len(), 4);
        let pattern: Vec<bool> = merged.iter().map(CheckResult::is_actual_incident).collect();
        assert_eq!(pattern, vec![true, false, true, false]);
    }

    #[test]
    fn test_interleave_keeps_surplus_incidents() {
        let incidents: Vec<CheckResult> = (0..3).map(|_| row(vec![], &[("core", 1)])).collect();
        let normal = vec![row(vec![], &[])];
        let mut rng = StdRng::seed_from_u64(1);
        let merged = interleave_no_incidents(incidents, normal, &mut rng);
        let pattern: Vec<bool> = merged.iter().map(CheckResult::is_actual_incident).collect();
        assert_eq!(pattern, vec![true, false, true, true]);
    }

    #[test]
    fn test_filter_by_fault() {
        let results = vec![
            row(vec![], &[("core", 1)]),
            row(vec![], &[("core", 4)]),
            row(vec![], &[]),
            row(vec![], &[]),
        ];
        let mut rng = StdRng::seed_from_u64(3);
        let delay = filter_by_fault(&results, FaultType::Delay, &mut rng);
        assert_eq!(delay.len(), 2);
        assert_eq!(delay[0].actual_results["core"], 1);
        assert!(!delay[1].is_actual_incident());

        let normal = filter_by_fault(&results, FaultType::None, &mut rng);
        assert_eq!(normal.len(), 2);
        assert!(normal.iter().all(|r| !r.is_actual_incident()));
    }

    #[test]
    fn test_chunked_kpis_reuses_given_thresholds() {
        let results: Vec<CheckResult> = (0..10).flat_map(|_| alternating()).collect();
        let mut rng = StdRng::seed_from_u64(5);
        let given = [0.2, 0.2, 0.2, 0.2, 0.2];
        let chunked = chunked_kpis(&results, Some(&given), &mut rng);
        assert_eq!(chunked.thresholds, given.to_vec());
        assert!((chunked.report.accuracy[ALL] - 0.5).abs() < 1e-9);
        // one missed incident per four rows
        assert_eq!(chunked.report.miss_counter, 10);
    }

    #[test]
    fn test_chunked_kpis_calibrates_missing_thresholds() {
        let results: Vec<CheckResult> = (0..10).flat_map(|_| alternating()).collect();
        let mut rng = StdRng::seed_from_u64(5);
        let chunked = chunked_kpis(&results, None, &mut rng);
        assert_eq!(chunked.thresholds.len(), 5);
        assert!(chunked.thresholds.iter().all(|t| *t > 0.5 && *t < 0.9));
    }

    #[test]
    fn test_spread() {
        let spread = Spread::of(&[1.0, 2.0, 3.0]);
        assert_eq!(spread.mean, 2.0);
        assert_eq!(spread.std, 1.0);
        assert_eq!(spread.count, 3);
        assert_eq!(Spread::of(&[4.0]).std, 0.0);
        assert_eq!(Spread::of(&[]), Spread::default());
    }

    #[test]
    fn test_timing_helpers() {
        let results = alternating();
        assert!(rca_times(&results).iter().all(|t| (*t - 1.5).abs() < 1e-9));
        let records = vec![
            ReplayRecord {
                training_completion_time: Some(3.0),
                test_results: vec![],
            },
            ReplayRecord::default(),
        ];
        assert_eq!(training_times(&records), vec![3.0]);
    }

    #[test]
    fn test_threshold_sweep_covers_unit_interval() {
        let sweep = threshold_sweep(&alternating());
        assert_eq!(sweep.len(), 100);
        assert_eq!(sweep[0].threshold, 0.0);
        assert!((sweep[99].threshold - 0.99).abs() < 1e-12);
        // at 0.0 every row is flagged: both incidents caught, both normals raise alarms
        assert_eq!(sweep[0].accuracy, 0.5);
        assert_eq!(sweep[0].mrr, 1.0);
    }
}
