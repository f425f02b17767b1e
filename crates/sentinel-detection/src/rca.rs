//! Online root-cause analysis loop.
//!
//! [`RcaEngine`] serves one observation at a time against a trained model.
//! An observation carrying a metric the model has never seen moves the
//! engine to [`ServingState::Invalid`]; it stays there until a new model is
//! installed with [`RcaEngine::replace_model`], or with
//! [`RcaEngine::install_retrained`] which first checks that the new model
//! knows the metric. Any other per-row failure is logged and skipped.

use crate::discretizer::ApplyOutcome;
use crate::models::FaultPredictor;
use crate::training::TrainedModel;
use chrono::Utc;
use metrics::counter;
use rca_sentinel_core::{
    config::ServingConfig,
    events::{CheckResult, IncidentReport, SlaViolation},
    frame::Observation,
    sla::SlaMap,
    types::{ColumnClassifier, FaultType, MetricCategory, TIMESTAMP_COLUMN},
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// Serving state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ServingState {
    /// A model is loaded and observations are analysed
    Trained,
    /// Awaiting a full retrain
    Invalid {
        /// Metric that triggered the invalidation
        unseen_metric: String,
    },
}

/// Result of analysing one observation
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    /// Observation analysed
    Checked(CheckResult),
    /// Observation carries a metric the model was not trained on
    UnseenMetric(String),
}

/// What [`RcaEngine::serve_one`] did with an observation
#[derive(Debug)]
pub enum ServeStep {
    /// Observation analysed
    Checked(CheckResult),
    /// Processing failed; the observation was skipped
    Skipped(Error),
    /// The engine is invalid and needs a retrain
    Invalidated(String),
}

/// Counters over a serving session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServeSummary {
    /// Observations analysed
    pub processed: u64,
    /// Observations skipped after an error
    pub failed: u64,
    /// Incident reports produced
    pub incidents: u64,
    /// Set when serving stopped on an unseen metric
    pub invalidated_by: Option<String>,
}

/// SLA violations of one observation, keyed by service
#[derive(Debug, Clone, Default)]
struct Violations {
    delay: BTreeMap<String, SlaViolation>,
    availability: BTreeMap<String, SlaViolation>,
}

/// Service-status columns with a non-zero code in a raw observation
pub fn actual_faults(observation: &Observation, classifier: &ColumnClassifier) -> BTreeMap<String, u32> {
    observation
        .values
        .iter()
        .filter(|(column, _)| classifier.is_service_status(column))
        .filter_map(|(column, value)| {
            let code = value.unwrap_or(0.0).round();
            (code > 0.0).then(|| (column.clone(), code as u32))
        })
        .collect()
}

/// Online RCA loop over a trained model
#[derive(Debug)]
pub struct RcaEngine {
    model: Option<TrainedModel>,
    classifier: ColumnClassifier,
    config: ServingConfig,
    state: ServingState,
}

impl RcaEngine {
    /// Start serving a trained model
    pub fn new(model: TrainedModel, config: ServingConfig) -> Self {
        let classifier = model.classifier();
        info!(
            dataset = %model.dataset_tag,
            model_type = model.model.model_type().as_str(),
            "RCA engine ready"
        );
        Self {
            model: Some(model),
            classifier,
            config,
            state: ServingState::Trained,
        }
    }

    /// Current state
    pub fn state(&self) -> &ServingState {
        &self.state
    }

    /// True while a model is being served
    pub fn is_trained(&self) -> bool {
        self.state == ServingState::Trained
    }

    /// Loaded model, if any
    pub fn model(&self) -> Option<&TrainedModel> {
        self.model.as_ref()
    }

    /// Column classifier of the loaded model
    pub fn classifier(&self) -> &ColumnClassifier {
        &self.classifier
    }

    /// Drop the model and wait for a retrain
    pub fn invalidate(&mut self, unseen_metric: impl Into<String>) {
        let unseen_metric = unseen_metric.into();
        warn!(metric = %unseen_metric, "New metric discovered, model invalidated");
        counter!("rca_model_invalidations_total").increment(1);
        self.model = None;
        self.state = ServingState::Invalid { unseen_metric };
    }

    /// Install a freshly trained model and resume serving
    pub fn replace_model(&mut self, model: TrainedModel) {
        self.classifier = model.classifier();
        info!(dataset = %model.dataset_tag, "Installed retrained model");
        self.model = Some(model);
        self.state = ServingState::Trained;
    }

    /// Install a model retrained after an invalidation. A model that still
    /// lacks the invalidating metric is rejected and the engine stays
    /// invalid.
    pub fn install_retrained(&mut self, model: TrainedModel) -> Result<()> {
        if let ServingState::Invalid { unseen_metric } = &self.state {
            if !model.covers_metric(unseen_metric) {
                warn!(
                    metric = %unseen_metric,
                    dataset = %model.dataset_tag,
                    "Retrained model does not cover the unseen metric"
                );
                return Err(Error::UnseenMetric(unseen_metric.clone()));
            }
        }
        self.replace_model(model);
        Ok(())
    }

    /// Analyse one observation. Does not change the serving state.
    pub fn check_metrics(&self, observation: &Observation, sla: &SlaMap) -> Result<CheckOutcome> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| Error::internal("no trained model loaded"))?;
        let analysis_start_time = Utc::now();
        let observation = observation.clone().normalized();

        let mut raw: BTreeMap<String, Option<f64>> = observation
            .values
            .into_iter()
            .filter(|(column, _)| column != TIMESTAMP_COLUMN && !self.classifier.is_service_status(column))
            .collect();
        if self.config.prune_unknown_columns {
            raw.retain(|column, _| model.training_data.contains(column));
        }
        let pruned = model.curated.prune_row(&mut raw);
        if !pruned.is_empty() {
            debug!(columns = ?pruned, "Dropped curated columns from observation");
        }

        let mut evidence = match model.discretizers.apply_observation(&raw) {
            ApplyOutcome::States(states) => states,
            ApplyOutcome::UnseenMetric(metric) => return Ok(CheckOutcome::UnseenMetric(metric)),
        };
        for node in model.independent_nodes() {
            evidence.remove(node);
        }

        let violations = self.sla_violations(&evidence, &raw, sla);
        let predictions = model.model.predict_fault_distribution(&evidence)?;
        let root_cause_analysis_time = Utc::now();

        for (rank, prediction) in predictions.iter().enumerate() {
            debug!(
                rank = rank + 1,
                service = %prediction.service_name,
                probability = prediction.probability,
                distribution = ?prediction.fault_distribution,
                "Root-cause candidate"
            );
        }

        let incident = predictions.first().and_then(|top| {
            let violation = match top.most_likely_fault().and_then(FaultType::from_code) {
                Some(FaultType::Delay) => violations.delay.get(&top.service_name),
                Some(FaultType::Availability) => violations.availability.get(&top.service_name),
                _ => None,
            }?;
            Some(IncidentReport::new(
                &top.service_name,
                violation,
                observation.timestamp.clone(),
                predictions.clone(),
                evidence.clone(),
                root_cause_analysis_time,
            ))
        });
        if let Some(incident) = &incident {
            info!(
                incident_id = %incident.incident_id,
                service = %incident.violation_details.contract_info.service,
                violation_type = %incident.violation_details.violation_type,
                "SLA-corroborated root cause found"
            );
        }

        Ok(CheckOutcome::Checked(CheckResult {
            predictions,
            violation_time: observation.timestamp,
            analysis_start_time,
            root_cause_analysis_time,
            discrete_data: evidence,
            raw_data: raw,
            incident,
            actual_results: BTreeMap::new(),
        }))
    }

    fn sla_violations(
        &self,
        evidence: &BTreeMap<String, u32>,
        raw: &BTreeMap<String, Option<f64>>,
        sla: &SlaMap,
    ) -> Violations {
        let mut violations = Violations::default();
        for (column, state) in evidence {
            if *state == 0 {
                continue;
            }
            let Some(value) = raw.get(column).copied().flatten() else {
                continue;
            };
            match self.classifier.category(column) {
                MetricCategory::Availability => {
                    let Some(service) = self.classifier.availability_target(column) else {
                        continue;
                    };
                    let Some(agreement) = sla.get(&service) else {
                        continue;
                    };
                    if let Some(bound) = agreement.availability {
                        if bound.min.map_or(false, |min| value < min) {
                            violations.availability.insert(
                                service,
                                SlaViolation {
                                    violation_type: "availability".to_string(),
                                    reported_value: value,
                                    expected_value: bound,
                                    responsible_provider: agreement.provider.clone(),
                                },
                            );
                        }
                    }
                }
                MetricCategory::Latency => {
                    let Some(service) = self.classifier.latency_target(column) else {
                        continue;
                    };
                    let Some(agreement) = sla.get(&service) else {
                        continue;
                    };
                    if let Some(bound) = agreement.max_service_delay {
                        if bound.max.map_or(false, |max| value > max) {
                            violations.delay.insert(
                                service,
                                SlaViolation {
                                    violation_type: "max_service_delay".to_string(),
                                    reported_value: value,
                                    expected_value: bound,
                                    responsible_provider: agreement.provider.clone(),
                                },
                            );
                        }
                    }
                }
                _ => {}
            }
        }
        violations
    }

    /// Analyse one observation, updating the serving state
    pub fn serve_one(&mut self, observation: &Observation, sla: &SlaMap) -> ServeStep {
        if let ServingState::Invalid { unseen_metric } = &self.state {
            return ServeStep::Invalidated(unseen_metric.clone());
        }
        match self.check_metrics(observation, sla) {
            Ok(CheckOutcome::Checked(result)) => {
                counter!("rca_observations_total").increment(1);
                if result.incident.is_some() {
                    counter!("rca_incidents_total").increment(1);
                }
                ServeStep::Checked(result)
            }
            Ok(CheckOutcome::UnseenMetric(metric)) => {
                self.invalidate(metric.clone());
                ServeStep::Invalidated(metric)
            }
            Err(e) => {
                error!(error = %e, timestamp = ?observation.timestamp, "Failed to analyse observation");
                counter!("rca_observation_failures_total").increment(1);
                ServeStep::Skipped(e)
            }
        }
    }

    /// Serve observations in order until they run out or the model is
    /// invalidated. Every analysed observation is handed to `sink`.
    pub fn serve<I, F>(&mut self, observations: I, sla: &SlaMap, mut sink: F) -> ServeSummary
    where
        I: IntoIterator<Item = Observation>,
        F: FnMut(CheckResult),
    {
        let mut summary = ServeSummary::default();
        for observation in observations {
            match self.serve_one(&observation, sla) {
                ServeStep::Checked(result) => {
                    summary.processed += 1;
                    if result.incident.is_some() {
                        summary.incidents += 1;
                    }
                    sink(result);
                }
                ServeStep::Skipped(_) => summary.failed += 1,
                ServeStep::Invalidated(metric) => {
                    summary.invalidated_by = Some(metric);
                    break;
                }
            }
        }
        info!(
            processed = summary.processed,
            failed = summary.failed,
            incidents = summary.incidents,
            "Serving session finished"
        );
        summary
    }
}
