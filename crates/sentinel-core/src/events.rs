//! Predictions, incident reports and per-observation check results.

use crate::sla::SlaBound;
use crate::types::service_display_name;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Ranked root-cause candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Service-status column the prediction refers to
    pub service_name: String,
    /// Probability that the service is faulty (1 - P(state 0))
    pub probability: f64,
    /// Posterior mass per fault code
    pub fault_distribution: BTreeMap<u32, f64>,
}

impl Prediction {
    /// Most likely fault code other than "no fault". Ties resolve to the lower code.
    pub fn most_likely_fault(&self) -> Option<u32> {
        self.fault_distribution
            .iter()
            .filter(|(code, _)| **code != 0)
            .fold(None, |best: Option<(u32, f64)>, (code, mass)| match best {
                Some((_, best_mass)) if best_mass >= *mass => best,
                _ => Some((*code, *mass)),
            })
            .map(|(code, _)| code)
    }
}

/// SLA breach observed on a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaViolation {
    /// `availability` or `max_service_delay`
    pub violation_type: String,
    /// Raw reading that broke the bound
    pub reported_value: f64,
    /// Agreed bound
    pub expected_value: SlaBound,
    /// Provider responsible for the service
    pub responsible_provider: String,
}

/// Contract section of an incident report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractInfo {
    /// Service in its external (dashed) spelling
    pub service: String,
    /// Provider responsible for the service
    pub responsible_provider: String,
}

/// What was violated and when
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationDetails {
    /// Retrieval time of the offending observation
    pub violation_time: Option<String>,
    /// `availability` or `max_service_delay`
    pub violation_type: String,
    /// Agreed bound
    pub expected_value: SlaBound,
    /// Observed value
    pub reported_value: f64,
    /// Contract details
    pub contract_info: ContractInfo,
}

/// SLA-corroborated root-cause attribution sent to the reporting transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentReport {
    /// Report identifier
    pub incident_id: Uuid,
    /// Violation context
    pub violation_details: ViolationDetails,
    /// Full ranked prediction list
    pub root_causes: Vec<Prediction>,
    /// Discrete evidence snapshot
    pub violation_evidence: BTreeMap<String, u32>,
    /// When the analysis finished
    pub root_cause_analysis_time: DateTime<Utc>,
}

impl IncidentReport {
    /// Build a report for the top-ranked service and its violation
    pub fn new(
        service_column: &str,
        violation: &SlaViolation,
        violation_time: Option<String>,
        root_causes: Vec<Prediction>,
        violation_evidence: BTreeMap<String, u32>,
        root_cause_analysis_time: DateTime<Utc>,
    ) -> Self {
        Self {
            incident_id: Uuid::new_v4(),
            violation_details: ViolationDetails {
                violation_time,
                violation_type: violation.violation_type.clone(),
                expected_value: violation.expected_value,
                reported_value: violation.reported_value,
                contract_info: ContractInfo {
                    service: service_display_name(service_column),
                    responsible_provider: violation.responsible_provider.clone(),
                },
            },
            root_causes,
            violation_evidence,
            root_cause_analysis_time,
        }
    }
}

/// Outcome of checking one observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Ranked predictions, highest probability first
    pub predictions: Vec<Prediction>,
    /// Retrieval time of the observation
    pub violation_time: Option<String>,
    /// When processing of the observation began
    pub analysis_start_time: DateTime<Utc>,
    /// When the ranking was available
    pub root_cause_analysis_time: DateTime<Utc>,
    /// Discrete evidence used for the query
    pub discrete_data: BTreeMap<String, u32>,
    /// Raw readings after stripping status columns
    pub raw_data: BTreeMap<String, Option<f64>>,
    /// Report emitted for an SLA-corroborated prediction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident: Option<IncidentReport>,
    /// Ground truth recorded during archive replay
    #[serde(default)]
    pub actual_results: BTreeMap<String, u32>,
}

impl CheckResult {
    /// Analysis duration in seconds
    pub fn rca_seconds(&self) -> f64 {
        (self.root_cause_analysis_time - self.analysis_start_time)
            .num_milliseconds() as f64
            / 1000.0
    }

    /// Whether a fault was actually injected during this row
    pub fn is_actual_incident(&self) -> bool {
        !self.actual_results.is_empty()
    }
}

/// Replay results for one dataset, persisted after every row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayRecord {
    /// Seconds spent training the model used for the replay
    pub training_completion_time: Option<f64>,
    /// One result per replayed row
    pub test_results: Vec<CheckResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(distribution: &[(u32, f64)]) -> Prediction {
        Prediction {
            service_name: "edgex_core_data".into(),
            probability: 0.7,
            fault_distribution: distribution.iter().copied().collect(),
        }
    }

    #[test]
    fn test_most_likely_fault_ignores_normal_state() {
        let p = prediction(&[(0, 0.6), (1, 0.1), (4, 0.3)]);
        assert_eq!(p.most_likely_fault(), Some(4));
        let tie = prediction(&[(0, 0.2), (1, 0.4), (4, 0.4)]);
        assert_eq!(tie.most_likely_fault(), Some(1));
        assert_eq!(prediction(&[(0, 1.0)]).most_likely_fault(), None);
    }

    #[test]
    fn test_incident_report_uses_dashed_service_name() {
        let violation = SlaViolation {
            violation_type: "availability".into(),
            reported_value: 0.5,
            expected_value: SlaBound::at_least(0.99),
            responsible_provider: "acme".into(),
        };
        let report = IncidentReport::new(
            "edgex_core_data",
            &violation,
            Some("t0".into()),
            vec![],
            BTreeMap::new(),
            Utc::now(),
        );
        assert_eq!(report.violation_details.contract_info.service, "edgex-core-data");
        assert_eq!(report.violation_details.violation_type, "availability");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["violation_details"]["expected_value"]["min"], 0.99);
    }

    #[test]
    fn test_check_result_defaults_actual_results() {
        let json = r#"{
            "predictions": [],
            "violation_time": null,
            "analysis_start_time": "2024-01-01T00:00:00Z",
            "root_cause_analysis_time": "2024-01-01T00:00:02Z",
            "discrete_data": {},
            "raw_data": {}
        }"#;
        let result: CheckResult = serde_json::from_str(json).unwrap();
        assert!(!result.is_actual_incident());
        assert!((result.rca_seconds() - 2.0).abs() < 1e-9);
    }
}
