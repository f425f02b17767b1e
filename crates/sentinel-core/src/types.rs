//! Column categories, fault codes and column-name helpers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Name of the time column carried by every metric matrix
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Suffixes of the per-fault indicator columns of an injectable service
pub const STATUS_SUFFIXES: [&str; 4] = ["_delay", "_cpu", "_memory", "_failure"];

/// Semantic category of a column, inferred from its name
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricCategory {
    /// Request latency between two services
    Latency,
    /// Error rate
    Error,
    /// CPU usage
    Cpu,
    /// Memory usage
    Memory,
    /// Availability ratio (higher is healthier)
    Availability,
    /// Ground-truth fault indicator of a service
    ServiceStatus,
    /// Time column
    Timestamp,
    /// Metric without a recognised prefix
    Other,
}

impl MetricCategory {
    const METRIC_PREFIXES: [(&'static str, MetricCategory); 5] = [
        ("latency", MetricCategory::Latency),
        ("error", MetricCategory::Error),
        ("cpu", MetricCategory::Cpu),
        ("memory", MetricCategory::Memory),
        ("availability", MetricCategory::Availability),
    ];

    /// Get the category name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricCategory::Latency => "latency",
            MetricCategory::Error => "error",
            MetricCategory::Cpu => "cpu",
            MetricCategory::Memory => "memory",
            MetricCategory::Availability => "availability",
            MetricCategory::ServiceStatus => "service_status",
            MetricCategory::Timestamp => "timestamp",
            MetricCategory::Other => "other",
        }
    }

    /// Category from a metric-name prefix, if the name carries one
    pub fn from_metric_prefix(name: &str) -> Option<Self> {
        Self::METRIC_PREFIXES
            .iter()
            .find(|(prefix, _)| name.starts_with(prefix))
            .map(|(_, category)| *category)
    }

    /// True for columns that are discretized and used as evidence
    pub fn is_metric(&self) -> bool {
        !matches!(self, MetricCategory::ServiceStatus | MetricCategory::Timestamp)
    }
}

impl fmt::Display for MetricCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fault codes stored in service-status columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultType {
    /// No fault active
    None,
    /// Injected network delay
    Delay,
    /// CPU stress
    Cpu,
    /// Memory stress
    Memory,
    /// Pod failure / unavailability
    Availability,
}

impl FaultType {
    /// Numeric code used in the training matrix
    pub fn code(&self) -> u32 {
        match self {
            FaultType::None => 0,
            FaultType::Delay => 1,
            FaultType::Cpu => 2,
            FaultType::Memory => 3,
            FaultType::Availability => 4,
        }
    }

    /// Fault type from its numeric code
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(FaultType::None),
            1 => Some(FaultType::Delay),
            2 => Some(FaultType::Cpu),
            3 => Some(FaultType::Memory),
            4 => Some(FaultType::Availability),
            _ => None,
        }
    }

    /// Get the experiment name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultType::None => "none",
            FaultType::Delay => "delay",
            FaultType::Cpu => "cpu",
            FaultType::Memory => "memory",
            FaultType::Availability => "availability",
        }
    }
}

impl fmt::Display for FaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replace dashes so service names and column names share one spelling
pub fn normalize_column_name(name: &str) -> String {
    name.trim().replace('-', "_")
}

/// Column name as a service identifier in outgoing reports
pub fn service_display_name(column: &str) -> String {
    column.replace('_', "-")
}

/// Assigns a [`MetricCategory`] to every column of a deployment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnClassifier {
    service_prefix: String,
    status_columns: BTreeSet<String>,
}

impl ColumnClassifier {
    /// Build a classifier from the injectable services and the service-id prefix
    pub fn new<S: AsRef<str>>(services_for_fault_injection: &[S], service_prefix: &str) -> Self {
        let mut status_columns = BTreeSet::new();
        for service in services_for_fault_injection {
            let service = normalize_column_name(service.as_ref());
            for suffix in STATUS_SUFFIXES {
                status_columns.insert(format!("{service}{suffix}"));
            }
            status_columns.insert(service);
        }
        Self {
            service_prefix: normalize_column_name(service_prefix),
            status_columns,
        }
    }

    /// Prefix that marks service identifiers
    pub fn service_prefix(&self) -> &str {
        &self.service_prefix
    }

    /// Category of a column name
    pub fn category(&self, name: &str) -> MetricCategory {
        if name == TIMESTAMP_COLUMN {
            return MetricCategory::Timestamp;
        }
        if self.status_columns.contains(name) {
            return MetricCategory::ServiceStatus;
        }
        if let Some(category) = MetricCategory::from_metric_prefix(name) {
            return category;
        }
        if !self.service_prefix.is_empty() && name.starts_with(&self.service_prefix) {
            return MetricCategory::ServiceStatus;
        }
        MetricCategory::Other
    }

    /// True for ground-truth fault columns
    pub fn is_service_status(&self, name: &str) -> bool {
        self.category(name) == MetricCategory::ServiceStatus
    }

    /// Service a latency column points at: the tail from the last service prefix
    pub fn latency_target(&self, column: &str) -> Option<String> {
        let tail = column.strip_prefix("latency")?;
        if self.service_prefix.is_empty() {
            return tail.strip_prefix('_').map(str::to_string);
        }
        tail.rfind(&self.service_prefix)
            .map(|index| tail[index..].to_string())
    }

    /// Service an availability column belongs to
    pub fn availability_target(&self, column: &str) -> Option<String> {
        column
            .strip_prefix("availability_")
            .filter(|service| !service.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ColumnClassifier {
        ColumnClassifier::new(&["edgex-core-data", "edgex-core-command"], "edgex")
    }

    #[test]
    fn test_category_from_prefix() {
        let c = classifier();
        assert_eq!(c.category("latency_edgex_ui_edgex_core_data"), MetricCategory::Latency);
        assert_eq!(c.category("availability_edgex_core_data"), MetricCategory::Availability);
        assert_eq!(c.category("cpu_edgex_core_data"), MetricCategory::Cpu);
        assert_eq!(c.category("error_edgex_core_data"), MetricCategory::Error);
        assert_eq!(c.category("memory_edgex_core_data"), MetricCategory::Memory);
        assert_eq!(c.category("timestamp"), MetricCategory::Timestamp);
        assert_eq!(c.category("queue_depth"), MetricCategory::Other);
    }

    #[test]
    fn test_service_status_columns() {
        let c = classifier();
        assert!(c.is_service_status("edgex_core_data"));
        assert!(c.is_service_status("edgex_core_data_delay"));
        assert!(c.is_service_status("edgex_core_command_failure"));
        // unlisted service still carries the service prefix
        assert!(c.is_service_status("edgex_support_scheduler"));
        assert!(!c.is_service_status("latency_edgex_core_data"));
    }

    #[test]
    fn test_latency_target_uses_last_service_id() {
        let c = classifier();
        assert_eq!(
            c.latency_target("latency_edgex_core_command_edgex_core_data").as_deref(),
            Some("edgex_core_data")
        );
        assert_eq!(c.latency_target("cpu_edgex_core_data"), None);
        assert_eq!(
            c.availability_target("availability_edgex_core_data").as_deref(),
            Some("edgex_core_data")
        );
    }

    #[test]
    fn test_fault_codes() {
        for code in 0..=4 {
            assert_eq!(FaultType::from_code(code).map(|f| f.code()), Some(code));
        }
        assert_eq!(FaultType::from_code(9), None);
        assert_eq!(FaultType::Availability.as_str(), "availability");
    }

    #[test]
    fn test_name_helpers() {
        assert_eq!(normalize_column_name("edgex-core-data"), "edgex_core_data");
        assert_eq!(service_display_name("edgex_core_data"), "edgex-core-data");
    }
}
