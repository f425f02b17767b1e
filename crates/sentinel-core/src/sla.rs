//! Service-level agreement contract consumed by the online loop.

use crate::types::normalize_column_name;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Lower/upper bound of one service-level objective
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SlaBound {
    /// Minimum acceptable value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Maximum acceptable value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl SlaBound {
    /// Bound with only a minimum
    pub fn at_least(min: f64) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    /// Bound with only a maximum
    pub fn at_most(max: f64) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }
}

/// Agreement for one service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceLevelAgreement {
    /// Contractual provider responsible for the service
    pub provider: String,
    /// Availability objective
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability: Option<SlaBound>,
    /// Maximum service delay objective
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_service_delay: Option<SlaBound>,
}

impl ServiceLevelAgreement {
    /// Minimum availability, if agreed
    pub fn min_availability(&self) -> Option<f64> {
        self.availability.and_then(|b| b.min)
    }

    /// Maximum delay, if agreed
    pub fn max_delay(&self) -> Option<f64> {
        self.max_service_delay.and_then(|b| b.max)
    }
}

/// Agreements keyed by normalised service name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlaMap {
    services: BTreeMap<String, ServiceLevelAgreement>,
}

impl SlaMap {
    /// Empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an agreement; the key is normalised (`edgex-core-data` → `edgex_core_data`)
    pub fn insert(&mut self, service: &str, agreement: ServiceLevelAgreement) {
        self.services
            .insert(normalize_column_name(&service.to_lowercase()), agreement);
    }

    /// Agreement for a service
    pub fn get(&self, service: &str) -> Option<&ServiceLevelAgreement> {
        self.services.get(service)
    }

    /// Number of services
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// True when no agreement is known
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Load a map from a JSON or YAML file, chosen by extension
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let raw: BTreeMap<String, ServiceLevelAgreement> = match path
            .extension()
            .and_then(|e| e.to_str())
        {
            Some("json") => serde_json::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            other => {
                return Err(Error::validation(format!(
                    "unsupported SLA file extension: {:?}",
                    other
                )))
            }
        };
        let mut map = Self::new();
        for (service, agreement) in raw {
            map.insert(&service, agreement);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_yaml_and_normalize_keys() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "Edgex-Core-Data:\n  provider: acme\n  availability: {{min: 0.99}}\n  max_service_delay: {{max: 0.5}}"
        )
        .unwrap();
        let map = SlaMap::from_path(file.path()).unwrap();
        let sla = map.get("edgex_core_data").unwrap();
        assert_eq!(sla.provider, "acme");
        assert_eq!(sla.min_availability(), Some(0.99));
        assert_eq!(sla.max_delay(), Some(0.5));
    }

    #[test]
    fn test_rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        assert!(SlaMap::from_path(file.path()).is_err());
    }
}
