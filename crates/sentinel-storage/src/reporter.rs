//! Incident reporting transports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rca_sentinel_core::{events::IncidentReport, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

/// Trait for incident transports
#[async_trait]
pub trait IncidentReporter: Send + Sync {
    /// Deliver one incident report
    async fn report(&self, incident: &IncidentReport) -> Result<()>;

    /// Health check
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Reporter that drops every incident
#[derive(Debug, Clone, Default)]
pub struct NoopReporter;

impl NoopReporter {
    /// Create a new no-op reporter
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IncidentReporter for NoopReporter {
    async fn report(&self, _incident: &IncidentReport) -> Result<()> {
        Ok(())
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    reporter: &'a str,
    sent_at: DateTime<Utc>,
    incident: &'a IncidentReport,
}

/// Appends one JSON document per incident to a file
#[derive(Debug)]
pub struct JsonLinesReporter {
    path: PathBuf,
    identifier: String,
    lock: Mutex<()>,
}

impl JsonLinesReporter {
    /// Create a reporter writing to `path`
    pub fn new(path: impl AsRef<Path>, identifier: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            identifier: identifier.into(),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl IncidentReporter for JsonLinesReporter {
    async fn report(&self, incident: &IncidentReport) -> Result<()> {
        let mut line = serde_json::to_vec(&Envelope {
            reporter: &self.identifier,
            sent_at: Utc::now(),
            incident,
        })?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        info!(
            incident_id = %incident.incident_id,
            path = %self.path.display(),
            "Incident reported"
        );
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rca_sentinel_core::events::{Prediction, SlaViolation};
    use rca_sentinel_core::sla::SlaBound;
    use std::collections::BTreeMap;

    fn incident() -> IncidentReport {
        let violation = SlaViolation {
            violation_type: "availability".into(),
            reported_value: 0.2,
            expected_value: SlaBound::at_least(0.9),
            responsible_provider: "provider-a".into(),
        };
        let prediction = Prediction {
            service_name: "edgex_core_data".into(),
            probability: 0.8,
            fault_distribution: BTreeMap::from([(0, 0.2), (4, 0.8)]),
        };
        IncidentReport::new(
            "edgex_core_data",
            &violation,
            Some("2024-05-01 10:00:00".into()),
            vec![prediction],
            BTreeMap::from([("availability_edgex_core_data".to_string(), 1)]),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_json_lines_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("incidents.jsonl");
        let reporter = JsonLinesReporter::new(&path, "rca-sentinel");
        reporter.health_check().await.unwrap();
        reporter.report(&incident()).await.unwrap();
        reporter.report(&incident()).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["reporter"], "rca-sentinel");
        assert_eq!(
            first["incident"]["violation_details"]["contract_info"]["service"],
            "edgex-core-data"
        );
    }

    #[tokio::test]
    async fn test_noop_reporter() {
        NoopReporter::new().report(&incident()).await.unwrap();
    }
}
