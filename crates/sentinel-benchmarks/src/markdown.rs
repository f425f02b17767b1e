//! Markdown summary generation.

use crate::kpi::{KpiReport, Spread, ALL, PRECISION_LEVELS};
use crate::result::EvaluationResult;
use std::collections::{BTreeMap, BTreeSet};

/// Sweep rows shown in the summary (every fifth threshold)
const SWEEP_STRIDE: usize = 5;

/// Render an evaluation as markdown tables.
pub fn generate_summary(result: &EvaluationResult) -> String {
    let mut out = String::new();

    out.push_str("# RCA Evaluation Summary\n\n");
    out.push_str(&format!(
        "Generated: {}\n\n",
        result.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str("| Datasets | Rows | Incidents | Miss ratio | Thresholds |\n");
    out.push_str("|---|---|---|---|---|\n");
    let thresholds: Vec<String> = result.thresholds.iter().map(|t| format!("{:.3}", t)).collect();
    out.push_str(&format!(
        "| {} | {} | {} | {:.3} | {} |\n\n",
        result.datasets.len(),
        result.total_rows,
        result.incident_rows,
        result.miss_ratio,
        thresholds.join(", ")
    ));

    out.push_str("## All faults\n\n");
    push_report(&mut out, &result.overall);

    for (fault, report) in &result.by_fault {
        out.push_str(&format!("## {} faults\n\n", fault));
        push_report(&mut out, report);
    }

    out.push_str("## Timing\n\n");
    out.push_str("| Stage | Mean (s) | Std (s) | Samples |\n");
    out.push_str("|---|---|---|---|\n");
    push_spread(&mut out, "Root cause analysis", &result.rca_time);
    push_spread(&mut out, "Training", &result.training_time);
    out.push('\n');

    if !result.sweep.is_empty() {
        out.push_str("## Threshold sweep\n\n");
        out.push_str("| Threshold | Accuracy | MRR |\n");
        out.push_str("|---|---|---|\n");
        for point in result.sweep.iter().step_by(SWEEP_STRIDE) {
            out.push_str(&format!(
                "| {:.2} | {:.3} | {:.3} |\n",
                point.threshold, point.accuracy, point.mrr
            ));
        }
        out.push('\n');
    }

    out
}

fn push_report(out: &mut String, report: &KpiReport) {
    let detection = [
        &report.accuracy,
        &report.recall,
        &report.fpr,
        &report.fault_type_recall,
    ];
    out.push_str("| Service | Accuracy | Recall | FPR | Fault type recall |\n");
    out.push_str("|---|---|---|---|---|\n");
    for service in row_keys(&detection) {
        let cells: Vec<String> = detection.iter().map(|m| cell(m, &service)).collect();
        out.push_str(&format!("| {} | {} |\n", service, cells.join(" | ")));
    }
    out.push('\n');

    let levels: Vec<String> = PRECISION_LEVELS.iter().map(|k| format!("HR@{}", k)).collect();
    let empty = BTreeMap::new();
    let mut ranking: Vec<&BTreeMap<String, f64>> = levels
        .iter()
        .map(|level| report.hit_rate.get(level).unwrap_or(&empty))
        .collect();
    ranking.push(&report.mrr);

    out.push_str(&format!("| Service | {} | MRR |\n", levels.join(" | ")));
    out.push_str(&format!("|---|{}---|\n", "---|".repeat(levels.len())));
    for service in row_keys(&ranking) {
        let cells: Vec<String> = ranking.iter().map(|m| cell(m, &service)).collect();
        out.push_str(&format!("| {} | {} |\n", service, cells.join(" | ")));
    }
    out.push_str(&format!("\nMissed incidents: {}\n\n", report.miss_counter));
}

/// Union of the row keys with the aggregate first
fn row_keys(maps: &[&BTreeMap<String, f64>]) -> Vec<String> {
    let keys: BTreeSet<&String> = maps.iter().flat_map(|m| m.keys()).collect();
    let mut rows: Vec<String> = Vec::with_capacity(keys.len());
    if keys.iter().any(|k| k.as_str() == ALL) {
        rows.push(ALL.to_string());
    }
    rows.extend(keys.into_iter().filter(|k| k.as_str() != ALL).cloned());
    rows
}

fn cell(map: &BTreeMap<String, f64>, key: &str) -> String {
    map.get(key)
        .map(|v| format!("{:.3}", v))
        .unwrap_or_else(|| "-".to_string())
}

fn push_spread(out: &mut String, stage: &str, spread: &Spread) {
    out.push_str(&format!(
        "| {} | {:.2} | {:.2} | {} |\n",
        stage, spread.mean, spread.std, spread.count
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kpi::SweepPoint;
    use chrono::Utc;

    fn report() -> KpiReport {
        let mut report = KpiReport::default();
        report.accuracy.insert(ALL.into(), 0.75);
        report.accuracy.insert("edgex_core_data".into(), 0.5);
        report.recall.insert(ALL.into(), 1.0);
        report.mrr.insert(ALL.into(), 0.625);
        report.mrr.insert("edgex_core_data".into(), 0.625);
        report
            .hit_rate
            .entry("HR@1".into())
            .or_default()
            .insert("edgex_core_data".into(), 0.25);
        report.miss_counter = 3;
        report
    }

    #[test]
    fn test_summary_tables() {
        let mut by_fault = BTreeMap::new();
        by_fault.insert("delay".to_string(), report());
        let result = EvaluationResult {
            datasets: vec!["run".into()],
            generated_at: Utc::now(),
            total_rows: 8,
            incident_rows: 4,
            thresholds: vec![0.2, 0.3],
            overall: report(),
            by_fault,
            miss_ratio: 0.75,
            rca_time: Spread::of(&[1.0, 3.0]),
            training_time: Spread::of(&[10.0]),
            sweep: (0..10)
                .map(|i| SweepPoint {
                    threshold: i as f64 / 10.0,
                    accuracy: 0.5,
                    mrr: 0.25,
                })
                .collect(),
        };
        let md = generate_summary(&result);

        assert!(md.starts_with("# RCA Evaluation Summary"));
        assert!(md.contains("| 1 | 8 | 4 | 0.750 | 0.200, 0.300 |"));
        assert!(md.contains("## delay faults"));
        assert!(md.contains("| All | 0.750 | 1.000 | - | - |"));
        assert!(md.contains("| edgex_core_data | 0.250 | - | - | - | 0.625 |"));
        assert!(md.contains("Missed incidents: 3"));
        assert!(md.contains("| Root cause analysis | 2.00 | 1.41 | 2 |"));
        // every fifth sweep point
        assert!(md.contains("| 0.00 | 0.500 | 0.250 |"));
        assert!(md.contains("| 0.50 | 0.500 | 0.250 |"));
        assert!(!md.contains("| 0.10 | 0.500 | 0.250 |"));
    }

    #[test]
    fn test_aggregate_row_comes_first() {
        let mut a = BTreeMap::new();
        a.insert("Multiple".to_string(), 1.0);
        a.insert(ALL.to_string(), 1.0);
        a.insert("edgex_redis".to_string(), 1.0);
        assert_eq!(row_keys(&[&a]), vec!["All", "Multiple", "edgex_redis"]);
    }
}
