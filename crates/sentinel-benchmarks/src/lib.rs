//! RCA-Sentinel Benchmarks Library
//!
//! Offline evaluation of replay records produced by the `replay` command.
//!
//! ## Components
//!
//! - **`kpi`**: detection metrics (accuracy, recall, FPR, FNR), threshold
//!   calibration, hit rate at k, mean reciprocal rank and fault-type recall
//! - **`EvaluationResult`**: aggregated KPIs for a folder of records
//! - **`EvaluationIO`**: reads records and writes results and summaries
//! - **`generate_summary()`**: markdown tables for an evaluation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rca_sentinel_benchmarks::{run_and_save_evaluation, EvaluationIO};
//!
//! fn main() -> anyhow::Result<()> {
//!     let io = EvaluationIO::new("results", "evaluation");
//!     let (result, summary_path) = run_and_save_evaluation(&io, 42)?;
//!     println!("{}", result);
//!     println!("Summary written to: {:?}", summary_path);
//!     Ok(())
//! }
//! ```

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod kpi;

mod io;
mod markdown;
mod result;

pub use io::{EvaluationIO, DEFAULT_OUTPUT_DIR, EXPECTED_ROWS, SUMMARY_FILE};
pub use markdown::generate_summary;
pub use result::EvaluationResult;

use chrono::Utc;
use kpi::{chunked_kpis, filter_by_fault, rca_times, threshold_sweep, training_times, Spread};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rca_sentinel_core::events::{CheckResult, ReplayRecord};
use rca_sentinel_core::types::FaultType;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

/// Fault types evaluated separately
const EVALUATED_FAULTS: [FaultType; 4] = [
    FaultType::Delay,
    FaultType::Cpu,
    FaultType::Memory,
    FaultType::Availability,
];

/// Evaluate a set of replay records.
///
/// Thresholds are calibrated chunk by chunk over all rows, then reused for
/// each fault type's subset. Normal rows are sampled with `rng`.
pub fn evaluate<R: Rng + ?Sized>(
    datasets: &[(String, ReplayRecord)],
    rng: &mut R,
) -> EvaluationResult {
    let records: Vec<ReplayRecord> = datasets.iter().map(|(_, r)| r.clone()).collect();
    let results: Vec<CheckResult> = records
        .iter()
        .flat_map(|r| r.test_results.iter().cloned())
        .collect();
    info!(
        datasets = datasets.len(),
        rows = results.len(),
        "Evaluating replay records"
    );

    let training_time = Spread::of(&training_times(&records));
    let rca_time = Spread::of(&rca_times(&results));
    info!(
        mean = training_time.mean,
        std = training_time.std,
        "Training time"
    );
    info!(mean = rca_time.mean, std = rca_time.std, "RCA time");

    let sweep = threshold_sweep(&results);
    let overall = chunked_kpis(&results, None, rng);

    let incident_rows = results.iter().filter(|r| r.is_actual_incident()).count();
    let miss_ratio = overall.report.miss_counter as f64 / incident_rows.max(1) as f64;
    info!(
        missed = overall.report.miss_counter,
        incidents = incident_rows,
        miss_ratio,
        "Miss ratio"
    );

    let mut by_fault = BTreeMap::new();
    for fault in EVALUATED_FAULTS {
        let subset = filter_by_fault(&results, fault, rng);
        if !subset.iter().any(CheckResult::is_actual_incident) {
            continue;
        }
        let chunked = chunked_kpis(&subset, Some(&overall.thresholds), rng);
        by_fault.insert(fault.as_str().to_string(), chunked.report);
    }

    EvaluationResult {
        datasets: datasets.iter().map(|(tag, _)| tag.clone()).collect(),
        generated_at: Utc::now(),
        total_rows: results.len(),
        incident_rows,
        thresholds: overall.thresholds,
        overall: overall.report,
        by_fault,
        miss_ratio,
        rca_time,
        training_time,
        sweep,
    }
}

/// Evaluate every record under the IO's results directory and write the
/// evaluation JSON plus the markdown summary.
///
/// # Returns
///
/// The evaluation and the summary path.
pub fn run_and_save_evaluation(
    io: &EvaluationIO,
    seed: u64,
) -> anyhow::Result<(EvaluationResult, PathBuf)> {
    let datasets = io.read_all_records()?;
    if datasets.is_empty() {
        anyhow::bail!("No replay records found in {:?}", io.results_dir());
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let result = evaluate(&datasets, &mut rng);

    io.write_evaluation(&result)?;
    let summary = generate_summary(&result);
    let summary_path = io.write_summary(&summary)?;

    Ok((result, summary_path))
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use super::io::EvaluationIO;
    pub use super::kpi::{kpis, ml_metrics, optimal_threshold, KpiReport, MlMetrics};
    pub use super::markdown::generate_summary;
    pub use super::result::EvaluationResult;
    pub use super::{evaluate, run_and_save_evaluation};
}
