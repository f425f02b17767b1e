//! Small statistics helpers shared by the discretizer and the curator.

/// Arithmetic mean; `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation; `None` for an empty slice
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let mean = mean(values)?;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Median with the usual midpoint rule for even lengths; `None` for an empty slice
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Share of states equal to the median state.
///
/// An even-length window whose median falls between two states has no
/// state equal to it and scores 0.
pub fn median_state_share(states: &[u32]) -> f64 {
    let as_f64: Vec<f64> = states.iter().map(|s| f64::from(*s)).collect();
    match median(&as_f64) {
        Some(median) => {
            let hits = as_f64.iter().filter(|s| **s == median).count();
            hits as f64 / states.len() as f64
        }
        None => 0.0,
    }
}

/// Number of distinct values, treating all NaNs as one
pub fn distinct_count(values: &[f64]) -> usize {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted.dedup_by(|a, b| a.total_cmp(b).is_eq());
    sorted.len()
}
