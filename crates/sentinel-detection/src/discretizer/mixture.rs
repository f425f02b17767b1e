//! One-dimensional Gaussian mixture backed by `linfa-clustering`.
//!
//! The requested component count is capped by the number of distinct
//! readings, and every component keeps a covariance of at least a hundredth
//! of the squared bandwidth so spikes of identical readings stay finite.
//! The default generator of the fit parameters is seeded, which makes
//! repeated fits of the same series identical.

use linfa::traits::{Fit, Predict};
use linfa::DatasetBase;
use linfa_clustering::GaussianMixtureModel;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Smallest covariance regularisation applied to every component
pub const VARIANCE_FLOOR: f64 = 1e-6;

/// Independent initialisations per fit; the best likelihood wins
const N_RUNS: u64 = 4;

/// Fit parameters
#[derive(Debug, Clone, Copy)]
pub struct MixtureParams {
    /// Components to fit
    pub n_components: usize,
    /// EM iteration cap
    pub max_iterations: usize,
    /// Convergence tolerance of the lower bound
    pub tolerance: f64,
    /// Spread of the normalised series
    pub bandwidth: f64,
}

impl MixtureParams {
    fn regularization(&self) -> f64 {
        (self.bandwidth * 0.1).powi(2).max(VARIANCE_FLOOR)
    }
}

/// Why a fit failed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MixtureError {
    /// No data points
    #[error("no data points to fit")]
    Empty,
    /// Non-finite input
    #[error("non-finite value in data")]
    NotFinite,
    /// The EM fit itself failed, typically on an emptied component
    #[error("mixture fit failed: {0}")]
    Fit(String),
}

/// Fitted mixture
#[derive(Debug, Serialize, Deserialize)]
pub struct GaussianMixture {
    n_components: usize,
    model: GaussianMixtureModel<f64>,
}

fn column(data: &[f64]) -> Array2<f64> {
    Array2::from_shape_fn((data.len(), 1), |(row, _)| data[row])
}

impl GaussianMixture {
    /// Fit a mixture to `data`
    pub fn fit(data: &[f64], params: MixtureParams) -> Result<Self, MixtureError> {
        if data.is_empty() {
            return Err(MixtureError::Empty);
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(MixtureError::NotFinite);
        }

        let mut distinct = data.to_vec();
        distinct.sort_by(f64::total_cmp);
        distinct.dedup();
        let n_components = params.n_components.clamp(1, distinct.len());

        let dataset = DatasetBase::from(column(data));
        let model = GaussianMixtureModel::<f64>::params(n_components)
            .n_runs(N_RUNS)
            .max_n_iterations(params.max_iterations as u64)
            .tolerance(params.tolerance)
            .reg_covariance(params.regularization())
            .fit(&dataset)
            .map_err(|e| MixtureError::Fit(e.to_string()))?;

        Ok(Self {
            n_components,
            model,
        })
    }

    /// Number of components
    pub fn n_components(&self) -> usize {
        self.n_components
    }

    /// Component means
    pub fn means(&self) -> Vec<f64> {
        self.model.means().iter().copied().collect()
    }

    /// Most likely component of one value
    pub fn predict(&self, x: f64) -> usize {
        self.predict_all(&[x]).first().copied().unwrap_or(0)
    }

    /// Predict every value of a series
    pub fn predict_all(&self, data: &[f64]) -> Vec<usize> {
        if data.is_empty() {
            return Vec::new();
        }
        self.model.predict(&column(data)).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(k: usize) -> MixtureParams {
        MixtureParams {
            n_components: k,
            max_iterations: 200,
            tolerance: 1e-6,
            bandwidth: 0.1,
        }
    }

    #[test]
    fn test_separates_two_groups() {
        let mut data: Vec<f64> = (0..40).map(|i| 0.1 + (i % 5) as f64 * 0.01).collect();
        data.extend((0..10).map(|i| 0.9 + (i % 3) as f64 * 0.01));
        let mixture = GaussianMixture::fit(&data, params(2)).unwrap();
        let labels = mixture.predict_all(&data);
        assert!(labels[..40].iter().all(|l| *l == labels[0]));
        assert!(labels[40..].iter().all(|l| *l == labels[40]));
        assert_ne!(labels[0], labels[40]);
        assert_eq!(mixture.means().len(), 2);
    }

    #[test]
    fn test_constant_series_uses_one_component() {
        let data = vec![0.5; 30];
        let mixture = GaussianMixture::fit(&data, params(3)).unwrap();
        assert_eq!(mixture.n_components(), 1);
        assert!(mixture.predict_all(&data).iter().all(|l| *l == 0));
    }

    #[test]
    fn test_rejects_non_finite_and_empty() {
        assert_eq!(
            GaussianMixture::fit(&[], params(3)).unwrap_err(),
            MixtureError::Empty
        );
        assert_eq!(
            GaussianMixture::fit(&[1.0, f64::NAN], params(3)).unwrap_err(),
            MixtureError::NotFinite
        );
    }

    #[test]
    fn test_roundtrips_through_json() {
        let data: Vec<f64> = (0..30).map(|i| if i < 20 { 0.1 } else { 0.8 }).collect();
        let mixture = GaussianMixture::fit(&data, params(2)).unwrap();
        let restored: GaussianMixture =
            serde_json::from_str(&serde_json::to_string(&mixture).unwrap()).unwrap();
        assert_eq!(restored.predict_all(&data), mixture.predict_all(&data));
    }
}
