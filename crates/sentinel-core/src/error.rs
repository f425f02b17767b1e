//! Error taxonomy shared by every RCA-Sentinel crate.

use thiserror::Error;

/// Result alias used across the workspace
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by training, serving and persistence
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Degenerate, unstable or insufficient column. Handled by dropping the column.
    #[error("Data quality issue in column '{column}': {reason}")]
    DataQuality { column: String, reason: String },

    /// Mixture fit did not converge for a column
    #[error("Clustering did not converge for column '{column}': {reason}")]
    ClusteringNonconvergence { column: String, reason: String },

    /// A metric column appeared that no trained discretizer knows about
    #[error("New metric '{0}' is discovered")]
    UnseenMetric(String),

    /// The learned structure broke a root/tabu constraint
    #[error("Structural constraint violated: {0}")]
    StructuralConstraint(String),

    /// Evidence was presented to an engine that does not model the column
    #[error("Evidence column '{column}' is outside the inference engine domain")]
    EvidenceOutOfDomain { column: String },

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON or YAML (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// CSV parsing failure
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a data-quality error for a column
    pub fn data_quality(column: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::DataQuality {
            column: column.into(),
            reason: reason.into(),
        }
    }

    /// Create a clustering non-convergence error for a column
    pub fn nonconvergence(column: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ClusteringNonconvergence {
            column: column.into(),
            reason: reason.into(),
        }
    }

    /// Create a structural-constraint error
    pub fn structural(msg: impl Into<String>) -> Self {
        Error::StructuralConstraint(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Column-local failures that drop the column instead of failing training
    pub fn is_column_local(&self) -> bool {
        matches!(
            self,
            Error::DataQuality { .. } | Error::ClusteringNonconvergence { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unseen_metric_message() {
        let err = Error::UnseenMetric("cpu_edgex_new".to_string());
        assert_eq!(err.to_string(), "New metric 'cpu_edgex_new' is discovered");
    }

    #[test]
    fn test_column_local_classification() {
        assert!(Error::data_quality("a", "constant").is_column_local());
        assert!(Error::nonconvergence("a", "nan").is_column_local());
        assert!(!Error::structural("cycle").is_column_local());
        assert!(!Error::UnseenMetric("a".into()).is_column_local());
    }
}
