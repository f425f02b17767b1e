//! # RCA-Sentinel Core
//!
//! Shared building blocks for the RCA-Sentinel workspace:
//! - Error taxonomy (`Error`, `Result`)
//! - YAML configuration (`config::Config`)
//! - Column categories and fault codes (`types`)
//! - Columnar metric matrices (`frame`)
//! - SLA contract (`sla`)
//! - Predictions, incident reports and check results (`events`)

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod sla;
pub mod types;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{
        Config, DataConfig, DiscretizationConfig, ModelType, RetryPolicy, ServingConfig,
        StorageConfig, TrainingConfig,
    };
    pub use crate::error::{Error, Result};
    pub use crate::events::{
        CheckResult, ReplayRecord, ContractInfo, IncidentReport, Prediction, SlaViolation,
        ViolationDetails,
    };
    pub use crate::frame::{DiscreteFrame, MetricFrame, Observation};
    pub use crate::sla::{ServiceLevelAgreement, SlaBound, SlaMap};
    pub use crate::types::{ColumnClassifier, FaultType, MetricCategory};
}
