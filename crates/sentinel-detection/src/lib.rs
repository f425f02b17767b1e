//! # RCA-Sentinel Detection
//!
//! Statistical modelling and online analysis:
//! - Metric discretization with 1-D Gaussian mixtures (`discretizer`)
//! - Column curation for training matrices and observations (`curator`)
//! - Causal structure learning under service-status constraints (`structure`)
//! - Partitioned exact inference (`inference`)
//! - Causal, random-forest and SVM fault models (`models`)
//! - Training pipeline (`training`) and the online RCA loop (`rca`)

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod curator;
pub mod discretizer;
pub mod inference;
pub mod models;
pub mod rca;
pub mod stats;
pub mod structure;
pub mod training;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::curator::{ColumnCurator, CuratedColumns, RemovalReason};
    pub use crate::discretizer::{
        ApplyOutcome, DiscretizationModel, DiscretizerSet, MetricDiscretizer,
    };
    pub use crate::inference::{compile, InferenceEngine, Marginals};
    pub use crate::models::{
        CausalModel, FaultClass, FaultModel, FaultPredictor, ForestModel, SvmModel,
    };
    pub use crate::rca::{actual_faults, CheckOutcome, RcaEngine, ServeStep, ServeSummary, ServingState};
    pub use crate::structure::{StructureLearner, StructureModel, WeightedEdge};
    pub use crate::training::{
        dataset_tag, fingerprint, split_dataset, NoopStructureCache, StructureCache, TrainedModel,
        TrainingPipeline,
    };
}
