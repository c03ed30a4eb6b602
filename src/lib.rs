//! Preprocessing of clinical trial tables into a per-patient dataset,
//! with cohort summaries and modelling preparation on top of it.

pub mod aggregate;
pub mod assemble;
pub mod config;
pub mod derive;
pub mod error;
pub mod loader;
pub mod normalize;
pub mod pipeline;
pub mod prepare;
pub mod summary;
pub mod utils;

// Re-export the most common types for easier use
// Core types
pub use config::{CompoundGroup, FeatureConfig, PipelineConfig};
pub use error::{PipelineError, Result};
pub use pipeline::{Dataset, Pipeline, RunReport};

// Stages
pub use aggregate::{PatientAggregate, aggregate_by_patient};
pub use assemble::{DatasetAssembler, PatientRecord, read_dataset};
pub use derive::{FeatureDeriver, TreatmentCategory};
pub use loader::{Table, TableLoader, TableRole};

// Downstream analysis
pub use prepare::{PreparedSplits, prepare};
pub use summary::CohortSummary;

// Arrow types
pub use arrow::record_batch::RecordBatch;
