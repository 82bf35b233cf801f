//! ODIR TTA Ensemble Library
//!
//! Test-time augmented inference of several pretrained fundus classifiers,
//! combined into one multi-label ocular disease score table.

pub mod config;
pub mod context;
pub mod export;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod preprocess;
pub mod source;
pub mod types;

pub use config::AppConfig;
pub use context::RunContext;
pub use models::inference::{OnnxModel, ScoreModel};
pub use pipeline::{EnsemblePipeline, PipelineOutput};
pub use types::{patient::PatientRecord, scores::ScoreMatrix};
