//! ML model inference components

pub mod aggregator;
pub mod inference;
pub mod loader;
pub mod runner;
pub mod tta;

pub use aggregator::EnsembleCombiner;
pub use inference::{OnnxModel, ScoreModel};
pub use loader::ModelLoader;
pub use runner::InferenceRunner;
pub use tta::TtaAggregator;
