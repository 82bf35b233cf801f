//! Type definitions for the ensemble pipeline

pub mod patient;
pub mod scores;

pub use patient::{PatientRecord, Side};
pub use scores::{ScoreMatrix, CONDITION_LABELS, NUM_CONDITIONS};
