//! Image preprocessing: normalization and test-time augmentation

pub mod augment;
pub mod normalizer;

pub use augment::{AugmentParams, AugmentedSampler};
pub use normalizer::ImageNormalizer;
