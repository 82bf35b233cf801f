//! Score combination for the multi-model ensemble

use crate::config::AppConfig;
use crate::types::scores::ScoreMatrix;
use anyhow::{ensure, Result};

/// Combines per-side and per-model score matrices with fixed weights.
///
/// Weights are applied as given; they are not normalized to sum to 1.
#[derive(Debug, Clone)]
pub struct EnsembleCombiner {
    left_weight: f32,
    right_weight: f32,
    /// One weight per model, in model order
    model_weights: Vec<f32>,
}

impl EnsembleCombiner {
    pub fn new(left_weight: f32, right_weight: f32, model_weights: Vec<f32>) -> Self {
        Self {
            left_weight,
            right_weight,
            model_weights,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.tta.left_weight,
            config.tta.right_weight,
            config.models.entries.iter().map(|e| e.weight).collect(),
        )
    }

    pub fn model_weights(&self) -> &[f32] {
        &self.model_weights
    }

    /// `left_weight * left + right_weight * right`
    pub fn combine_sides(&self, left: &ScoreMatrix, right: &ScoreMatrix) -> Result<ScoreMatrix> {
        ScoreMatrix::weighted_sum(&[(self.left_weight, left), (self.right_weight, right)])
    }

    /// Weighted sum of the side-combined matrices of every model
    pub fn combine_models(&self, side_combined: &[ScoreMatrix]) -> Result<ScoreMatrix> {
        ensure!(
            side_combined.len() == self.model_weights.len(),
            "expected {} model matrices, got {}",
            self.model_weights.len(),
            side_combined.len()
        );
        let terms: Vec<(f32, &ScoreMatrix)> = self
            .model_weights
            .iter()
            .copied()
            .zip(side_combined)
            .collect();
        ScoreMatrix::weighted_sum(&terms)
    }
}

impl Default for EnsembleCombiner {
    fn default() -> Self {
        Self::new(0.5, 0.5, vec![0.8, 0.9, 0.7])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_side_combination() {
        let combiner = EnsembleCombiner::default();
        let left = ScoreMatrix::new(array![[1.0]]);
        let right = ScoreMatrix::new(array![[3.0]]);

        let combined = combiner.combine_sides(&left, &right).unwrap();
        assert_eq!(combined, ScoreMatrix::new(array![[2.0]]));
    }

    #[test]
    fn test_weighted_model_combination() {
        let combiner = EnsembleCombiner::default();
        let side_combined = vec![
            ScoreMatrix::new(array![[2.0]]),
            ScoreMatrix::new(array![[4.0]]),
            ScoreMatrix::new(array![[6.0]]),
        ];

        let final_scores = combiner.combine_models(&side_combined).unwrap();

        // 0.8*2 + 0.9*4 + 0.7*6 = 9.4, weights are not normalized
        assert!((final_scores.get(0, 0).unwrap() - 9.4).abs() < 1e-5);
    }

    #[test]
    fn test_model_count_must_match_weights() {
        let combiner = EnsembleCombiner::default();
        let side_combined = vec![ScoreMatrix::new(array![[2.0]])];
        assert!(combiner.combine_models(&side_combined).is_err());
    }

    #[test]
    fn test_sides_must_align() {
        let combiner = EnsembleCombiner::default();
        let left = ScoreMatrix::new(array![[1.0], [2.0]]);
        let right = ScoreMatrix::new(array![[3.0]]);
        assert!(combiner.combine_sides(&left, &right).is_err());
    }

    #[test]
    fn test_from_config_uses_entry_order() {
        let combiner = EnsembleCombiner::from_config(&AppConfig::default());
        assert_eq!(combiner.model_weights(), &[0.8, 0.9, 0.7]);
    }
}
