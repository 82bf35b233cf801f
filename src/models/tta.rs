//! Test-time augmentation: repeated runs averaged element-wise

use crate::context::RunContext;
use crate::models::inference::ScoreModel;
use crate::models::runner::InferenceRunner;
use crate::source::ImageSource;
use crate::types::patient::Side;
use crate::types::scores::ScoreMatrix;
use anyhow::Result;
use std::time::Instant;
use tracing::info;

/// Averages `rounds` independent augmented inference passes.
pub struct TtaAggregator {
    runner: InferenceRunner,
    rounds: usize,
}

impl TtaAggregator {
    pub fn new(runner: InferenceRunner, rounds: usize) -> Self {
        Self {
            runner,
            rounds: rounds.max(1),
        }
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn runner(&self) -> &InferenceRunner {
        &self.runner
    }

    /// Mean score matrix of one model over one side.
    ///
    /// Round `r` draws its augmentations from
    /// `ctx.round_rng(model_index, side, r)`.
    pub fn aggregate(
        &self,
        model: &mut dyn ScoreModel,
        source: &dyn ImageSource,
        ctx: &RunContext,
        model_index: usize,
        side: Side,
    ) -> Result<ScoreMatrix> {
        let mut rounds = Vec::with_capacity(self.rounds);

        for round in 0..self.rounds {
            let started = Instant::now();
            let mut rng = ctx.round_rng(model_index, side, round);
            let scores = self.runner.run(model, source, &mut rng)?;

            info!(
                model = %model.name(),
                side = %side,
                round = round + 1,
                rounds = self.rounds,
                rows = scores.rows(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "TTA round complete"
            );
            rounds.push(scores);
        }

        ScoreMatrix::mean(&rounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AugmentationConfig, InputLayout, PreprocessConfig};
    use crate::metrics::PipelineMetrics;
    use crate::preprocess::augment::AugmentedSampler;
    use crate::source::MemorySource;
    use crate::types::scores::NUM_CONDITIONS;
    use image::DynamicImage;
    use ndarray::{Array2, ArrayView4};
    use std::sync::Arc;

    /// Puts 1.0 on the diagonal on odd calls and 3.0 on even calls
    struct RoundModel {
        calls: usize,
    }

    impl ScoreModel for RoundModel {
        fn name(&self) -> &str {
            "round"
        }

        fn predict(&mut self, batch: ArrayView4<'_, f32>) -> Result<ScoreMatrix> {
            self.calls += 1;
            let scale = if self.calls % 2 == 1 { 1.0 } else { 3.0 };
            let rows = batch.shape()[0];
            Ok(ScoreMatrix::new(Array2::from_shape_fn(
                (rows, NUM_CONDITIONS),
                |(r, c)| if r == c { scale } else { 0.0 },
            )))
        }
    }

    fn aggregator(rounds: usize, batch_size: usize) -> (TtaAggregator, Arc<PipelineMetrics>) {
        let metrics = Arc::new(PipelineMetrics::new());
        let preprocess = PreprocessConfig {
            image_size: 16,
            blur_sigma: 1.0,
            ..PreprocessConfig::default()
        };
        let runner = InferenceRunner::new(
            AugmentedSampler::new(&preprocess, &AugmentationConfig::default()),
            batch_size,
            InputLayout::Nhwc,
            metrics.clone(),
        );
        (TtaAggregator::new(runner, rounds), metrics)
    }

    #[test]
    fn test_mean_over_two_rounds() {
        let source = MemorySource::new(vec![DynamicImage::new_rgb8(8, 8); 2]);
        let (tta, metrics) = aggregator(2, 2);
        let mut model = RoundModel { calls: 0 };

        let mean = tta
            .aggregate(&mut model, &source, &RunContext::new(123456), 0, Side::Left)
            .unwrap();

        assert_eq!(mean.shape(), (2, NUM_CONDITIONS));
        assert_eq!(mean.get(0, 0), Some(2.0));
        assert_eq!(mean.get(1, 1), Some(2.0));
        assert_eq!(mean.get(0, 1), Some(0.0));
        assert_eq!(model.calls, 2);
        assert_eq!(metrics.samples(), 4);
    }

    #[test]
    fn test_aggregate_is_reproducible_per_run_seed() {
        let source = MemorySource::new(vec![DynamicImage::new_rgb8(8, 8); 3]);
        let (tta, _) = aggregator(3, 2);
        let ctx = RunContext::new(99);

        let a = tta
            .aggregate(&mut RoundModel { calls: 0 }, &source, &ctx, 1, Side::Right)
            .unwrap();
        let b = tta
            .aggregate(&mut RoundModel { calls: 0 }, &source, &ctx, 1, Side::Right)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.rows(), 3);
    }
}
