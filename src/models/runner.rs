//! Single inference pass over an ordered image source

use crate::config::InputLayout;
use crate::metrics::PipelineMetrics;
use crate::models::inference::ScoreModel;
use crate::preprocess::augment::AugmentedSampler;
use crate::source::ImageSource;
use crate::types::scores::{ScoreMatrix, NUM_CONDITIONS};
use anyhow::{ensure, Context, Result};
use ndarray::{Array4, Axis};
use rand::Rng;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Runs a model over every image of a source, one augmented sample per image.
pub struct InferenceRunner {
    sampler: AugmentedSampler,
    batch_size: usize,
    layout: InputLayout,
    metrics: Arc<PipelineMetrics>,
}

impl InferenceRunner {
    pub fn new(
        sampler: AugmentedSampler,
        batch_size: usize,
        layout: InputLayout,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            sampler,
            batch_size: batch_size.max(1),
            layout,
            metrics,
        }
    }

    pub fn sampler(&self) -> &AugmentedSampler {
        &self.sampler
    }

    /// Score every image of `source` in index order.
    ///
    /// Samples are drawn from `rng` in input order, so the result does not
    /// depend on the batch size. Row `i` of the result belongs to image `i`.
    pub fn run<R: Rng + ?Sized>(
        &self,
        model: &mut dyn ScoreModel,
        source: &dyn ImageSource,
        rng: &mut R,
    ) -> Result<ScoreMatrix> {
        let total = source.len();
        let mut scores = ScoreMatrix::empty(NUM_CONDITIONS);

        let mut start = 0;
        while start < total {
            let end = (start + self.batch_size).min(total);
            let batch = self.build_batch(source, start..end, rng)?;

            let started = Instant::now();
            let batch_scores = model.predict(batch.view())?;
            self.metrics
                .record_batch(model.name(), started.elapsed(), end - start);

            ensure!(
                batch_scores.rows() == end - start,
                "model '{}' returned {} rows for a batch of {}",
                model.name(),
                batch_scores.rows(),
                end - start
            );

            scores.append_rows(&batch_scores)?;

            debug!(model = %model.name(), start = start, end = end, total = total, "Batch done");
            start = end;
        }

        Ok(scores)
    }

    fn build_batch<R: Rng + ?Sized>(
        &self,
        source: &dyn ImageSource,
        indices: std::ops::Range<usize>,
        rng: &mut R,
    ) -> Result<Array4<f32>> {
        let size = self.sampler.size() as usize;
        let n = indices.len();
        let mut batch = match self.layout {
            InputLayout::Nhwc => Array4::<f32>::zeros((n, size, size, 3)),
            InputLayout::Nchw => Array4::<f32>::zeros((n, 3, size, size)),
        };

        for (slot, index) in indices.enumerate() {
            let image = source
                .load(index)
                .with_context(|| format!("failed to load input {}", index))?;
            let sample = self.sampler.sample(&image, rng);
            self.metrics.record_sample();

            let mut target = batch.index_axis_mut(Axis(0), slot);
            match self.layout {
                InputLayout::Nhwc => target.assign(&sample),
                InputLayout::Nchw => target.assign(&sample.view().permuted_axes([2, 0, 1])),
            }
        }

        Ok(batch)
    }
}
