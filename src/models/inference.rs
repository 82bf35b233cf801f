//! Score models: the opaque image-batch -> score-matrix functions

use crate::models::loader::LoadedModel;
use crate::types::scores::{ScoreMatrix, NUM_CONDITIONS};
use anyhow::{ensure, Context, Result};
use ndarray::{Array2, ArrayView4};
use ort::value::TensorRef;
use tracing::debug;

/// A pretrained classifier scoring a batch of preprocessed images.
///
/// Implementations must return one row per batch element, in batch order.
pub trait ScoreModel {
    /// Name used in logs and metrics
    fn name(&self) -> &str;

    /// Score a batch laid out as configured (`NHWC` or `NCHW`)
    fn predict(&mut self, batch: ArrayView4<'_, f32>) -> Result<ScoreMatrix>;
}

/// ONNX Runtime backed model
pub struct OnnxModel {
    model: LoadedModel,
}

impl OnnxModel {
    pub fn new(model: LoadedModel) -> Self {
        Self { model }
    }
}

impl From<LoadedModel> for OnnxModel {
    fn from(model: LoadedModel) -> Self {
        Self::new(model)
    }
}

impl ScoreModel for OnnxModel {
    fn name(&self) -> &str {
        &self.model.name
    }

    fn predict(&mut self, batch: ArrayView4<'_, f32>) -> Result<ScoreMatrix> {
        let rows = batch.shape()[0];
        let input_shape = batch.shape().to_vec();

        let input_tensor = TensorRef::from_array_view(batch)
            .with_context(|| format!("Failed to create input tensor {:?}", input_shape))?;

        let outputs = self
            .model
            .session
            .run(ort::inputs![self.model.input_name.as_str() => input_tensor])
            .with_context(|| format!("Inference failed for model '{}'", self.model.name))?;

        let (shape, data) = outputs[self.model.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .with_context(|| {
                format!(
                    "Failed to extract output '{}' of model '{}' as f32",
                    self.model.output_name, self.model.name
                )
            })?;
        let dims: Vec<i64> = shape.iter().copied().collect();

        ensure!(
            dims.len() == 2 && dims[0] as usize == rows && dims[1] as usize == NUM_CONDITIONS,
            "model '{}' returned shape {:?} for {} inputs, expected [{}, {}]",
            self.model.name,
            dims,
            rows,
            rows,
            NUM_CONDITIONS
        );

        debug!(model = %self.model.name, rows = rows, "Batch scored");

        let scores = Array2::from_shape_vec((rows, NUM_CONDITIONS), data.to_vec())?;
        Ok(ScoreMatrix::new(scores))
    }
}
