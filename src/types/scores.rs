//! Score matrices produced by the models and their aggregations

use anyhow::{bail, ensure, Result};
use ndarray::{Array2, ArrayView1, Axis};

/// Number of condition labels predicted per image
pub const NUM_CONDITIONS: usize = 8;

/// Condition labels in model output column order
pub const CONDITION_LABELS: [&str; NUM_CONDITIONS] = ["N", "D", "G", "C", "A", "H", "M", "O"];

/// Per-input condition scores; row `i` belongs to input `i`.
///
/// Arithmetic never mutates its operands and fails on shape mismatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreMatrix {
    scores: Array2<f32>,
}

impl ScoreMatrix {
    pub fn new(scores: Array2<f32>) -> Self {
        Self { scores }
    }

    /// Build from row vectors; all rows must have the same width
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        ensure!(
            rows.iter().all(|r| r.len() == width),
            "ragged score rows: expected width {}",
            width
        );
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        let scores = Array2::from_shape_vec((rows.len(), width), flat)?;
        Ok(Self { scores })
    }

    /// Empty matrix with a fixed column count, ready to receive rows
    pub fn empty(cols: usize) -> Self {
        Self {
            scores: Array2::zeros((0, cols)),
        }
    }

    pub fn rows(&self) -> usize {
        self.scores.nrows()
    }

    pub fn cols(&self) -> usize {
        self.scores.ncols()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.scores.dim()
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, f32> {
        self.scores.row(index)
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        self.scores.get((row, col)).copied()
    }

    pub fn as_array(&self) -> &Array2<f32> {
        &self.scores
    }

    pub fn into_array(self) -> Array2<f32> {
        self.scores
    }

    /// Append the rows of a batch result below the existing rows
    pub fn append_rows(&mut self, batch: &ScoreMatrix) -> Result<()> {
        ensure!(
            batch.cols() == self.cols(),
            "cannot append {} columns to a matrix with {}",
            batch.cols(),
            self.cols()
        );
        self.scores.append(Axis(0), batch.scores.view())?;
        Ok(())
    }

    /// Column means, one per condition
    pub fn column_means(&self) -> Vec<f32> {
        match self.scores.mean_axis(Axis(0)) {
            Some(means) => means.to_vec(),
            None => vec![0.0; self.cols()],
        }
    }

    /// Element-wise arithmetic mean of equally shaped matrices
    pub fn mean(matrices: &[ScoreMatrix]) -> Result<ScoreMatrix> {
        let Some(first) = matrices.first() else {
            bail!("cannot average zero score matrices");
        };
        let mut sum = Array2::<f32>::zeros(first.shape());
        for matrix in matrices {
            ensure_same_shape(first, matrix)?;
            sum += &matrix.scores;
        }
        sum /= matrices.len() as f32;
        Ok(ScoreMatrix::new(sum))
    }

    /// `sum_k weight_k * matrix_k`; weights are used as given, not normalized
    pub fn weighted_sum(terms: &[(f32, &ScoreMatrix)]) -> Result<ScoreMatrix> {
        let Some((_, first)) = terms.first() else {
            bail!("cannot combine zero score matrices");
        };
        let mut sum = Array2::<f32>::zeros(first.shape());
        for (weight, matrix) in terms {
            ensure_same_shape(first, matrix)?;
            sum.scaled_add(*weight, &matrix.scores);
        }
        Ok(ScoreMatrix::new(sum))
    }
}

fn ensure_same_shape(expected: &ScoreMatrix, actual: &ScoreMatrix) -> Result<()> {
    ensure!(
        expected.shape() == actual.shape(),
        "score matrix shape mismatch: {:?} vs {:?}",
        expected.shape(),
        actual.shape()
    );
    Ok(())
}
