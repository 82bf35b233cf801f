//! Result export: score dumps, submission table and run manifest

use crate::types::patient::PatientRecord;
use crate::types::scores::{ScoreMatrix, CONDITION_LABELS, NUM_CONDITIONS};
use anyhow::{ensure, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Write a headerless comma-separated dump of `matrix`, one line per row.
///
/// Values use 18 fractional digits and a signed two-digit exponent
/// (`2.500000000000000000e-01`).
pub fn write_matrix(path: &Path, matrix: &ScoreMatrix) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut w = BufWriter::new(file);

    for row in matrix.as_array().rows() {
        let line: Vec<String> = row.iter().map(|&v| format_scientific(v as f64)).collect();
        writeln!(w, "{}", line.join(","))?;
    }

    w.flush()?;
    Ok(())
}

/// Write the submission table: `ID` followed by one column per condition.
///
/// Row `i` of `scores` is attached to `records[i]`; column `k` is written
/// under `CONDITION_LABELS[k]`.
pub fn write_submission(path: &Path, records: &[PatientRecord], scores: &ScoreMatrix) -> Result<()> {
    ensure!(
        records.len() == scores.rows(),
        "{} patient records but {} score rows",
        records.len(),
        scores.rows()
    );
    ensure!(
        scores.cols() == NUM_CONDITIONS,
        "expected {} score columns, got {}",
        NUM_CONDITIONS,
        scores.cols()
    );

    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut w = BufWriter::new(file);

    writeln!(w, "ID,{}", CONDITION_LABELS.join(","))?;
    for (i, record) in records.iter().enumerate() {
        let values: Vec<String> = scores.row(i).iter().map(|v| v.to_string()).collect();
        writeln!(w, "{},{}", record.id, values.join(","))?;
    }

    w.flush()?;
    Ok(())
}

/// `%.18e` formatting with a sign and at least two exponent digits
pub fn format_scientific(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let formatted = format!("{:.18e}", value);
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => formatted,
    }
}

/// Per-model entry of the run manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSummary {
    pub name: String,
    pub weight: f32,
    /// Side-combined score dump
    pub scores_file: PathBuf,
    /// Mean side-combined score per condition, in label order
    pub mean_scores: Vec<f32>,
}

/// Description of one completed run, written next to the submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub seed: u64,
    pub rounds: usize,
    pub patients: usize,
    pub labels: Vec<String>,
    pub models: Vec<ModelSummary>,
    pub submission: PathBuf,
    pub crop_fallbacks: u64,
}

impl RunManifest {
    pub fn new(started_at: DateTime<Utc>, seed: u64, rounds: usize, patients: usize) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at,
            finished_at: started_at,
            seed,
            rounds,
            patients,
            labels: CONDITION_LABELS.iter().map(|l| l.to_string()).collect(),
            models: Vec::new(),
            submission: PathBuf::new(),
            crop_fallbacks: 0,
        }
    }

    /// Write as pretty-printed JSON
    pub fn write(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut w = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut w, self)?;
        writeln!(w)?;
        w.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_scientific_format() {
        assert_eq!(format_scientific(1.0), "1.000000000000000000e+00");
        assert_eq!(format_scientific(0.25), "2.500000000000000000e-01");
        assert_eq!(format_scientific(0.0), "0.000000000000000000e+00");
        assert_eq!(format_scientific(-1234.5), "-1.234500000000000000e+03");
        // Nearest f64 to 1e-120 lies just below it
        assert_eq!(format_scientific(1e-120), "9.999999999999999786e-121");
    }

    #[test]
    fn test_submission_column_mapping() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("submission.csv");

        // Cell value encodes its column so any transposition shows up
        let scores = ScoreMatrix::new(Array2::from_shape_fn((2, NUM_CONDITIONS), |(r, c)| {
            (r * 10 + c) as f32
        }));
        let records = PatientRecord::from_ids(["1000", "1001"], "_left.jpg", "_right.jpg");
        write_submission(&path, &records, &scores).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ID,N,D,G,C,A,H,M,O");
        assert_eq!(lines[1], "1000,0,1,2,3,4,5,6,7");
        assert_eq!(lines[2], "1001,10,11,12,13,14,15,16,17");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_submission_rejects_misaligned_rows() {
        let dir = tempfile::TempDir::new().unwrap();
        let scores = ScoreMatrix::new(Array2::zeros((1, NUM_CONDITIONS)));
        let records = PatientRecord::from_ids(["1", "2"], "_l", "_r");
        assert!(write_submission(&dir.path().join("s.csv"), &records, &scores).is_err());
    }

    #[test]
    fn test_matrix_dump() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("exp_3.csv");
        let scores = ScoreMatrix::new(ndarray::array![[0.5, 1.0], [0.0, 0.25]]);
        write_matrix(&path, &scores).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "5.000000000000000000e-01,1.000000000000000000e+00\n\
             0.000000000000000000e+00,2.500000000000000000e-01\n"
        );
    }

    #[test]
    fn test_manifest_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("run_manifest.json");
        let mut manifest = RunManifest::new(Utc::now(), 123456, 10, 2);
        manifest.models.push(ModelSummary {
            name: "exp_3".to_string(),
            weight: 0.8,
            scores_file: PathBuf::from("exp_3.csv"),
            mean_scores: vec![0.1; NUM_CONDITIONS],
        });
        manifest.write(&path).unwrap();

        let read: RunManifest =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(read.run_id, manifest.run_id);
        assert_eq!(read.labels.len(), NUM_CONDITIONS);
        assert_eq!(read.models[0].name, "exp_3");
    }
}
