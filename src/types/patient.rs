//! Patient records and eye sides

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Which eye an image belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Both sides in processing order
    pub const ALL: [Side; 2] = [Side::Left, Side::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One patient with the file names of both fundus images
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRecord {
    /// External identifier, written back verbatim in the submission
    pub id: String,
    /// Left eye image file name
    pub left: String,
    /// Right eye image file name
    pub right: String,
}

impl PatientRecord {
    pub fn new(id: impl Into<String>, left_suffix: &str, right_suffix: &str) -> Self {
        let id = id.into();
        Self {
            left: format!("{id}{left_suffix}"),
            right: format!("{id}{right_suffix}"),
            id,
        }
    }

    /// Image file name for one side
    pub fn image_name(&self, side: Side) -> &str {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    /// Build records for every identifier, keeping the list order
    pub fn from_ids<I, S>(ids: I, left_suffix: &str, right_suffix: &str) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ids.into_iter()
            .map(|id| Self::new(id, left_suffix, right_suffix))
            .collect()
    }
}

/// Read the identifier column of a comma-separated file with a header row.
///
/// Values are taken verbatim apart from surrounding whitespace and quotes;
/// blank lines are skipped. Fails when the column is missing or no rows remain.
pub fn load_patient_ids(path: &Path, column: &str) -> Result<Vec<String>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open identifier list {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let mut header = String::new();
    if reader.read_line(&mut header)? == 0 {
        bail!("identifier list {} is empty", path.display());
    }
    let index = split_fields(header.trim_start_matches('\u{feff}'))
        .position(|name| name == column)
        .with_context(|| {
            format!(
                "column '{}' not found in header of {}",
                column,
                path.display()
            )
        })?;

    let mut ids = Vec::new();
    let mut line = String::new();
    let mut line_no = 1usize;
    while reader.read_line(&mut line)? > 0 {
        line_no += 1;
        if line.trim().is_empty() {
            line.clear();
            continue;
        }
        let id = split_fields(&line).nth(index).with_context(|| {
            format!("{}:{}: missing column '{}'", path.display(), line_no, column)
        })?;
        ids.push(id.to_string());
        line.clear();
    }

    if ids.is_empty() {
        bail!("identifier list {} has no rows", path.display());
    }

    Ok(ids)
}

fn split_fields(line: &str) -> impl Iterator<Item = &str> {
    line.trim_end_matches(['\r', '\n'])
        .split(',')
        .map(|field| field.trim().trim_matches('"'))
}
