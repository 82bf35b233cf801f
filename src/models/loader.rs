//! ONNX model loader

use crate::config::ModelEntry;
use anyhow::{bail, Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use tracing::info;

/// Loaded ONNX model with metadata
pub struct LoadedModel {
    /// Model name
    pub name: String,
    /// ONNX Runtime session
    pub session: Session,
    /// Input name for the model
    pub input_name: String,
    /// Output name for the condition scores
    pub output_name: String,
}

/// Loader for ONNX models
pub struct ModelLoader {
    /// Number of threads for ONNX inference
    onnx_threads: usize,
}

impl ModelLoader {
    /// Create a new model loader with default settings (1 thread)
    pub fn new() -> Result<Self> {
        Self::with_threads(1)
    }

    /// Create a new model loader with specified number of threads
    pub fn with_threads(onnx_threads: usize) -> Result<Self> {
        // Initialize ONNX Runtime
        ort::init().commit()?;
        info!(onnx_threads = onnx_threads, "ONNX Runtime initialized");
        Ok(Self { onnx_threads })
    }

    /// Load one ensemble member.
    ///
    /// The graph file and, when configured, its external weights blob must
    /// both exist. ONNX Runtime resolves external data relative to the graph,
    /// so the blob has to sit in the graph's directory.
    pub fn load_model(&self, entry: &ModelEntry) -> Result<LoadedModel> {
        let path = entry.path.as_path();
        if !path.is_file() {
            bail!("model file for '{}' not found: {}", entry.name, path.display());
        }
        if let Some(weights) = &entry.weights {
            check_weights(&entry.name, path, weights)?;
        }

        info!(model = %entry.name, path = %path.display(), threads = self.onnx_threads, "Loading ONNX model");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.onnx_threads)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model '{}' from {:?}", entry.name, path))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .with_context(|| format!("model '{}' declares no inputs", entry.name))?;

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob"))
            .or_else(|| session.outputs.first())
            .map(|o| o.name.clone())
            .with_context(|| format!("model '{}' declares no outputs", entry.name))?;

        info!(
            model = %entry.name,
            input = %input_name,
            output = %output_name,
            "Model loaded successfully"
        );

        Ok(LoadedModel {
            name: entry.name.clone(),
            session,
            input_name,
            output_name,
        })
    }

    /// Load every ensemble member; any failure aborts the whole load
    pub fn load_all_models(&self, entries: &[ModelEntry]) -> Result<Vec<LoadedModel>> {
        let models = entries
            .iter()
            .map(|entry| self.load_model(entry))
            .collect::<Result<Vec<_>>>()?;

        info!(count = models.len(), "Loaded {} models", models.len());

        Ok(models)
    }
}

fn check_weights(name: &str, graph: &Path, weights: &Path) -> Result<()> {
    if !weights.is_file() {
        bail!("weights for '{}' not found: {}", name, weights.display());
    }
    let graph_dir = graph.parent().unwrap_or_else(|| Path::new(""));
    let weights_dir = weights.parent().unwrap_or_else(|| Path::new(""));
    if graph_dir != weights_dir {
        bail!(
            "weights for '{}' must live next to the graph ({}), found in {}",
            name,
            graph_dir.display(),
            weights_dir.display()
        );
    }
    Ok(())
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self { onnx_threads: 1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn entry(path: PathBuf, weights: Option<PathBuf>) -> ModelEntry {
        ModelEntry {
            name: "exp_test".to_string(),
            path,
            weights,
            weight: 1.0,
            output: "exp_test.csv".to_string(),
        }
    }

    #[test]
    fn test_missing_model_is_fatal() {
        let loader = ModelLoader::default();
        let err = loader
            .load_model(&entry(PathBuf::from("does/not/exist.onnx"), None))
            .err()
            .unwrap();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_weights_must_exist_next_to_graph() {
        let dir = tempfile::TempDir::new().unwrap();
        let graph = dir.path().join("m.onnx");
        std::fs::write(&graph, b"").unwrap();

        assert!(check_weights("m", &graph, &dir.path().join("m.onnx.data")).is_err());

        let other = tempfile::TempDir::new().unwrap();
        let stray = other.path().join("m.onnx.data");
        std::fs::write(&stray, b"").unwrap();
        assert!(check_weights("m", &graph, &stray).is_err());

        let blob = dir.path().join("m.onnx.data");
        std::fs::write(&blob, b"").unwrap();
        assert!(check_weights("m", &graph, &blob).is_ok());
    }
}
