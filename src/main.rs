//! ODIR TTA Ensemble - Main Entry Point
//!
//! Loads the ensemble members, runs test-time augmented inference over both
//! eyes of every patient and writes the submission table.

use anyhow::Result;
use odir_ensemble::{
    config::{AppConfig, LoggingConfig},
    metrics::PipelineMetrics,
    models::{loader::ModelLoader, OnnxModel, ScoreModel},
    pipeline::EnsemblePipeline,
};
use std::sync::Arc;
use tracing::info;

fn main() -> Result<()> {
    // Load configuration
    let config = match std::env::var_os("ODIR_ENSEMBLE_CONFIG") {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };

    // Initialize logging
    init_logging(&config.logging)?;

    info!("Starting ODIR TTA ensemble");
    info!(
        "TTA: {} rounds, seed {}, batch size {}, image size {}",
        config.tta.rounds,
        config.tta.seed,
        config.tta.batch_size,
        config.preprocess.image_size
    );

    // Load every ensemble member; failure here aborts the run
    let loader = ModelLoader::with_threads(config.models.onnx_threads)?;
    let mut models: Vec<Box<dyn ScoreModel>> = loader
        .load_all_models(&config.models.entries)?
        .into_iter()
        .map(|model| Box::new(OnnxModel::new(model)) as Box<dyn ScoreModel>)
        .collect();
    info!(
        "Ensemble weights: {:?}",
        config
            .models
            .entries
            .iter()
            .map(|e| (e.name.as_str(), e.weight))
            .collect::<Vec<_>>()
    );

    let metrics = Arc::new(PipelineMetrics::new());
    let pipeline = EnsemblePipeline::new(config, metrics.clone());
    let output = pipeline.run_from_disk(&mut models)?;

    info!(
        run_id = %output.manifest.run_id,
        patients = output.final_scores.rows(),
        submission = %output.manifest.submission.display(),
        "Ensemble run finished"
    );
    metrics.print_summary();

    Ok(())
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("odir_ensemble={}", logging.level).parse()?);

    if logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}
