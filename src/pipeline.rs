//! End-to-end ensemble run: TTA per model and side, combination, export

use crate::config::AppConfig;
use crate::context::RunContext;
use crate::export::{write_matrix, write_submission, ModelSummary, RunManifest};
use crate::metrics::PipelineMetrics;
use crate::models::aggregator::EnsembleCombiner;
use crate::models::inference::ScoreModel;
use crate::models::runner::InferenceRunner;
use crate::models::tta::TtaAggregator;
use crate::preprocess::augment::AugmentedSampler;
use crate::source::{DirectorySource, ImageSource};
use crate::types::patient::{load_patient_ids, PatientRecord, Side};
use crate::types::scores::ScoreMatrix;
use anyhow::{bail, ensure, Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Everything a finished run produced
#[derive(Debug)]
pub struct PipelineOutput {
    /// Weighted combination across models
    pub final_scores: ScoreMatrix,
    /// Left/right combination of every model, in model order
    pub side_combined: Vec<ScoreMatrix>,
    pub manifest: RunManifest,
}

/// One parameterized TTA pipeline applied to every (model, side) pair.
pub struct EnsemblePipeline {
    config: AppConfig,
    tta: TtaAggregator,
    combiner: EnsembleCombiner,
    metrics: Arc<PipelineMetrics>,
}

impl EnsemblePipeline {
    pub fn new(config: AppConfig, metrics: Arc<PipelineMetrics>) -> Self {
        let sampler = AugmentedSampler::new(&config.preprocess, &config.augmentation);
        let runner = InferenceRunner::new(
            sampler,
            config.tta.batch_size,
            config.models.input_layout,
            metrics.clone(),
        );
        let tta = TtaAggregator::new(runner, config.tta.rounds);
        let combiner = EnsembleCombiner::from_config(&config);

        Self {
            config,
            tta,
            combiner,
            metrics,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Patient records from the configured identifier list
    pub fn load_records(&self) -> Result<Vec<PatientRecord>> {
        let data = &self.config.data;
        let ids = load_patient_ids(&data.ids_csv, &data.id_column)?;
        info!(patients = ids.len(), path = %data.ids_csv.display(), "Identifier list loaded");
        Ok(PatientRecord::from_ids(
            ids,
            &data.left_suffix,
            &data.right_suffix,
        ))
    }

    /// Run over the configured image directory.
    ///
    /// Every image is checked for existence before any inference starts.
    pub fn run_from_disk(&self, models: &mut [Box<dyn ScoreModel>]) -> Result<PipelineOutput> {
        let records = self.load_records()?;
        let data = &self.config.data;
        let load_size = self.config.preprocess.load_size;

        let left = DirectorySource::for_side(&data.images_dir, &records, Side::Left, load_size);
        let right = DirectorySource::for_side(&data.images_dir, &records, Side::Right, load_size);

        let missing: Vec<_> = left.missing().into_iter().chain(right.missing()).collect();
        if !missing.is_empty() {
            for path in missing.iter().take(10) {
                error!(path = %path.display(), "Image file missing");
            }
            bail!(
                "{} image files missing under {}",
                missing.len(),
                data.images_dir.display()
            );
        }

        self.run(models, &records, &left, &right)
    }

    /// Run the ensemble over explicit per-side sources aligned with `records`
    pub fn run(
        &self,
        models: &mut [Box<dyn ScoreModel>],
        records: &[PatientRecord],
        left: &dyn ImageSource,
        right: &dyn ImageSource,
    ) -> Result<PipelineOutput> {
        let entries = &self.config.models.entries;
        ensure!(
            models.len() == entries.len(),
            "{} models loaded but {} configured",
            models.len(),
            entries.len()
        );
        ensure!(
            left.len() == records.len() && right.len() == records.len(),
            "side sources ({} left, {} right) do not match {} patient records",
            left.len(),
            right.len(),
            records.len()
        );

        let output_dir = &self.config.output.dir;
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("failed to create output dir {}", output_dir.display()))?;

        let ctx = RunContext::new(self.config.tta.seed);
        let mut manifest = RunManifest::new(
            Utc::now(),
            ctx.seed(),
            self.tta.rounds(),
            records.len(),
        );

        info!(
            models = models.len(),
            patients = records.len(),
            rounds = self.tta.rounds(),
            seed = ctx.seed(),
            "Starting ensemble run"
        );

        let mut side_combined = Vec::with_capacity(models.len());
        for (index, (model, entry)) in models.iter_mut().zip(entries).enumerate() {
            let mut sides = Vec::with_capacity(Side::ALL.len());
            for side in Side::ALL {
                let source = match side {
                    Side::Left => left,
                    Side::Right => right,
                };
                let started = Instant::now();
                let scores = self
                    .tta
                    .aggregate(model.as_mut(), source, &ctx, index, side)?;
                self.metrics.record_tta(&entry.name, side, started.elapsed());
                sides.push(scores);
            }

            let combined = self.combiner.combine_sides(&sides[0], &sides[1])?;
            let path = self.config.output_path(&entry.output);
            write_matrix(&path, &combined)?;
            info!(model = %entry.name, path = %path.display(), "Side-combined scores written");

            manifest.models.push(ModelSummary {
                name: entry.name.clone(),
                weight: entry.weight,
                scores_file: path,
                mean_scores: combined.column_means(),
            });
            side_combined.push(combined);
        }

        let final_scores = self.combiner.combine_models(&side_combined)?;

        let submission = self.config.output_path(&self.config.output.submission);
        write_submission(&submission, records, &final_scores)?;
        info!(path = %submission.display(), rows = final_scores.rows(), "Submission written");

        let crop_fallbacks = self.tta.runner().sampler().normalizer().crop_fallbacks();
        self.metrics.set_crop_fallbacks(crop_fallbacks);

        manifest.submission = submission;
        manifest.crop_fallbacks = crop_fallbacks;
        manifest.finished_at = Utc::now();
        manifest.write(&self.config.output_path(&self.config.output.manifest))?;

        Ok(PipelineOutput {
            final_scores,
            side_combined,
            manifest,
        })
    }
}
