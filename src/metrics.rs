//! Performance metrics and statistics tracking for the ensemble run.

use crate::types::patient::Side;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for pipeline performance
pub struct PipelineMetrics {
    /// Augmented samples produced
    samples: AtomicU64,
    /// Model calls made
    batches: AtomicU64,
    /// Images whose background crop fell back to the full frame
    crop_fallbacks: AtomicU64,
    /// Per-batch inference times by model (microseconds per image)
    model_times: RwLock<HashMap<String, Vec<u64>>>,
    /// Wall time of every completed (model, side) TTA block
    tta_times: RwLock<Vec<(String, Side, Duration)>>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl PipelineMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            samples: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            crop_fallbacks: AtomicU64::new(0),
            model_times: RwLock::new(HashMap::new()),
            tta_times: RwLock::new(Vec::new()),
            start_time: Instant::now(),
        }
    }

    /// Record one augmented sample
    pub fn record_sample(&self) {
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one model call over `images` inputs
    pub fn record_batch(&self, model_name: &str, duration: Duration, images: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        let per_image = duration.as_micros() as u64 / images.max(1) as u64;

        if let Ok(mut times) = self.model_times.write() {
            let model_times = times
                .entry(model_name.to_string())
                .or_insert_with(Vec::new);
            model_times.push(per_image);

            // Keep only last 1000 per model
            if model_times.len() > 1000 {
                model_times.drain(0..500);
            }
        }
    }

    /// Record a finished TTA block
    pub fn record_tta(&self, model_name: &str, side: Side, duration: Duration) {
        if let Ok(mut times) = self.tta_times.write() {
            times.push((model_name.to_string(), side, duration));
        }
    }

    /// Set the crop fallback count reported by the normalizer
    pub fn set_crop_fallbacks(&self, count: u64) {
        self.crop_fallbacks.store(count, Ordering::Relaxed);
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    pub fn crop_fallbacks(&self) -> u64 {
        self.crop_fallbacks.load(Ordering::Relaxed)
    }

    /// Get per-model inference stats
    pub fn get_model_stats(&self) -> HashMap<String, ModelStats> {
        let mut stats = HashMap::new();
        let Ok(times) = self.model_times.read() else {
            return stats;
        };

        for (model, model_times) in times.iter() {
            if model_times.is_empty() {
                continue;
            }

            let mut sorted: Vec<u64> = model_times.clone();
            sorted.sort_unstable();

            let sum: u64 = sorted.iter().sum();
            let count = sorted.len();

            stats.insert(
                model.clone(),
                ModelStats {
                    calls: count as u64,
                    mean_us: sum / count as u64,
                    p50_us: sorted[count / 2],
                    p99_us: sorted[((count as f64 * 0.99) as usize).min(count - 1)],
                },
            );
        }

        stats
    }

    /// Samples per second since the collector was created
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.samples() as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let elapsed = self.start_time.elapsed();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║              ODIR TTA ENSEMBLE - RUN SUMMARY                 ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Samples: {:>9}  │  Batches: {:>7}  │  {:>7.1} img/s      ║",
            self.samples(),
            self.batches(),
            self.get_throughput()
        );
        info!(
            "║ Crop fallbacks: {:>6}  │  Elapsed: {:>8.1}s                 ║",
            self.crop_fallbacks(),
            elapsed.as_secs_f64()
        );
        info!("╚══════════════════════════════════════════════════════════════╝");

        let mut model_stats: Vec<_> = self.get_model_stats().into_iter().collect();
        model_stats.sort_by(|a, b| a.0.cmp(&b.0));
        if !model_stats.is_empty() {
            info!("Model Inference Times (μs per image):");
            for (model, stats) in &model_stats {
                info!(
                    "  {}: mean={} p50={} p99={} (calls={})",
                    model, stats.mean_us, stats.p50_us, stats.p99_us, stats.calls
                );
            }
        }

        if let Ok(tta) = self.tta_times.read() {
            for (model, side, duration) in tta.iter() {
                info!("  {} / {}: {:.1}s", model, side, duration.as_secs_f64());
            }
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Model-specific statistics
#[derive(Debug)]
pub struct ModelStats {
    pub calls: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p99_us: u64,
}
