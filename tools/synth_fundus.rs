//! Synthetic Fundus Dataset Generator
//!
//! Writes fundus-like test images for both eyes plus the identifier list,
//! so the pipeline can be smoke-run without the ODIR test set.

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Image side length before the circular field of view is placed
const CANVAS: u32 = 640;

/// Fundus image generator for testing
struct FundusGenerator {
    rng: StdRng,
    patient_counter: u64,
}

impl FundusGenerator {
    fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            patient_counter: 0,
        }
    }

    fn next_id(&mut self) -> String {
        self.patient_counter += 1;
        format!("{}", 1000 + self.patient_counter)
    }

    /// A reddish disk on black, with a brighter optic disc and a few vessels
    fn generate(&mut self) -> RgbImage {
        let width = CANVAS + self.rng.gen_range(0..160);
        let height = CANVAS;
        let mut img = RgbImage::new(width, height);

        let cx = width as f32 / 2.0 + self.rng.gen_range(-20.0..20.0);
        let cy = height as f32 / 2.0 + self.rng.gen_range(-20.0..20.0);
        let radius = height as f32 * self.rng.gen_range(0.38..0.46);

        let base = [
            self.rng.gen_range(150..220) as f32,
            self.rng.gen_range(60..110) as f32,
            self.rng.gen_range(20..50) as f32,
        ];

        let disc_angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
        let disc_x = cx + radius * 0.55 * disc_angle.cos();
        let disc_y = cy + radius * 0.55 * disc_angle.sin();
        let disc_radius = radius * 0.12;

        let vessels: Vec<f32> = (0..self.rng.gen_range(3..7))
            .map(|_| self.rng.gen_range(0.0..std::f32::consts::TAU))
            .collect();

        for (x, y, pixel) in img.enumerate_pixels_mut() {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let dist = (dx * dx + dy * dy).sqrt();
            if dist > radius {
                continue;
            }

            // Vignetting towards the rim
            let falloff = 1.0 - 0.45 * (dist / radius).powi(2);
            let mut rgb = base.map(|c| c * falloff);

            let ddx = x as f32 - disc_x;
            let ddy = y as f32 - disc_y;
            if (ddx * ddx + ddy * ddy).sqrt() < disc_radius {
                rgb = [250.0, 220.0, 170.0];
            } else {
                let angle = ddy.atan2(ddx);
                let on_vessel = vessels.iter().any(|&v| {
                    let delta = (angle - v).sin().abs();
                    delta < 0.015 + 0.02 * (1.0 - dist / radius)
                });
                if on_vessel {
                    rgb = rgb.map(|c| c * 0.55);
                }
            }

            let noise = self.rng.gen_range(-6.0..6.0);
            *pixel = Rgb(rgb.map(|c| (c + noise).clamp(0.0, 255.0) as u8));
        }

        img
    }
}

fn write_ids(path: &Path, ids: &[String]) -> Result<()> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writeln!(file, "ID")?;
    for id in ids {
        writeln!(file, "{}", id)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("synth_fundus=info".parse()?),
        )
        .init();

    info!("Starting synthetic fundus generator");

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let out_dir = PathBuf::from(args.get(1).map(|s| s.as_str()).unwrap_or("extra_data/synthetic"));
    let count: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(12);
    let seed: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(123456);

    info!(
        out_dir = %out_dir.display(),
        count = count,
        seed = seed,
        "Configuration loaded"
    );

    let images_dir = out_dir.join("images");
    std::fs::create_dir_all(&images_dir)
        .with_context(|| format!("failed to create {}", images_dir.display()))?;

    let mut generator = FundusGenerator::new(seed);
    let mut ids = Vec::with_capacity(count as usize);

    for i in 0..count {
        let id = generator.next_id();
        for side in ["left", "right"] {
            let path = images_dir.join(format!("{id}_{side}.jpg"));
            generator
                .generate()
                .save(&path)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        ids.push(id);

        if (i + 1) % 10 == 0 {
            info!("Generated {}/{} patients", i + 1, count);
        }
    }

    let ids_csv = out_dir.join("ids.csv");
    write_ids(&ids_csv, &ids)?;

    info!(
        "Completed! {} patients under {}, identifiers in {}",
        ids.len(),
        images_dir.display(),
        ids_csv.display()
    );

    Ok(())
}
