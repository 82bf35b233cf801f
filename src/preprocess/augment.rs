//! Random geometric augmentation around the deterministic normalizer.

use crate::config::{AugmentationConfig, PreprocessConfig};
use crate::preprocess::normalizer::ImageNormalizer;
use image::imageops;
use image::{DynamicImage, GenericImage, Luma, Pixel, Rgb, RgbImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use ndarray::Array3;
use rand::Rng;

/// One draw of the random transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AugmentParams {
    /// Rotation about the image centre, degrees
    pub angle_degrees: f32,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
}

impl AugmentParams {
    /// Identity transform
    pub fn identity() -> Self {
        Self {
            angle_degrees: 0.0,
            flip_horizontal: false,
            flip_vertical: false,
        }
    }

    /// Sample rotation, then horizontal flip, then vertical flip
    pub fn draw<R: Rng + ?Sized>(config: &AugmentationConfig, rng: &mut R) -> Self {
        let angle_degrees = if config.rotation_range > 0.0 {
            rng.gen_range(0.0..config.rotation_range)
        } else {
            0.0
        };
        let flip_horizontal = rng.gen_bool(config.horizontal_flip);
        let flip_vertical = rng.gen_bool(config.vertical_flip);
        Self {
            angle_degrees,
            flip_horizontal,
            flip_vertical,
        }
    }

    /// Apply the geometric part of the transform, keeping the channel count
    pub fn apply(&self, image: &DynamicImage) -> DynamicImage {
        match image {
            DynamicImage::ImageLuma8(gray) => {
                let mut gray = rotate(gray, self.angle_degrees, Luma([0]));
                self.flip(&mut gray);
                DynamicImage::ImageLuma8(gray)
            }
            other => {
                let rgb: RgbImage = other.to_rgb8();
                let mut rgb = rotate(&rgb, self.angle_degrees, Rgb([0, 0, 0]));
                self.flip(&mut rgb);
                DynamicImage::ImageRgb8(rgb)
            }
        }
    }

    fn flip<I: GenericImage>(&self, image: &mut I) {
        if self.flip_horizontal {
            imageops::flip_horizontal_in_place(image);
        }
        if self.flip_vertical {
            imageops::flip_vertical_in_place(image);
        }
    }
}

fn rotate<P>(image: &image::ImageBuffer<P, Vec<u8>>, degrees: f32, fill: P) -> image::ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8> + Send + Sync,
{
    if degrees == 0.0 {
        return image.clone();
    }
    rotate_about_center(image, degrees.to_radians(), Interpolation::Bilinear, fill)
}

/// Produces one randomly augmented, normalized and rescaled sample per call.
#[derive(Debug)]
pub struct AugmentedSampler {
    normalizer: ImageNormalizer,
    augmentation: AugmentationConfig,
    rescale: f32,
}

impl AugmentedSampler {
    pub fn new(preprocess: &PreprocessConfig, augmentation: &AugmentationConfig) -> Self {
        Self {
            normalizer: ImageNormalizer::new(preprocess),
            augmentation: augmentation.clone(),
            rescale: preprocess.rescale,
        }
    }

    pub fn normalizer(&self) -> &ImageNormalizer {
        &self.normalizer
    }

    /// Side length of every produced sample
    pub fn size(&self) -> u32 {
        self.normalizer.size()
    }

    /// Draw a fresh transform and produce an (H, W, 3) sample
    pub fn sample<R: Rng + ?Sized>(&self, image: &DynamicImage, rng: &mut R) -> Array3<f32> {
        let params = AugmentParams::draw(&self.augmentation, rng);
        self.sample_with(image, &params)
    }

    /// Produce the sample for fixed transform parameters
    pub fn sample_with(&self, image: &DynamicImage, params: &AugmentParams) -> Array3<f32> {
        let normalized = self.normalizer.normalize(&params.apply(image));
        to_tensor(&normalized, self.rescale)
    }
}

/// HWC float array of an RGB image scaled by `rescale`
pub fn to_tensor(image: &RgbImage, rescale: f32) -> Array3<f32> {
    let (width, height) = image.dimensions();
    Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
        image.get_pixel(x as u32, y as u32).0[c] as f32 * rescale
    })
}
