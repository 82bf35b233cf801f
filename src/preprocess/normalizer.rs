//! Deterministic fundus image normalization.
//!
//! Every image reaching a model goes through the same four steps:
//! channel canonicalization, background crop, square resize and a
//! blur-difference contrast enhancement recentred on mid-gray.

use crate::config::{ChannelOrder, PreprocessConfig};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Rgb, Rgb32FImage, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Crop rectangle as (x, y, width, height)
pub type CropRect = (u32, u32, u32, u32);

/// Fixed crop/resize/contrast transform.
#[derive(Debug)]
pub struct ImageNormalizer {
    size: u32,
    tolerance: u8,
    sigma: f32,
    gain: f32,
    bias: f32,
    channel_order: ChannelOrder,
    /// Images whose crop came out empty and were passed through uncropped
    crop_fallbacks: AtomicU64,
}

impl ImageNormalizer {
    pub fn new(config: &PreprocessConfig) -> Self {
        Self {
            size: config.image_size,
            tolerance: config.crop_tolerance,
            sigma: config.blur_sigma,
            gain: config.contrast_gain,
            bias: config.contrast_bias,
            channel_order: config.source_channel_order,
            crop_fallbacks: AtomicU64::new(0),
        }
    }

    /// Output side length
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Number of degenerate images seen so far
    pub fn crop_fallbacks(&self) -> u64 {
        self.crop_fallbacks.load(Ordering::Relaxed)
    }

    /// Normalize a raw image into a `size x size` RGB image.
    pub fn normalize(&self, image: &DynamicImage) -> RgbImage {
        let cropped = if image.color().channel_count() <= 2 {
            let gray = image.to_luma8();
            let cropped = self.track(crop_gray_from_mask(&gray, self.tolerance));
            DynamicImage::ImageLuma8(cropped).to_rgb8()
        } else {
            let rgb = canonicalize(image, self.channel_order);
            self.track(crop_rgb_from_gray(&rgb, self.tolerance))
        };

        let resized = imageops::resize(&cropped, self.size, self.size, FilterType::Triangle);
        enhance_contrast(&resized, self.sigma, self.gain, self.bias)
    }

    fn track<I>(&self, (image, cropped): (I, bool)) -> I {
        if !cropped {
            self.crop_fallbacks.fetch_add(1, Ordering::Relaxed);
            debug!(
                tolerance = self.tolerance,
                "No pixel above crop tolerance, keeping full frame"
            );
        }
        image
    }
}

/// RGB copy of `image`, with red and blue swapped when the source order is BGR
pub fn canonicalize(image: &DynamicImage, order: ChannelOrder) -> RgbImage {
    let mut rgb = image.to_rgb8();
    if order == ChannelOrder::Bgr {
        for pixel in rgb.pixels_mut() {
            pixel.0.swap(0, 2);
        }
    }
    rgb
}

/// Rec.601 luma, rounded to the nearest integer
pub fn luminance(pixel: &Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0;
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32)
        .round()
        .min(255.0) as u8
}

/// Bounding box of all pixels for which `is_foreground` holds.
///
/// Returns `None` when no pixel qualifies.
pub fn foreground_bounds<F>(width: u32, height: u32, is_foreground: F) -> Option<CropRect>
where
    F: Fn(u32, u32) -> bool,
{
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0;
    let mut max_y = 0;
    let mut found = false;

    for y in 0..height {
        for x in 0..width {
            if is_foreground(x, y) {
                found = true;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }
    }

    found.then(|| (min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

/// Crop a single-channel image to the pixels above `tolerance`.
///
/// The flag is `false` when nothing exceeds the tolerance; the image is then
/// returned unchanged instead of empty.
pub fn crop_gray_from_mask(image: &GrayImage, tolerance: u8) -> (GrayImage, bool) {
    let (width, height) = image.dimensions();
    match foreground_bounds(width, height, |x, y| image.get_pixel(x, y).0[0] > tolerance) {
        Some((x, y, w, h)) => (imageops::crop_imm(image, x, y, w, h).to_image(), true),
        None => (image.clone(), false),
    }
}

/// Crop an RGB image to the pixels whose luminance exceeds `tolerance`.
///
/// All channels share the crop rectangle. Same fallback as
/// [`crop_gray_from_mask`].
pub fn crop_rgb_from_gray(image: &RgbImage, tolerance: u8) -> (RgbImage, bool) {
    let (width, height) = image.dimensions();
    match foreground_bounds(width, height, |x, y| {
        luminance(image.get_pixel(x, y)) > tolerance
    }) {
        Some((x, y, w, h)) => (imageops::crop_imm(image, x, y, w, h).to_image(), true),
        None => (image.clone(), false),
    }
}

/// Blend of a pixel value with its blurred value, saturated to `u8`
pub fn contrast_blend(value: f32, blurred: f32, gain: f32, bias: f32) -> u8 {
    (gain * value - gain * blurred + bias).round().clamp(0.0, 255.0) as u8
}

/// `gain * image - gain * blur(image, sigma) + bias`, per channel.
///
/// The blur runs in `f32` so a flat image maps exactly onto `bias`.
pub fn enhance_contrast(image: &RgbImage, sigma: f32, gain: f32, bias: f32) -> RgbImage {
    let (width, height) = image.dimensions();
    let float: Rgb32FImage = Rgb32FImage::from_fn(width, height, |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        Rgb([r as f32, g as f32, b as f32])
    });
    let blurred = gaussian_blur_f32(&float, sigma);

    RgbImage::from_fn(width, height, |x, y| {
        let value = float.get_pixel(x, y).0;
        let blur = blurred.get_pixel(x, y).0;
        Rgb(std::array::from_fn(|c| {
            contrast_blend(value[c], blur[c], gain, bias)
        }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgba, RgbaImage};

    fn normalizer() -> ImageNormalizer {
        ImageNormalizer::new(&PreprocessConfig::default())
    }

    /// Bright disk on a black frame, the way fundus photographs look
    fn fundus(width: u32, height: u32) -> RgbImage {
        let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
        let radius = width.min(height) as f32 * 0.3;
        RgbImage::from_fn(width, height, |x, y| {
            let d = ((x as f32 - cx).powi(2) + (y as f32 - cy).powi(2)).sqrt();
            if d < radius {
                Rgb([180, 90, 40])
            } else {
                Rgb([0, 0, 0])
            }
        })
    }

    #[test]
    fn test_dark_image_is_not_cropped() {
        let dark = RgbImage::from_pixel(40, 30, Rgb([7, 7, 7]));
        let (cropped, was_cropped) = crop_rgb_from_gray(&dark, 7);
        assert!(!was_cropped);
        assert_eq!(cropped, dark);

        let gray = GrayImage::from_pixel(10, 10, Luma([3]));
        let (cropped, was_cropped) = crop_gray_from_mask(&gray, 7);
        assert!(!was_cropped);
        assert_eq!(cropped, gray);
    }

    #[test]
    fn test_crop_to_foreground_box() {
        let mut img = RgbImage::new(20, 10);
        img.put_pixel(3, 2, Rgb([200, 200, 200]));
        img.put_pixel(12, 6, Rgb([0, 50, 0]));

        let (cropped, was_cropped) = crop_rgb_from_gray(&img, 7);
        assert!(was_cropped);
        assert_eq!(cropped.dimensions(), (10, 5));
        assert_eq!(cropped.get_pixel(0, 0), &Rgb([200, 200, 200]));
        assert_eq!(cropped.get_pixel(9, 4), &Rgb([0, 50, 0]));
    }

    #[test]
    fn test_luminance_weights() {
        assert_eq!(luminance(&Rgb([255, 255, 255])), 255);
        assert_eq!(luminance(&Rgb([0, 0, 0])), 0);
        // Blue alone has to be bright to clear the tolerance
        assert_eq!(luminance(&Rgb([0, 0, 70])), 8);
        assert_eq!(luminance(&Rgb([0, 0, 61])), 7);
    }

    #[test]
    fn test_normalize_shape() {
        let n = normalizer();
        for img in [
            DynamicImage::ImageRgb8(fundus(300, 200)),
            DynamicImage::ImageRgb8(fundus(17, 911)),
            DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 48, Luma([90]))),
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(5, 5, Rgba([1, 2, 3, 255]))),
        ] {
            let out = n.normalize(&img);
            assert_eq!(out.dimensions(), (512, 512));
        }
        assert_eq!(n.crop_fallbacks(), 1);
    }

    #[test]
    fn test_constant_image_maps_to_bias() {
        let flat = RgbImage::from_pixel(64, 64, Rgb([77, 77, 77]));
        let out = enhance_contrast(&flat, 10.0, 4.0, 128.0);
        assert!(out.pixels().all(|p| p.0 == [128, 128, 128]));
    }

    #[test]
    fn test_contrast_blend_formula() {
        assert_eq!(contrast_blend(50.0, 50.0, 4.0, 128.0), 128);
        assert_eq!(contrast_blend(60.0, 50.0, 4.0, 128.0), 168);
        assert_eq!(contrast_blend(250.0, 10.0, 4.0, 128.0), 255);
        assert_eq!(contrast_blend(10.0, 250.0, 4.0, 128.0), 0);
    }

    #[test]
    fn test_bgr_canonicalization_swaps_planes() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([10, 20, 30])));
        assert_eq!(canonicalize(&img, ChannelOrder::Rgb).get_pixel(0, 0), &Rgb([10, 20, 30]));
        assert_eq!(canonicalize(&img, ChannelOrder::Bgr).get_pixel(0, 0), &Rgb([30, 20, 10]));
    }
}
