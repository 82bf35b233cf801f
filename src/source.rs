//! Ordered image inputs for one eye side

use crate::config::LoadSize;
use crate::types::patient::{PatientRecord, Side};
use anyhow::{ensure, Context, Result};
use image::imageops::FilterType;
use image::DynamicImage;
use std::path::{Path, PathBuf};

/// Random-access, ordered collection of raw images.
///
/// Index `i` always yields the image of input `i`.
pub trait ImageSource {
    /// Number of images
    fn len(&self) -> usize;

    /// Decode image `index`
    fn load(&self, index: usize) -> Result<DynamicImage>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Images read from disk on every access
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
    files: Vec<String>,
    load_size: Option<LoadSize>,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>, files: Vec<String>, load_size: Option<LoadSize>) -> Self {
        Self {
            dir: dir.into(),
            files,
            load_size,
        }
    }

    /// The images of one side for every record, in record order
    pub fn for_side(
        dir: impl Into<PathBuf>,
        records: &[PatientRecord],
        side: Side,
        load_size: Option<LoadSize>,
    ) -> Self {
        let files = records
            .iter()
            .map(|r| r.image_name(side).to_string())
            .collect();
        Self::new(dir, files, load_size)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, index: usize) -> PathBuf {
        self.dir.join(&self.files[index])
    }

    /// Files that do not exist on disk
    pub fn missing(&self) -> Vec<PathBuf> {
        (0..self.files.len())
            .map(|i| self.path(i))
            .filter(|p| !p.is_file())
            .collect()
    }
}

impl ImageSource for DirectorySource {
    fn len(&self) -> usize {
        self.files.len()
    }

    fn load(&self, index: usize) -> Result<DynamicImage> {
        ensure!(
            index < self.files.len(),
            "image index {} out of range ({} images)",
            index,
            self.files.len()
        );
        let path = self.path(index);
        let image = image::open(&path)
            .with_context(|| format!("failed to read image {}", path.display()))?;

        Ok(match self.load_size {
            Some(size) if image.width() != size.width || image.height() != size.height => {
                image.resize_exact(size.width, size.height, FilterType::Nearest)
            }
            _ => image,
        })
    }
}

/// Pre-decoded images held in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    images: Vec<DynamicImage>,
}

impl MemorySource {
    pub fn new(images: Vec<DynamicImage>) -> Self {
        Self { images }
    }
}

impl ImageSource for MemorySource {
    fn len(&self) -> usize {
        self.images.len()
    }

    fn load(&self, index: usize) -> Result<DynamicImage> {
        self.images
            .get(index)
            .cloned()
            .with_context(|| format!("image index {} out of range ({} images)", index, self.images.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_directory_source_reads_and_resizes() {
        let dir = tempfile::TempDir::new().unwrap();
        RgbImage::from_pixel(40, 20, Rgb([200, 10, 10]))
            .save(dir.path().join("7_left.png"))
            .unwrap();

        let records = vec![PatientRecord::new("7", "_left.png", "_right.png")];
        let source = DirectorySource::for_side(
            dir.path(),
            &records,
            Side::Left,
            Some(LoadSize {
                width: 16,
                height: 16,
            }),
        );

        assert_eq!(source.len(), 1);
        assert!(source.missing().is_empty());
        let img = source.load(0).unwrap();
        assert_eq!((img.width(), img.height()), (16, 16));
    }

    #[test]
    fn test_directory_source_reports_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        let records = vec![PatientRecord::new("8", "_left.jpg", "_right.jpg")];
        let source = DirectorySource::for_side(dir.path(), &records, Side::Right, None);

        assert_eq!(source.missing(), vec![dir.path().join("8_right.jpg")]);
        let err = source.load(0).unwrap_err();
        assert!(err.to_string().contains("8_right.jpg"));
    }

    #[test]
    fn test_memory_source_bounds() {
        let source = MemorySource::new(vec![DynamicImage::new_rgb8(2, 2)]);
        assert!(source.load(0).is_ok());
        assert!(source.load(1).is_err());
        assert!(!source.is_empty());
    }
}
