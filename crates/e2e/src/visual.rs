//! Visual regression testing with screenshot comparison

use image::{GenericImageView, Pixel, RgbaImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{E2eError, E2eResult};

/// Outcome of comparing one screenshot against its groundtruth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the images match within tolerance
    pub passed: bool,

    /// Root-mean-square channel error (0-255 scale); `None` when the
    /// images could not be compared pixel by pixel
    pub rms: Option<f64>,

    /// Number of pixels that differ beyond channel noise
    pub diff_pixels: u64,

    /// Total pixels compared
    pub total_pixels: u64,

    /// Path to the diff image (if generated)
    pub diff_image_path: Option<PathBuf>,

    /// Why the comparison failed when it did not get as far as a metric
    pub reason: Option<String>,
}

impl Verdict {
    fn identical(total_pixels: u64) -> Self {
        Self {
            passed: true,
            rms: Some(0.0),
            diff_pixels: 0,
            total_pixels,
            diff_image_path: None,
            reason: None,
        }
    }

    pub fn diff_percent(&self) -> f64 {
        if self.total_pixels == 0 {
            0.0
        } else {
            (self.diff_pixels as f64 / self.total_pixels as f64) * 100.0
        }
    }
}

/// Compares an image pair under a tolerance
pub trait ImageComparator: Send + Sync {
    fn compare(&self, expected: &Path, actual: &Path, tolerance: f64) -> E2eResult<Verdict>;
}

/// Pixel comparator: RMS error over RGBA channels, with an optional diff
/// image per failing pair.
#[derive(Debug, Clone, Default)]
pub struct PixelComparator {
    /// Directory for diff images
    diff_dir: Option<PathBuf>,
}

impl PixelComparator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a diff image for every pair that differs
    pub fn with_diff_dir(diff_dir: impl Into<PathBuf>) -> Self {
        Self {
            diff_dir: Some(diff_dir.into()),
        }
    }

    /// Check if two pixels differ beyond anti-aliasing noise
    fn pixels_differ(a: &image::Rgba<u8>, b: &image::Rgba<u8>) -> bool {
        const CHANNEL_NOISE: i32 = 5;

        a.channels()
            .iter()
            .zip(b.channels())
            .any(|(x, y)| (*x as i32 - *y as i32).abs() > CHANNEL_NOISE)
    }

    fn diff_image_path(&self, actual: &Path) -> Option<PathBuf> {
        let dir = self.diff_dir.as_ref()?;
        let stem = actual.file_stem()?.to_string_lossy();
        let parent = actual
            .parent()
            .and_then(Path::file_name)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        let name = if parent.is_empty() {
            format!("{}-diff.png", stem)
        } else {
            format!("{}-{}-diff.png", parent, stem)
        };
        Some(dir.join(name))
    }
}

impl ImageComparator for PixelComparator {
    fn compare(&self, expected: &Path, actual: &Path, tolerance: f64) -> E2eResult<Verdict> {
        // Quick hash comparison
        if hash_file(expected)? == hash_file(actual)? {
            debug!("{} matches exactly (same hash)", actual.display());
            let (w, h) = image::image_dimensions(actual)?;
            return Ok(Verdict::identical(w as u64 * h as u64));
        }

        let expected_img = image::open(expected)?;
        let actual_img = image::open(actual)?;

        if expected_img.dimensions() != actual_img.dimensions() {
            warn!(
                "Screenshot dimensions differ: expected {:?} vs actual {:?} ({})",
                expected_img.dimensions(),
                actual_img.dimensions(),
                actual.display()
            );
            let (w, h) = expected_img.dimensions();
            return Ok(Verdict {
                passed: false,
                rms: None,
                diff_pixels: 0,
                total_pixels: w as u64 * h as u64,
                diff_image_path: None,
                reason: Some(format!(
                    "image size differs: expected {:?}, actual {:?}",
                    expected_img.dimensions(),
                    actual_img.dimensions()
                )),
            });
        }

        // Pixel-by-pixel comparison
        let (width, height) = actual_img.dimensions();
        let expected_rgba = expected_img.to_rgba8();
        let actual_rgba = actual_img.to_rgba8();

        let mut diff_img = RgbaImage::new(width, height);
        let mut diff_pixels = 0u64;
        let mut squared_error = 0f64;
        let total_pixels = width as u64 * height as u64;

        for (x, y, actual_pixel) in actual_rgba.enumerate_pixels() {
            let expected_pixel = expected_rgba.get_pixel(x, y);

            for (a, e) in actual_pixel.channels().iter().zip(expected_pixel.channels()) {
                let d = *a as f64 - *e as f64;
                squared_error += d * d;
            }

            if Self::pixels_differ(actual_pixel, expected_pixel) {
                diff_pixels += 1;
                // Mark diff pixels in red
                diff_img.put_pixel(x, y, image::Rgba([255, 0, 0, 255]));
            } else {
                // Keep original but dim it
                let c = actual_pixel.channels();
                diff_img.put_pixel(x, y, image::Rgba([c[0] / 2, c[1] / 2, c[2] / 2, 128]));
            }
        }

        let samples = (total_pixels * 4).max(1) as f64;
        let rms = (squared_error / samples).sqrt();
        let passed = rms <= tolerance;

        let diff_image_path = match self.diff_image_path(actual) {
            Some(path) if diff_pixels > 0 => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                diff_img.save(&path)?;
                Some(path)
            }
            _ => None,
        };

        if !passed {
            warn!(
                "Visual regression detected in {}: RMS {:.3} (tolerance {:.3}), {} pixels differ",
                actual.display(),
                rms,
                tolerance,
                diff_pixels
            );
        }

        Ok(Verdict {
            passed,
            rms: Some(rms),
            diff_pixels,
            total_pixels,
            diff_image_path,
            reason: None,
        })
    }
}

/// Hash a file using SHA256
pub fn hash_file(path: &Path) -> E2eResult<String> {
    let data = std::fs::read(path).map_err(|e| E2eError::Comparison {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}
