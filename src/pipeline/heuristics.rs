//! Luma-statistics stand-ins for the external quality and liveness models.
//!
//! None of these are meant to be accurate biometric checks; they give the
//! CLI and dry runs a checker that reacts to obviously bad frames.

use crate::common::config::CheckConfig;
use crate::common::{CaptureError, Result};
use crate::pipeline::checks::{CheckOutcome, QualityChecker};
use image::{DynamicImage, GrayImage};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ImageHeuristics {
    config: CheckConfig,
}

impl ImageHeuristics {
    pub fn new(config: CheckConfig) -> Self {
        Self { config }
    }

    async fn run<F>(&self, image: Arc<DynamicImage>, f: F) -> Result<CheckOutcome>
    where
        F: FnOnce(&GrayImage, &CheckConfig) -> CheckOutcome + Send + 'static,
    {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let gray = image.to_luma8();
            f(&gray, &config)
        })
        .await
        .map_err(|e| CaptureError::DetectorFailure(format!("check task failed: {}", e)))
    }
}

impl Default for ImageHeuristics {
    fn default() -> Self {
        Self::new(CheckConfig::default())
    }
}

/// Mean and standard deviation of the luma plane, both in 0-1.
fn luma_stats(gray: &GrayImage) -> (f32, f32) {
    let count = gray.width() as u64 * gray.height() as u64;
    if count == 0 {
        return (0.0, 0.0);
    }

    let mut sum = 0u64;
    let mut sum_sq = 0u64;
    for pixel in gray.pixels() {
        let v = pixel[0] as u64;
        sum += v;
        sum_sq += v * v;
    }

    let mean = sum as f64 / count as f64;
    let variance = (sum_sq as f64 / count as f64 - mean * mean).max(0.0);
    ((mean / 255.0) as f32, (variance.sqrt() / 255.0) as f32)
}

/// Variance of the 4-neighbour Laplacian over interior pixels.
fn laplacian_variance(gray: &GrayImage) -> f32 {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let at = |x: u32, y: u32| gray.get_pixel(x, y)[0] as f64;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut count = 0.0;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let v = at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4.0 * at(x, y);
            sum += v;
            sum_sq += v * v;
            count += 1.0;
        }
    }

    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0) as f32
}

fn fraction_where(gray: &GrayImage, pred: impl Fn(u8) -> bool) -> f32 {
    let total = gray.width() as usize * gray.height() as usize;
    if total == 0 {
        return 0.0;
    }
    gray.pixels().filter(|p| pred(p[0])).count() as f32 / total as f32
}

fn verdict(passed: bool, confidence: f32) -> CheckOutcome {
    if passed {
        CheckOutcome::pass(confidence)
    } else {
        CheckOutcome::fail(confidence)
    }
}

fn low_light(gray: &GrayImage, config: &CheckConfig) -> CheckOutcome {
    let (mean, _) = luma_stats(gray);
    verdict(mean >= config.min_brightness, mean)
}

fn liveness(gray: &GrayImage, config: &CheckConfig) -> CheckOutcome {
    let (_, contrast) = luma_stats(gray);
    verdict(contrast >= config.min_contrast, contrast / (2.0 * config.min_contrast).max(f32::EPSILON))
}

fn segmentation(gray: &GrayImage, config: &CheckConfig) -> CheckOutcome {
    let level = imageproc::contrast::otsu_level(gray);
    let coverage = fraction_where(gray, |v| v > level);
    verdict(coverage >= config.min_foreground_coverage, coverage)
}

fn blur(gray: &GrayImage, config: &CheckConfig) -> CheckOutcome {
    let sharpness = laplacian_variance(gray);
    verdict(sharpness >= config.min_sharpness, sharpness / (2.0 * config.min_sharpness).max(f32::EPSILON))
}

fn bright_spots(gray: &GrayImage, config: &CheckConfig) -> CheckOutcome {
    let level = config.bright_level;
    let saturated = fraction_where(gray, |v| v >= level);
    verdict(saturated <= config.max_bright_fraction, 1.0 - saturated)
}

impl QualityChecker for ImageHeuristics {
    async fn check_low_light(&self, image: Arc<DynamicImage>) -> Result<CheckOutcome> {
        self.run(image, low_light).await
    }

    async fn check_liveness(&self, image: Arc<DynamicImage>) -> Result<CheckOutcome> {
        self.run(image, liveness).await
    }

    async fn perform_segmentation(&self, image: Arc<DynamicImage>) -> Result<CheckOutcome> {
        self.run(image, segmentation).await
    }

    async fn check_blur(&self, image: Arc<DynamicImage>) -> Result<CheckOutcome> {
        self.run(image, blur).await
    }

    async fn check_bright_spots(&self, image: Arc<DynamicImage>) -> Result<CheckOutcome> {
        self.run(image, bright_spots).await
    }
}
