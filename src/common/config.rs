use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::common::error::{CaptureError, Result};
use crate::geometry::CaptureWindow;

pub const DEFAULT_CONFIG_PATH: &str = "configs/hand-capture.toml";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub placement: PlacementConfig,
    #[serde(default)]
    pub windows: WindowConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub checks: CheckConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Where a finger has to sit (normalized frame coordinates) before the step
/// counts as detected.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlacementConfig {
    #[serde(default = "default_finger_x_min")]
    pub finger_x_min: f32,
    #[serde(default = "default_finger_x_max")]
    pub finger_x_max: f32,
    #[serde(default = "default_finger_y_min")]
    pub finger_y_min: f32,
    #[serde(default = "default_finger_y_max")]
    pub finger_y_max: f32,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

fn default_finger_x_min() -> f32 { 0.4 }
fn default_finger_x_max() -> f32 { 0.6 }
fn default_finger_y_min() -> f32 { 0.35 }
fn default_finger_y_max() -> f32 { 0.65 }
fn default_min_confidence() -> f32 { 0.5 }

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            finger_x_min: default_finger_x_min(),
            finger_x_max: default_finger_x_max(),
            finger_y_min: default_finger_y_min(),
            finger_y_max: default_finger_y_max(),
            min_confidence: default_min_confidence(),
        }
    }
}

/// On-screen capture window sizes, in overlay pixels. The center is
/// normalized to the overlay.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WindowConfig {
    #[serde(default = "default_center")]
    pub center_x: f32,
    #[serde(default = "default_center")]
    pub center_y: f32,
    #[serde(default = "default_palm_size")]
    pub palm_size: f32,
    #[serde(default = "default_finger_width")]
    pub finger_width: f32,
    #[serde(default = "default_finger_height")]
    pub finger_height: f32,
}

fn default_center() -> f32 { 0.5 }
fn default_palm_size() -> f32 { 300.0 }
fn default_finger_width() -> f32 { 160.0 }
fn default_finger_height() -> f32 { 320.0 }

impl WindowConfig {
    pub fn palm_window(&self) -> CaptureWindow {
        CaptureWindow::palm(self.center_x, self.center_y, self.palm_size)
    }

    pub fn finger_window(&self) -> CaptureWindow {
        CaptureWindow::finger(self.center_x, self.center_y, self.finger_width, self.finger_height)
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            center_x: default_center(),
            center_y: default_center(),
            palm_size: default_palm_size(),
            finger_width: default_finger_width(),
            finger_height: default_finger_height(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_required_count")]
    pub required_count: usize,
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    #[serde(default = "default_check_timeout")]
    pub check_timeout_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_required_count() -> usize { 3 }
fn default_max_buffer_size() -> usize { 5 }
fn default_check_timeout() -> u64 { 3000 }
fn default_queue_capacity() -> usize { 1 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            required_count: default_required_count(),
            max_buffer_size: default_max_buffer_size(),
            check_timeout_ms: default_check_timeout(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Thresholds for the built-in image heuristics.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CheckConfig {
    /// Minimum mean luma (0-1).
    #[serde(default = "default_min_brightness")]
    pub min_brightness: f32,
    /// Minimum luma standard deviation (0-1). Flat prints and screens sit below it.
    #[serde(default = "default_min_contrast")]
    pub min_contrast: f32,
    #[serde(default = "default_min_coverage")]
    pub min_foreground_coverage: f32,
    /// Minimum variance of the Laplacian response.
    #[serde(default = "default_min_sharpness")]
    pub min_sharpness: f32,
    #[serde(default = "default_bright_level")]
    pub bright_level: u8,
    #[serde(default = "default_max_bright_fraction")]
    pub max_bright_fraction: f32,
}

fn default_min_brightness() -> f32 { 0.25 }
fn default_min_contrast() -> f32 { 0.08 }
fn default_min_coverage() -> f32 { 0.2 }
fn default_min_sharpness() -> f32 { 60.0 }
fn default_bright_level() -> u8 { 250 }
fn default_max_bright_fraction() -> f32 { 0.05 }

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            min_brightness: default_min_brightness(),
            min_contrast: default_min_contrast(),
            min_foreground_coverage: default_min_coverage(),
            min_sharpness: default_min_sharpness(),
            bright_level: default_bright_level(),
            max_bright_fraction: default_max_bright_fraction(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// Overrides the platform data directory when set.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn unit_range(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(CaptureError::Config(format!(
            "{} must be between 0.0 and 1.0, got {}", name, value
        )));
    }
    Ok(())
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from_path(Path::new(DEFAULT_CONFIG_PATH))
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CaptureError::Config(format!(
                "Config file not found: {}", path.display()
            )));
        }

        tracing::debug!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| CaptureError::Config(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let p = &self.placement;
        unit_range("placement.finger_x_min", p.finger_x_min)?;
        unit_range("placement.finger_x_max", p.finger_x_max)?;
        unit_range("placement.finger_y_min", p.finger_y_min)?;
        unit_range("placement.finger_y_max", p.finger_y_max)?;
        unit_range("placement.min_confidence", p.min_confidence)?;
        if p.finger_x_min >= p.finger_x_max || p.finger_y_min >= p.finger_y_max {
            return Err(CaptureError::Config(
                "Finger placement window must have min < max on both axes".into()
            ));
        }

        let w = &self.windows;
        unit_range("windows.center_x", w.center_x)?;
        unit_range("windows.center_y", w.center_y)?;
        for (name, size) in [
            ("windows.palm_size", w.palm_size),
            ("windows.finger_width", w.finger_width),
            ("windows.finger_height", w.finger_height),
        ] {
            if size <= 0.0 {
                return Err(CaptureError::Config(format!(
                    "{} must be positive, got {}", name, size
                )));
            }
        }

        let pl = &self.pipeline;
        if pl.required_count == 0 {
            return Err(CaptureError::Config("pipeline.required_count must be at least 1".into()));
        }
        if pl.required_count > pl.max_buffer_size {
            return Err(CaptureError::Config(format!(
                "pipeline.required_count ({}) cannot exceed max_buffer_size ({})",
                pl.required_count, pl.max_buffer_size
            )));
        }
        if pl.queue_capacity == 0 {
            return Err(CaptureError::Config("pipeline.queue_capacity must be at least 1".into()));
        }
        if pl.check_timeout_ms < 100 || pl.check_timeout_ms > 60_000 {
            return Err(CaptureError::Config(format!(
                "pipeline.check_timeout_ms must be between 100 and 60000, got {}",
                pl.check_timeout_ms
            )));
        }

        let c = &self.checks;
        unit_range("checks.min_brightness", c.min_brightness)?;
        unit_range("checks.min_contrast", c.min_contrast)?;
        unit_range("checks.min_foreground_coverage", c.min_foreground_coverage)?;
        unit_range("checks.max_bright_fraction", c.max_bright_fraction)?;
        if c.min_sharpness < 0.0 {
            return Err(CaptureError::Config(format!(
                "checks.min_sharpness cannot be negative, got {}", c.min_sharpness
            )));
        }

        Ok(())
    }
}
