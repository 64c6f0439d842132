//! Coordinate spaces for the capture overlay, the preview surface and the raw
//! sensor frame.
//!
//! ```text
//!   overlay (screen px)  --letterbox-->  effective sensor  --un-rotate-->  raw sensor
//!   CaptureWindow                        (upright frame)                  (as delivered)
//! ```
//!
//! Everything here is pure: no state, no I/O.

mod mapping;
mod rotate;

pub use mapping::{
    clamp_to_sensor, crop_region, letterbox, map_sensor_rect_to_screen,
    map_window_to_sensor_rect, Letterbox,
};
pub use rotate::rotate_frame_upright;

use serde::{Deserialize, Serialize};

/// Width/height pair in floating point pixels.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SizeF {
    pub width: f32,
    pub height: f32,
}

impl SizeF {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn aspect(self) -> f32 {
        self.width / self.height
    }
}

/// Axis-aligned rectangle, origin at the top-left corner.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RectF {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl RectF {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn from_size(size: SizeF) -> Self {
        Self::new(0.0, 0.0, size.width, size.height)
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn size(&self) -> SizeF {
        SizeF::new(self.width, self.height)
    }
}

/// Whole-pixel rectangle inside a raw sensor frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn to_rect_f(self) -> RectF {
        RectF::new(self.x as f32, self.y as f32, self.width as f32, self.height as f32)
    }
}

/// Clockwise rotation that turns the raw sensor frame upright on screen.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Reduces any angle to the nearest quarter turn.
    pub fn from_degrees(degrees: i32) -> Self {
        match ((degrees.rem_euclid(360) + 45) / 90) % 4 {
            0 => Rotation::Deg0,
            1 => Rotation::Deg90,
            2 => Rotation::Deg180,
            _ => Rotation::Deg270,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Whether the upright frame has width and height exchanged.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// Per-frame orientation and size metadata delivered by the frame source.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub sensor_width: u32,
    pub sensor_height: u32,
    pub sensor_rotation_degrees: i32,
    pub device_rotation_degrees: i32,
    pub display_width: u32,
    pub display_height: u32,
}

impl FrameGeometry {
    /// `(sensor_rotation - device_rotation + 360) mod 360`, as a quarter turn.
    pub fn effective_rotation(&self) -> Rotation {
        Rotation::from_degrees(self.sensor_rotation_degrees - self.device_rotation_degrees)
    }

    pub fn sensor_size(&self) -> SizeF {
        SizeF::new(self.sensor_width as f32, self.sensor_height as f32)
    }

    /// Sensor dimensions as seen after the upright rotation.
    pub fn effective_size(&self) -> SizeF {
        let sensor = self.sensor_size();
        if self.effective_rotation().swaps_axes() {
            SizeF::new(sensor.height, sensor.width)
        } else {
            sensor
        }
    }

    /// Preview surface anchored at the overlay origin.
    pub fn display_surface(&self) -> RectF {
        RectF::new(0.0, 0.0, self.display_width as f32, self.display_height as f32)
    }
}

/// Region of the overlay the user is asked to fill. The center is normalized
/// to the overlay size, the half extents are overlay pixels.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaptureWindow {
    pub center_x: f32,
    pub center_y: f32,
    pub half_width: f32,
    pub half_height: f32,
}

impl CaptureWindow {
    pub fn new(center_x: f32, center_y: f32, half_width: f32, half_height: f32) -> Self {
        Self { center_x, center_y, half_width, half_height }
    }

    /// Square window, as drawn for the palm.
    pub fn palm(center_x: f32, center_y: f32, size: f32) -> Self {
        Self::new(center_x, center_y, size / 2.0, size / 2.0)
    }

    /// Tall window, as drawn around a single finger.
    pub fn finger(center_x: f32, center_y: f32, width: f32, height: f32) -> Self {
        Self::new(center_x, center_y, width / 2.0, height / 2.0)
    }

    pub fn to_overlay_rect(&self, overlay: SizeF) -> RectF {
        let cx = self.center_x * overlay.width;
        let cy = self.center_y * overlay.height;
        RectF::new(
            cx - self.half_width,
            cy - self.half_height,
            self.half_width * 2.0,
            self.half_height * 2.0,
        )
    }
}
