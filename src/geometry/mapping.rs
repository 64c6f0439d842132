use super::{CaptureWindow, FrameGeometry, PixelRect, RectF, Rotation, SizeF};
use crate::common::error::{CaptureError, Result};

/// Uniform scale and centering offset that fit the upright frame inside the
/// preview surface without stretching.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl Letterbox {
    fn to_screen(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.scale + self.offset_x, y * self.scale + self.offset_y)
    }

    fn to_image(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.offset_x) / self.scale, (y - self.offset_y) / self.scale)
    }
}

/// Fits `image` (already upright) into `surface`. Returns `None` when either
/// side is empty.
pub fn letterbox(image: SizeF, surface: RectF) -> Option<Letterbox> {
    if image.is_empty() || surface.size().is_empty() {
        return None;
    }

    // Wider than the surface: width fills, bars top and bottom.
    let scale = if image.aspect() > surface.size().aspect() {
        surface.width / image.width
    } else {
        surface.height / image.height
    };

    Some(Letterbox {
        scale,
        offset_x: surface.x + (surface.width - image.width * scale) / 2.0,
        offset_y: surface.y + (surface.height - image.height * scale) / 2.0,
    })
}

/// Effective (upright) rect to raw sensor rect.
fn unrotate_rect(r: RectF, rotation: Rotation, sensor: SizeF) -> RectF {
    let (w, h) = (sensor.width, sensor.height);
    match rotation {
        Rotation::Deg0 => r,
        Rotation::Deg90 => RectF::new(r.y, h - r.x - r.width, r.height, r.width),
        Rotation::Deg180 => RectF::new(w - r.x - r.width, h - r.y - r.height, r.width, r.height),
        Rotation::Deg270 => RectF::new(w - r.y - r.height, r.x, r.height, r.width),
    }
}

/// Raw sensor rect to effective (upright) rect.
fn rotate_rect(r: RectF, rotation: Rotation, sensor: SizeF) -> RectF {
    let (w, h) = (sensor.width, sensor.height);
    match rotation {
        Rotation::Deg0 => r,
        Rotation::Deg90 => RectF::new(h - r.y - r.height, r.x, r.height, r.width),
        Rotation::Deg180 => RectF::new(w - r.x - r.width, h - r.y - r.height, r.width, r.height),
        Rotation::Deg270 => RectF::new(r.y, w - r.x - r.width, r.height, r.width),
    }
}

/// Maps the on-screen capture window into raw sensor pixels.
///
/// The result is not clamped; it can extend past the sensor when the window
/// covers letterbox bars. Returns `None` for an empty sensor or surface.
pub fn map_window_to_sensor_rect(
    window: &CaptureWindow,
    overlay_size: SizeF,
    display_surface: RectF,
    geometry: &FrameGeometry,
) -> Option<RectF> {
    let rotation = geometry.effective_rotation();
    let fit = letterbox(geometry.effective_size(), display_surface)?;

    let screen = window.to_overlay_rect(overlay_size);
    let (left, top) = fit.to_image(screen.x, screen.y);
    let (right, bottom) = fit.to_image(screen.right(), screen.bottom());
    let effective = RectF::new(left, top, right - left, bottom - top);

    Some(unrotate_rect(effective, rotation, geometry.sensor_size()))
}

/// Projects a raw sensor rect onto the screen. Inverse of
/// [`map_window_to_sensor_rect`] before clamping.
pub fn map_sensor_rect_to_screen(
    rect: RectF,
    display_surface: RectF,
    geometry: &FrameGeometry,
) -> Option<RectF> {
    let rotation = geometry.effective_rotation();
    let fit = letterbox(geometry.effective_size(), display_surface)?;

    let effective = rotate_rect(rect, rotation, geometry.sensor_size());
    let (left, top) = fit.to_screen(effective.x, effective.y);
    let (right, bottom) = fit.to_screen(effective.right(), effective.bottom());
    Some(RectF::new(left, top, right - left, bottom - top))
}

/// Clamps to `[0, W] x [0, H]` and rounds to whole pixels. `None` means the
/// rect has no area left inside the sensor.
pub fn clamp_to_sensor(rect: RectF, geometry: &FrameGeometry) -> Option<PixelRect> {
    let w = geometry.sensor_width as f32;
    let h = geometry.sensor_height as f32;

    let left = rect.x.clamp(0.0, w).round();
    let top = rect.y.clamp(0.0, h).round();
    let right = rect.right().clamp(0.0, w).round();
    let bottom = rect.bottom().clamp(0.0, h).round();

    if !(right > left && bottom > top) {
        return None;
    }

    Some(PixelRect::new(
        left as u32,
        top as u32,
        (right - left) as u32,
        (bottom - top) as u32,
    ))
}

/// Window-to-crop in one step, as used by the validation pipeline.
pub fn crop_region(
    window: &CaptureWindow,
    overlay_size: SizeF,
    display_surface: RectF,
    geometry: &FrameGeometry,
) -> Result<PixelRect> {
    map_window_to_sensor_rect(window, overlay_size, display_surface, geometry)
        .and_then(|rect| clamp_to_sensor(rect, geometry))
        .ok_or(CaptureError::NoValidCrop)
}
