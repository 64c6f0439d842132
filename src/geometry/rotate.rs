use image::DynamicImage;

use super::Rotation;

/// Rotates raw sensor pixels clockwise by `rotation` so the saved crop is
/// upright whatever the sensor and device orientation were.
pub fn rotate_frame_upright(frame: &DynamicImage, rotation: Rotation) -> DynamicImage {
    match rotation {
        Rotation::Deg0 => frame.clone(),
        Rotation::Deg90 => frame.rotate90(),
        Rotation::Deg180 => frame.rotate180(),
        Rotation::Deg270 => frame.rotate270(),
    }
}
