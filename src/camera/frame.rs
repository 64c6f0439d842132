use crate::common::{CaptureError, Result};
use crate::geometry::{rotate_frame_upright, FrameGeometry, PixelRect};
use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageBuffer, Luma, Rgb, Rgba};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Pixel layouts the frame source may deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Gray8,
    Rgb8,
    Rgba8,
    /// Packed 4:2:2, two pixels per `Y0 U Y1 V` quad.
    Yuyv,
}

impl PixelFormat {
    /// Bytes needed for a `width` x `height` buffer.
    pub fn buffer_len(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Gray8 => pixels,
            PixelFormat::Rgb8 => pixels * 3,
            PixelFormat::Rgba8 => pixels * 4,
            PixelFormat::Yuyv => pixels * 2,
        }
    }
}

/// One analyzed camera frame. The decoded image is shared so concurrent
/// checks can hold it without copying.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: Arc<DynamicImage>,
    pub pixel_format: PixelFormat,
    pub geometry: FrameGeometry,
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: DynamicImage, pixel_format: PixelFormat, geometry: FrameGeometry) -> Result<Self> {
        if image.width() != geometry.sensor_width || image.height() != geometry.sensor_height {
            return Err(CaptureError::InvalidFrame(format!(
                "image is {}x{} but geometry says {}x{}",
                image.width(), image.height(), geometry.sensor_width, geometry.sensor_height
            )));
        }

        Ok(Self {
            image: Arc::new(image),
            pixel_format,
            geometry,
            timestamp: Utc::now(),
        })
    }

    /// Decodes a raw sensor buffer.
    pub fn from_raw(data: &[u8], pixel_format: PixelFormat, geometry: FrameGeometry) -> Result<Self> {
        let (width, height) = (geometry.sensor_width, geometry.sensor_height);
        let expected = pixel_format.buffer_len(width, height);
        if data.len() < expected {
            return Err(CaptureError::InvalidFrame(format!(
                "{:?} buffer for {}x{} needs {} bytes, got {}",
                pixel_format, width, height, expected, data.len()
            )));
        }
        let data = &data[..expected];

        let image = match pixel_format {
            PixelFormat::Gray8 => ImageBuffer::<Luma<u8>, _>::from_raw(width, height, data.to_vec())
                .map(DynamicImage::ImageLuma8),
            PixelFormat::Rgb8 => ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, data.to_vec())
                .map(DynamicImage::ImageRgb8),
            PixelFormat::Rgba8 => ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, data.to_vec())
                .map(DynamicImage::ImageRgba8),
            PixelFormat::Yuyv => {
                if width % 2 != 0 {
                    return Err(CaptureError::InvalidFrame("YUYV width must be even".into()));
                }
                ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, yuyv_to_rgb(data))
                    .map(DynamicImage::ImageRgb8)
            }
        }
        .ok_or_else(|| CaptureError::InvalidFrame("Failed to create image buffer".into()))?;

        Self::new(image, pixel_format, geometry)
    }

    pub fn width(&self) -> u32 {
        self.geometry.sensor_width
    }

    pub fn height(&self) -> u32 {
        self.geometry.sensor_height
    }

    /// Cuts `rect` out of the raw frame and turns it upright.
    pub fn crop_upright(&self, rect: PixelRect) -> DynamicImage {
        let cropped = self.image.crop_imm(rect.x, rect.y, rect.width, rect.height);
        rotate_frame_upright(&cropped, self.geometry.effective_rotation())
    }
}

fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for quad in data.chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        for y in [y0, y1] {
            rgb.extend_from_slice(&yuv_to_rgb(y, u, v));
        }
    }
    rgb
}

// BT.601, studio range.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = (y as f32 - 16.0) * 1.164;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let r = c + 1.596 * e;
    let g = c - 0.392 * d - 0.813 * e;
    let b = c + 2.017 * d;
    [
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
    ]
}
