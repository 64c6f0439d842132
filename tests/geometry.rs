use hand_capture::camera::{Frame, PixelFormat};
use hand_capture::common::Config;
use hand_capture::geometry::{
    clamp_to_sensor, crop_region, map_sensor_rect_to_screen, map_window_to_sensor_rect,
    CaptureWindow, FrameGeometry, PixelRect, SizeF,
};
use image::{DynamicImage, GrayImage, Luma};
use std::path::Path;

fn portrait_phone() -> FrameGeometry {
    FrameGeometry {
        sensor_width: 1920,
        sensor_height: 1080,
        sensor_rotation_degrees: 90,
        device_rotation_degrees: 0,
        display_width: 1080,
        display_height: 1920,
    }
}

#[test]
fn centered_window_on_rotated_sensor() {
    let g = portrait_phone();
    let surface = g.display_surface();
    let window = CaptureWindow::new(0.5, 0.5, 150.0, 100.0);

    let rect = map_window_to_sensor_rect(&window, surface.size(), surface, &g).unwrap();
    let (cx, cy) = rect.center();
    assert!((cx - 960.0).abs() < 0.5 && (cy - 540.0).abs() < 0.5);
    assert!((rect.width - 200.0).abs() < 0.5);
    assert!((rect.height - 300.0).abs() < 0.5);

    assert_eq!(
        crop_region(&window, surface.size(), surface, &g).unwrap(),
        PixelRect::new(860, 390, 200, 300)
    );
}

#[test]
fn every_device_orientation_round_trips() {
    let window = CaptureWindow::new(0.3, 0.6, 90.0, 140.0);
    for sensor_rotation in [0, 90, 180, 270] {
        for device_rotation in [0, 90, 180, 270] {
            for (sw, sh) in [(1280, 720), (720, 1280)] {
                let mut g = portrait_phone();
                g.sensor_width = sw;
                g.sensor_height = sh;
                g.sensor_rotation_degrees = sensor_rotation;
                g.device_rotation_degrees = device_rotation;
                let surface = g.display_surface();

                let sensor = map_window_to_sensor_rect(&window, surface.size(), surface, &g).unwrap();
                let back = map_sensor_rect_to_screen(sensor, surface, &g).unwrap();
                let shown = window.to_overlay_rect(surface.size());
                for (a, b) in [
                    (back.x, shown.x),
                    (back.y, shown.y),
                    (back.width, shown.width),
                    (back.height, shown.height),
                ] {
                    assert!(
                        (a - b).abs() <= 1.0,
                        "rot {sensor_rotation}/{device_rotation} {sw}x{sh}: {back:?} vs {shown:?}"
                    );
                }
            }
        }
    }
}

#[test]
fn window_outside_preview_has_no_crop() {
    let g = portrait_phone();
    let surface = g.display_surface();
    let window = CaptureWindow::new(2.0, 2.0, 50.0, 50.0);
    let rect = map_window_to_sensor_rect(&window, surface.size(), surface, &g).unwrap();
    assert_eq!(clamp_to_sensor(rect, &g), None);
}

#[test]
fn crop_comes_out_upright() {
    // Small sensor turned a quarter: the marker pixel at the sensor's
    // bottom-left must end up top-left on screen.
    let g = FrameGeometry {
        sensor_width: 40,
        sensor_height: 20,
        sensor_rotation_degrees: 90,
        device_rotation_degrees: 0,
        display_width: 20,
        display_height: 40,
    };
    let mut raw = GrayImage::from_pixel(40, 20, Luma([0]));
    raw.put_pixel(0, 19, Luma([255]));
    let frame = Frame::new(DynamicImage::ImageLuma8(raw), PixelFormat::Gray8, g).unwrap();

    let full = CaptureWindow::new(0.5, 0.5, 10.0, 20.0);
    let rect = crop_region(&full, SizeF::new(20.0, 40.0), g.display_surface(), &g).unwrap();
    assert_eq!(rect, PixelRect::new(0, 0, 40, 20));

    let upright = frame.crop_upright(rect).to_luma8();
    assert_eq!(upright.dimensions(), (20, 40));
    assert_eq!(upright.get_pixel(0, 0)[0], 255);
}

#[test]
fn shipped_config_matches_defaults() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("configs/hand-capture.toml");
    let config = Config::load_from_path(&path).unwrap();
    let defaults = Config::default();

    assert_eq!(config.pipeline.required_count, defaults.pipeline.required_count);
    assert_eq!(config.pipeline.max_buffer_size, defaults.pipeline.max_buffer_size);
    assert_eq!(config.pipeline.queue_capacity, 1);
    assert_eq!(config.placement.finger_x_min, defaults.placement.finger_x_min);
    assert_eq!(config.checks.bright_level, defaults.checks.bright_level);
    assert!(config.storage.data_dir.is_none());
}
