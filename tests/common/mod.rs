#![allow(dead_code)]

use hand_capture::camera::{Frame, PixelFormat};
use hand_capture::core::landmarks::HAND_LANDMARK_COUNT;
use hand_capture::core::{Finger, HandObservation, HandSide, Landmark};
use hand_capture::geometry::FrameGeometry;
use hand_capture::pipeline::{CheckOutcome, QualityCheck, QualityChecker};
use hand_capture::{CaptureError, Result};
use image::DynamicImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

pub fn geometry(width: u32, height: u32) -> FrameGeometry {
    FrameGeometry {
        sensor_width: width,
        sensor_height: height,
        sensor_rotation_degrees: 0,
        device_rotation_degrees: 0,
        display_width: width,
        display_height: height,
    }
}

pub fn frame() -> Frame {
    Frame::new(DynamicImage::new_luma8(64, 64), PixelFormat::Gray8, geometry(64, 64)).unwrap()
}

pub fn palm(side: HandSide) -> HandObservation {
    HandObservation::new(side, true, 0.95, vec![Landmark::new(0.5, 0.5); HAND_LANDMARK_COUNT])
}

pub fn back_of_hand(side: HandSide) -> HandObservation {
    HandObservation::new(side, false, 0.95, vec![Landmark::new(0.5, 0.5); HAND_LANDMARK_COUNT])
}

/// Hand with `finger` centered in the placement window and the rest of the
/// landmarks well outside it.
pub fn finger(side: HandSide, finger: Finger) -> HandObservation {
    let mut points = vec![Landmark::new(0.1, 0.95); HAND_LANDMARK_COUNT];
    for &i in finger.landmark_indices() {
        points[i] = Landmark::new(0.5, 0.5);
    }
    HandObservation::new(side, true, 0.95, points)
}

/// Checker whose verdicts are set per check by the test.
#[derive(Default)]
pub struct FakeChecker {
    failing: Mutex<Vec<QualityCheck>>,
    erroring: Mutex<Vec<QualityCheck>>,
    slow: Mutex<Option<(QualityCheck, Duration)>>,
    pub calls: AtomicUsize,
}

impl FakeChecker {
    pub fn set_failing(&self, checks: &[QualityCheck]) {
        *self.failing.lock().unwrap() = checks.to_vec();
    }

    pub fn set_erroring(&self, checks: &[QualityCheck]) {
        *self.erroring.lock().unwrap() = checks.to_vec();
    }

    pub fn set_slow(&self, check: QualityCheck, delay: Duration) {
        *self.slow.lock().unwrap() = Some((check, delay));
    }

    async fn verdict(&self, check: QualityCheck) -> Result<CheckOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = match *self.slow.lock().unwrap() {
            Some((slow, delay)) if slow == check => Some(delay),
            _ => None,
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.erroring.lock().unwrap().contains(&check) {
            return Err(CaptureError::DetectorFailure(format!("{:?} model unavailable", check)));
        }
        if self.failing.lock().unwrap().contains(&check) {
            Ok(CheckOutcome::fail(0.2))
        } else {
            Ok(CheckOutcome::pass(0.9))
        }
    }
}

impl QualityChecker for FakeChecker {
    async fn check_low_light(&self, _: Arc<DynamicImage>) -> Result<CheckOutcome> {
        self.verdict(QualityCheck::LowLight).await
    }
    async fn check_liveness(&self, _: Arc<DynamicImage>) -> Result<CheckOutcome> {
        self.verdict(QualityCheck::Liveness).await
    }
    async fn perform_segmentation(&self, _: Arc<DynamicImage>) -> Result<CheckOutcome> {
        self.verdict(QualityCheck::Segmentation).await
    }
    async fn check_blur(&self, _: Arc<DynamicImage>) -> Result<CheckOutcome> {
        self.verdict(QualityCheck::Blur).await
    }
    async fn check_bright_spots(&self, _: Arc<DynamicImage>) -> Result<CheckOutcome> {
        self.verdict(QualityCheck::BrightSpots).await
    }
}

/// Passes everything, but parks in the low-light check until released.
pub struct GatedChecker {
    started: mpsc::UnboundedSender<()>,
    release: Arc<Semaphore>,
}

impl GatedChecker {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<()>, Arc<Semaphore>) {
        let (started, rx) = mpsc::unbounded_channel();
        let release = Arc::new(Semaphore::new(0));
        (Self { started, release: release.clone() }, rx, release)
    }
}

impl QualityChecker for GatedChecker {
    async fn check_low_light(&self, _: Arc<DynamicImage>) -> Result<CheckOutcome> {
        let _ = self.started.send(());
        if let Ok(permit) = self.release.acquire().await {
            permit.forget();
        }
        Ok(CheckOutcome::pass(1.0))
    }
    async fn check_liveness(&self, _: Arc<DynamicImage>) -> Result<CheckOutcome> {
        Ok(CheckOutcome::pass(1.0))
    }
    async fn perform_segmentation(&self, _: Arc<DynamicImage>) -> Result<CheckOutcome> {
        Ok(CheckOutcome::pass(1.0))
    }
    async fn check_blur(&self, _: Arc<DynamicImage>) -> Result<CheckOutcome> {
        Ok(CheckOutcome::pass(1.0))
    }
    async fn check_bright_spots(&self, _: Arc<DynamicImage>) -> Result<CheckOutcome> {
        Ok(CheckOutcome::pass(1.0))
    }
}
