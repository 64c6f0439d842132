use crate::common::Result;
use crate::pipeline::warnings::WarningKind;
use image::DynamicImage;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

/// The individual checks a cropped frame goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum QualityCheck {
    LowLight,
    Liveness,
    Segmentation,
    Blur,
    BrightSpots,
}

impl QualityCheck {
    pub const ALL: [QualityCheck; 5] = [
        QualityCheck::LowLight,
        QualityCheck::Liveness,
        QualityCheck::Segmentation,
        QualityCheck::Blur,
        QualityCheck::BrightSpots,
    ];

    /// Stage number the check's warnings are filed under.
    pub fn stage(self) -> u8 {
        match self {
            QualityCheck::LowLight | QualityCheck::Liveness => 1,
            QualityCheck::Segmentation => 2,
            QualityCheck::Blur | QualityCheck::BrightSpots => 3,
        }
    }

    pub fn warning_kind(self) -> WarningKind {
        match self {
            QualityCheck::LowLight => WarningKind::LowLight,
            QualityCheck::Liveness => WarningKind::Liveness,
            QualityCheck::Segmentation => WarningKind::Segmentation,
            QualityCheck::Blur => WarningKind::Blur,
            QualityCheck::BrightSpots => WarningKind::BrightSpots,
        }
    }
}

/// Verdict of one check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CheckOutcome {
    pub passed: bool,
    /// 0.0 to 1.0.
    pub confidence: f32,
    /// Overrides the check's own warning kind on failure.
    pub warning_kind: Option<WarningKind>,
}

impl CheckOutcome {
    pub fn pass(confidence: f32) -> Self {
        Self { passed: true, confidence: confidence.clamp(0.0, 1.0), warning_kind: None }
    }

    pub fn fail(confidence: f32) -> Self {
        Self { passed: false, confidence: confidence.clamp(0.0, 1.0), warning_kind: None }
    }

    pub fn with_warning(mut self, kind: WarningKind) -> Self {
        self.warning_kind = Some(kind);
        self
    }
}

/// Models that judge a cropped, upright frame. Errors mean the model could
/// not run at all, not that the frame is bad.
pub trait QualityChecker: Send + Sync + 'static {
    fn check_low_light(&self, image: Arc<DynamicImage>)
        -> impl Future<Output = Result<CheckOutcome>> + Send;

    fn check_liveness(&self, image: Arc<DynamicImage>)
        -> impl Future<Output = Result<CheckOutcome>> + Send;

    fn perform_segmentation(&self, image: Arc<DynamicImage>)
        -> impl Future<Output = Result<CheckOutcome>> + Send;

    fn check_blur(&self, image: Arc<DynamicImage>)
        -> impl Future<Output = Result<CheckOutcome>> + Send;

    fn check_bright_spots(&self, image: Arc<DynamicImage>)
        -> impl Future<Output = Result<CheckOutcome>> + Send;
}

/// Runs a single check by name.
pub async fn run_check<C: QualityChecker>(
    checker: &C,
    check: QualityCheck,
    image: Arc<DynamicImage>,
) -> Result<CheckOutcome> {
    match check {
        QualityCheck::LowLight => checker.check_low_light(image).await,
        QualityCheck::Liveness => checker.check_liveness(image).await,
        QualityCheck::Segmentation => checker.perform_segmentation(image).await,
        QualityCheck::Blur => checker.check_blur(image).await,
        QualityCheck::BrightSpots => checker.check_bright_spots(image).await,
    }
}
