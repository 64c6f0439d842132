use crate::camera::Frame;
use crate::common::config::PipelineConfig;
use crate::common::{CaptureError, Result};
use crate::geometry::{crop_region, CaptureWindow};
use crate::pipeline::buffer::{AcceptedFrame, AcceptedFrameBuffer};
use crate::pipeline::checks::{run_check, CheckOutcome, QualityCheck, QualityChecker};
use crate::pipeline::warnings::{ValidationWarning, WarningKind, WarningSet};
use crate::storage::{FrameRef, FrameStore};
use image::DynamicImage;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PipelineStage {
    InitialChecks,
    Segmentation,
    QualityChecks,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PipelineEvent {
    FrameAccepted { frame_ref: FrameRef, quality_score: f32 },
    WarningsChanged(Vec<ValidationWarning>),
    StageChanged(PipelineStage),
    /// Quota reached; carries the accepted frames, oldest first.
    Completed(Vec<AcceptedFrame>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DropReason {
    /// Another frame is being processed.
    Busy,
    /// The quota is already met.
    Completed,
    /// The capture window does not overlap the sensor.
    NoValidCrop,
    /// A check ran past its deadline.
    Timeout,
    /// A checker returned an error.
    CheckUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FrameOutcome {
    Accepted { frame_ref: FrameRef, quality_score: f32, completed: bool },
    Rejected { stage: PipelineStage, failed: Vec<QualityCheck> },
    Dropped(DropReason),
    /// The pipeline was cleared while this frame was in flight.
    Discarded,
}

enum Verdict {
    Outcome(CheckOutcome),
    TimedOut,
    Unavailable,
}

enum GroupResult {
    Passed(Vec<f32>),
    Failed(Vec<QualityCheck>),
    Dropped(DropReason),
    Discarded,
}

struct Shared {
    window: CaptureWindow,
    stage: PipelineStage,
    warnings: WarningSet,
    // Kinds raised on a check's behalf by a `warning_kind` override.
    overrides: HashMap<QualityCheck, WarningKind>,
    buffer: AcceptedFrameBuffer,
}

impl Shared {
    fn reset_warnings(&mut self) -> bool {
        self.overrides.clear();
        self.warnings.clear_all()
    }

    /// Drops whatever `check` raised, under its own kind or an override.
    fn clear_check(&mut self, check: QualityCheck) -> bool {
        let mut changed = self.warnings.clear(check.warning_kind());
        if let Some(kind) = self.overrides.remove(&check) {
            changed |= self.warnings.clear(kind);
        }
        changed
    }

    fn raise_check(&mut self, check: QualityCheck, kind: Option<WarningKind>) -> bool {
        let kind = kind.unwrap_or(check.warning_kind());
        let mut changed = false;
        if kind == check.warning_kind() {
            if let Some(previous) = self.overrides.remove(&check) {
                changed |= self.warnings.clear(previous);
            }
            return changed | self.warnings.raise(kind, check.stage());
        }

        if let Some(previous) = self.overrides.insert(check, kind) {
            if previous != kind {
                changed |= self.warnings.clear(previous);
            }
        }
        // A borrowed kind keeps the stage it was first filed under.
        if !self.warnings.contains(kind) {
            changed |= self.warnings.raise(kind, check.stage());
        }
        changed
    }
}

/// Resets the in-flight flag however the frame's processing ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Staged frame validation. Processes at most one frame at a time; callers
/// that arrive while a frame is in flight get [`DropReason::Busy`].
pub struct ValidationPipeline<C> {
    checker: C,
    store: Arc<dyn FrameStore>,
    timeout: Duration,
    shared: Mutex<Shared>,
    in_flight: AtomicBool,
    epoch: AtomicU64,
    events: broadcast::Sender<PipelineEvent>,
}

impl<C: QualityChecker> ValidationPipeline<C> {
    pub fn new(
        config: &PipelineConfig,
        window: CaptureWindow,
        checker: C,
        store: Arc<dyn FrameStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            checker,
            store,
            timeout: Duration::from_millis(config.check_timeout_ms),
            shared: Mutex::new(Shared {
                window,
                stage: PipelineStage::InitialChecks,
                warnings: WarningSet::new(),
                overrides: HashMap::new(),
                buffer: AcceptedFrameBuffer::new(config.required_count, config.max_buffer_size),
            }),
            in_flight: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn checker(&self) -> &C {
        &self.checker
    }

    pub fn stage(&self) -> PipelineStage {
        self.lock().stage
    }

    /// Active warnings in display order.
    pub fn warnings(&self) -> Vec<ValidationWarning> {
        self.lock().warnings.snapshot()
    }

    pub fn accepted_frames(&self) -> Vec<AcceptedFrame> {
        self.lock().buffer.snapshot()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn window(&self) -> CaptureWindow {
        self.lock().window
    }

    /// Switches the on-screen window frames are cropped to. Takes effect for
    /// the next frame.
    pub fn set_window(&self, window: CaptureWindow) {
        self.lock().window = window;
    }

    /// Starts a fresh run. A frame already in flight finishes but its result
    /// is thrown away. Buffered frames of an unfinished run are deleted;
    /// after completion they belong to whoever received the
    /// [`PipelineEvent::Completed`] event.
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);

        let orphans = {
            let mut shared = self.lock();
            let completed = shared.stage == PipelineStage::Completed;
            let frames = shared.buffer.drain();
            shared.stage = PipelineStage::InitialChecks;
            if shared.reset_warnings() {
                self.emit(PipelineEvent::WarningsChanged(Vec::new()));
            }
            self.emit(PipelineEvent::StageChanged(PipelineStage::InitialChecks));
            if completed { Vec::new() } else { frames }
        };

        tracing::debug!("Validation pipeline cleared");
        self.delete_frames(orphans);
    }

    fn delete_frames(&self, frames: Vec<AcceptedFrame>) {
        for frame in frames {
            if let Err(e) = self.store.delete(&frame.frame_ref) {
                tracing::warn!("Failed to delete frame {}: {}", frame.frame_ref, e);
            }
        }
    }

    /// Runs one frame through every stage.
    pub async fn process_frame(&self, frame: Frame) -> Result<FrameOutcome> {
        if self.stage() == PipelineStage::Completed {
            return Ok(FrameOutcome::Dropped(DropReason::Completed));
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Pipeline busy, dropping frame");
            return Ok(FrameOutcome::Dropped(DropReason::Busy));
        }
        let _gate = InFlight(&self.in_flight);

        let epoch = self.epoch.load(Ordering::Acquire);
        let outcome = self.run(frame, epoch).await?;
        if let FrameOutcome::Dropped(reason) = &outcome {
            tracing::debug!("Frame dropped: {:?}", reason);
        }
        Ok(outcome)
    }

    async fn run(&self, frame: Frame, epoch: u64) -> Result<FrameOutcome> {
        let window = {
            let shared = self.lock();
            if shared.stage == PipelineStage::Completed {
                return Ok(FrameOutcome::Dropped(DropReason::Completed));
            }
            shared.window
        };

        let geometry = frame.geometry;
        let surface = geometry.display_surface();
        let rect = match crop_region(&window, surface.size(), surface, &geometry) {
            Ok(rect) => rect,
            Err(CaptureError::NoValidCrop) => return Ok(FrameOutcome::Dropped(DropReason::NoValidCrop)),
            Err(e) => return Err(e),
        };
        let image = Arc::new(frame.crop_upright(rect));

        // Stage 1
        let (low_light, liveness) = tokio::join!(
            self.timed(QualityCheck::LowLight, image.clone()),
            self.timed(QualityCheck::Liveness, image.clone()),
        );
        let group = [(QualityCheck::LowLight, low_light), (QualityCheck::Liveness, liveness)];
        match self.apply(epoch, &group, PipelineStage::Segmentation) {
            GroupResult::Passed(_) => {}
            other => return Ok(Self::early_exit(other, PipelineStage::InitialChecks)),
        }

        // Stage 2
        let segmentation = self.timed(QualityCheck::Segmentation, image.clone()).await;
        let group = [(QualityCheck::Segmentation, segmentation)];
        match self.apply(epoch, &group, PipelineStage::QualityChecks) {
            GroupResult::Passed(_) => {}
            other => return Ok(Self::early_exit(other, PipelineStage::Segmentation)),
        }

        // Stage 3
        let (blur, bright_spots) = tokio::join!(
            self.timed(QualityCheck::Blur, image.clone()),
            self.timed(QualityCheck::BrightSpots, image.clone()),
        );
        let group = [(QualityCheck::Blur, blur), (QualityCheck::BrightSpots, bright_spots)];
        let quality_score = match self.apply(epoch, &group, PipelineStage::QualityChecks) {
            GroupResult::Passed(confidences) => {
                confidences.iter().sum::<f32>() / confidences.len().max(1) as f32
            }
            other => return Ok(Self::early_exit(other, PipelineStage::QualityChecks)),
        };

        self.accept(epoch, image, quality_score).await
    }

    fn early_exit(result: GroupResult, stage: PipelineStage) -> FrameOutcome {
        match result {
            GroupResult::Failed(failed) => FrameOutcome::Rejected { stage, failed },
            GroupResult::Dropped(reason) => FrameOutcome::Dropped(reason),
            GroupResult::Discarded | GroupResult::Passed(_) => FrameOutcome::Discarded,
        }
    }

    async fn timed(&self, check: QualityCheck, image: Arc<DynamicImage>) -> Verdict {
        match tokio::time::timeout(self.timeout, run_check(&self.checker, check, image)).await {
            Ok(Ok(outcome)) => Verdict::Outcome(outcome),
            Ok(Err(e)) => {
                tracing::warn!("{:?} check failed: {}", check, e);
                Verdict::Unavailable
            }
            Err(_) => {
                tracing::debug!("{:?} check timed out after {:?}", check, self.timeout);
                Verdict::TimedOut
            }
        }
    }

    /// Folds one stage's verdicts into the shared warning set. On a full pass
    /// the published stage is raised to `reached`.
    fn apply(&self, epoch: u64, group: &[(QualityCheck, Verdict)], reached: PipelineStage) -> GroupResult {
        let mut shared = self.lock();
        if self.epoch.load(Ordering::Acquire) != epoch {
            return GroupResult::Discarded;
        }

        let mut changed = false;
        let mut failed = Vec::new();
        let mut confidences = Vec::new();
        let mut dropped = None;

        for (check, verdict) in group {
            match verdict {
                Verdict::Outcome(outcome) if outcome.passed => {
                    changed |= shared.clear_check(*check);
                    confidences.push(outcome.confidence);
                }
                Verdict::Outcome(outcome) => {
                    changed |= shared.raise_check(*check, outcome.warning_kind);
                    failed.push(*check);
                }
                Verdict::Unavailable => {
                    changed |= shared.warnings.raise(WarningKind::CheckUnavailable, check.stage());
                    dropped = Some(DropReason::CheckUnavailable);
                }
                Verdict::TimedOut => {
                    dropped.get_or_insert(DropReason::Timeout);
                }
            }
        }
        if dropped.is_none() {
            changed |= shared.warnings.clear(WarningKind::CheckUnavailable);
        }

        if changed {
            self.emit(PipelineEvent::WarningsChanged(shared.warnings.snapshot()));
        }

        if let Some(reason) = dropped {
            return GroupResult::Dropped(reason);
        }
        if !failed.is_empty() {
            return GroupResult::Failed(failed);
        }

        if reached > shared.stage {
            shared.stage = reached;
            self.emit(PipelineEvent::StageChanged(reached));
        }
        GroupResult::Passed(confidences)
    }

    async fn accept(&self, epoch: u64, image: Arc<DynamicImage>, quality_score: f32) -> Result<FrameOutcome> {
        let store = self.store.clone();
        let frame_ref = tokio::task::spawn_blocking(move || store.save(&image))
            .await
            .map_err(|e| CaptureError::Storage(format!("frame store task failed: {}", e)))??;

        let (evicted, completed) = {
            let mut shared = self.lock();
            if self.epoch.load(Ordering::Acquire) != epoch {
                drop(shared);
                self.delete_frames(vec![AcceptedFrame {
                    frame_ref,
                    quality_score,
                    timestamp: chrono::Utc::now(),
                }]);
                return Ok(FrameOutcome::Discarded);
            }

            let evicted = shared.buffer.push(AcceptedFrame {
                frame_ref: frame_ref.clone(),
                quality_score,
                timestamp: chrono::Utc::now(),
            });
            self.emit(PipelineEvent::FrameAccepted { frame_ref: frame_ref.clone(), quality_score });

            let completed = shared.buffer.is_complete();
            if completed {
                shared.stage = PipelineStage::Completed;
                if shared.reset_warnings() {
                    self.emit(PipelineEvent::WarningsChanged(Vec::new()));
                }
                self.emit(PipelineEvent::StageChanged(PipelineStage::Completed));
                self.emit(PipelineEvent::Completed(shared.buffer.snapshot()));
            } else {
                shared.stage = PipelineStage::InitialChecks;
                self.emit(PipelineEvent::StageChanged(PipelineStage::InitialChecks));
            }
            (evicted, completed)
        };

        tracing::info!("Accepted frame {} (quality {:.2})", frame_ref, quality_score);
        if completed {
            tracing::info!("Frame quota reached");
        }
        self.delete_frames(evicted);

        Ok(FrameOutcome::Accepted { frame_ref, quality_score, completed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::PixelFormat;
    use crate::geometry::FrameGeometry;
    use crate::storage::MemoryFrameStore;
    use std::sync::atomic::AtomicUsize;

    /// Fails the checks listed in `failing`, passes everything else.
    #[derive(Default)]
    struct Scripted {
        failing: Mutex<Vec<QualityCheck>>,
        overrides: Mutex<Vec<(QualityCheck, WarningKind)>>,
        broken: Option<QualityCheck>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn failing(checks: &[QualityCheck]) -> Self {
            Self { failing: Mutex::new(checks.to_vec()), ..Self::default() }
        }

        fn verdict(&self, check: QualityCheck) -> Result<CheckOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.broken == Some(check) {
                return Err(CaptureError::DetectorFailure("model missing".into()));
            }
            if self.failing.lock().unwrap().contains(&check) {
                let outcome = CheckOutcome::fail(0.1);
                let kind = self.overrides.lock().unwrap().iter().find(|(c, _)| *c == check).map(|(_, k)| *k);
                Ok(match kind {
                    Some(kind) => outcome.with_warning(kind),
                    None => outcome,
                })
            } else {
                Ok(CheckOutcome::pass(0.8))
            }
        }
    }

    impl QualityChecker for Scripted {
        async fn check_low_light(&self, _: Arc<DynamicImage>) -> Result<CheckOutcome> {
            self.verdict(QualityCheck::LowLight)
        }
        async fn check_liveness(&self, _: Arc<DynamicImage>) -> Result<CheckOutcome> {
            self.verdict(QualityCheck::Liveness)
        }
        async fn perform_segmentation(&self, _: Arc<DynamicImage>) -> Result<CheckOutcome> {
            self.verdict(QualityCheck::Segmentation)
        }
        async fn check_blur(&self, _: Arc<DynamicImage>) -> Result<CheckOutcome> {
            self.verdict(QualityCheck::Blur)
        }
        async fn check_bright_spots(&self, _: Arc<DynamicImage>) -> Result<CheckOutcome> {
            self.verdict(QualityCheck::BrightSpots)
        }
    }

    fn frame() -> Frame {
        let geometry = FrameGeometry {
            sensor_width: 64,
            sensor_height: 48,
            sensor_rotation_degrees: 0,
            device_rotation_degrees: 0,
            display_width: 64,
            display_height: 48,
        };
        Frame::new(DynamicImage::new_luma8(64, 48), PixelFormat::Gray8, geometry).unwrap()
    }

    fn pipeline(checker: Scripted) -> (ValidationPipeline<Scripted>, Arc<MemoryFrameStore>) {
        let store = Arc::new(MemoryFrameStore::new());
        let p = ValidationPipeline::new(
            &PipelineConfig::default(),
            CaptureWindow::palm(0.5, 0.5, 20.0),
            checker,
            store.clone(),
        );
        (p, store)
    }

    #[tokio::test]
    async fn segmentation_failure_stops_before_quality_checks() {
        let (p, _) = pipeline(Scripted::failing(&[QualityCheck::Segmentation]));
        let outcome = p.process_frame(frame()).await.unwrap();

        assert_eq!(
            outcome,
            FrameOutcome::Rejected { stage: PipelineStage::Segmentation, failed: vec![QualityCheck::Segmentation] }
        );
        // Two stage-1 checks plus segmentation.
        assert_eq!(p.checker().calls.load(Ordering::SeqCst), 3);
        assert_eq!(p.stage(), PipelineStage::Segmentation);
    }

    #[tokio::test]
    async fn stage_never_moves_back_on_failure() {
        let (p, _) = pipeline(Scripted::failing(&[QualityCheck::Blur]));
        p.process_frame(frame()).await.unwrap();
        assert_eq!(p.stage(), PipelineStage::QualityChecks);

        *p.checker().failing.lock().unwrap() = vec![QualityCheck::LowLight];
        p.process_frame(frame()).await.unwrap();
        assert_eq!(p.stage(), PipelineStage::QualityChecks);
    }

    #[tokio::test]
    async fn passing_check_clears_its_warning() {
        let (p, _) = pipeline(Scripted::failing(&[QualityCheck::LowLight]));
        p.process_frame(frame()).await.unwrap();
        assert_eq!(p.warnings()[0].kind, WarningKind::LowLight);

        p.checker().failing.lock().unwrap().clear();
        let outcome = p.process_frame(frame()).await.unwrap();
        assert!(matches!(outcome, FrameOutcome::Accepted { completed: false, .. }));
        assert!(p.warnings().is_empty());
        // New attempt after an accepted frame.
        assert_eq!(p.stage(), PipelineStage::InitialChecks);
    }

    #[tokio::test]
    async fn checker_error_raises_unavailable_and_drops() {
        let checker = Scripted { broken: Some(QualityCheck::Liveness), ..Scripted::default() };
        let (p, store) = pipeline(checker);

        let outcome = p.process_frame(frame()).await.unwrap();
        assert_eq!(outcome, FrameOutcome::Dropped(DropReason::CheckUnavailable));
        let warnings = p.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::CheckUnavailable);
        assert_eq!(warnings[0].stage, 1);
        assert_eq!(p.stage(), PipelineStage::InitialChecks);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn window_off_sensor_is_dropped_silently() {
        let (p, _) = pipeline(Scripted::default());
        p.set_window(CaptureWindow::palm(5.0, 5.0, 10.0));
        let outcome = p.process_frame(frame()).await.unwrap();
        assert_eq!(outcome, FrameOutcome::Dropped(DropReason::NoValidCrop));
        assert_eq!(p.checker().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn quality_score_is_mean_of_stage_three() {
        let (p, store) = pipeline(Scripted::default());
        match p.process_frame(frame()).await.unwrap() {
            FrameOutcome::Accepted { frame_ref, quality_score, .. } => {
                assert!((quality_score - 0.8).abs() < 1e-6);
                assert!(store.contains(&frame_ref));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn clear_before_completion_deletes_partial_run() {
        let (p, store) = pipeline(Scripted::default());
        p.process_frame(frame()).await.unwrap();
        assert_eq!(store.len(), 1);

        p.clear();
        assert!(p.accepted_frames().is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn overridden_warning_clears_when_its_check_passes() {
        let checker = Scripted::failing(&[QualityCheck::LowLight]);
        *checker.overrides.lock().unwrap() = vec![(QualityCheck::LowLight, WarningKind::BrightSpots)];
        let (p, _) = pipeline(checker);

        p.process_frame(frame()).await.unwrap();
        let warnings: Vec<_> = p.warnings().into_iter().map(|w| (w.stage, w.kind)).collect();
        assert_eq!(warnings, vec![(1, WarningKind::BrightSpots)]);

        // Low light passes now; the frame stops at segmentation, before the
        // bright-spot check could clear anything.
        *p.checker().failing.lock().unwrap() = vec![QualityCheck::Segmentation];
        p.process_frame(frame()).await.unwrap();
        let warnings: Vec<_> = p.warnings().into_iter().map(|w| (w.stage, w.kind)).collect();
        assert_eq!(warnings, vec![(2, WarningKind::Segmentation)]);
    }

    #[tokio::test]
    async fn override_does_not_move_an_existing_warning() {
        let (p, _) = pipeline(Scripted::failing(&[QualityCheck::Segmentation]));
        p.process_frame(frame()).await.unwrap();

        *p.checker().failing.lock().unwrap() = vec![QualityCheck::Liveness];
        *p.checker().overrides.lock().unwrap() = vec![(QualityCheck::Liveness, WarningKind::Segmentation)];
        p.process_frame(frame()).await.unwrap();

        let warnings: Vec<_> = p.warnings().into_iter().map(|w| (w.stage, w.kind)).collect();
        assert_eq!(warnings, vec![(2, WarningKind::Segmentation)]);
    }
}
