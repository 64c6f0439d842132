mod common;

use common::{frame, FakeChecker, GatedChecker};
use hand_capture::common::config::PipelineConfig;
use hand_capture::geometry::CaptureWindow;
use hand_capture::pipeline::{
    DropReason, FrameOutcome, PipelineEvent, PipelineStage, QualityCheck, QualityChecker,
    ValidationPipeline, WarningKind,
};
use hand_capture::storage::{FrameStore, MemoryFrameStore};
use std::sync::Arc;
use std::time::Duration;

fn window() -> CaptureWindow {
    CaptureWindow::palm(0.5, 0.5, 32.0)
}

fn build<C: QualityChecker>(checker: C, config: PipelineConfig) -> (Arc<ValidationPipeline<C>>, Arc<MemoryFrameStore>) {
    let store = Arc::new(MemoryFrameStore::new());
    let frames: Arc<dyn FrameStore> = store.clone();
    (Arc::new(ValidationPipeline::new(&config, window(), checker, frames)), store)
}

#[tokio::test]
async fn three_good_frames_complete_the_run() {
    let (pipeline, store) = build(FakeChecker::default(), PipelineConfig::default());
    let mut events = pipeline.subscribe();

    for i in 0..3 {
        let outcome = pipeline.process_frame(frame()).await.unwrap();
        match outcome {
            FrameOutcome::Accepted { completed, .. } => assert_eq!(completed, i == 2),
            other => panic!("frame {i}: unexpected {other:?}"),
        }
    }

    assert_eq!(pipeline.stage(), PipelineStage::Completed);
    assert_eq!(pipeline.accepted_frames().len(), 3);
    assert!(pipeline.warnings().is_empty());
    assert_eq!(store.len(), 3);

    let mut completed = None;
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::Completed(frames) = event {
            completed = Some(frames);
        }
    }
    let frames = completed.expect("completion event");
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|f| store.contains(&f.frame_ref)));

    // Further frames are ignored until cleared.
    assert_eq!(
        pipeline.process_frame(frame()).await.unwrap(),
        FrameOutcome::Dropped(DropReason::Completed)
    );
    assert_eq!(pipeline.checker().calls.load(std::sync::atomic::Ordering::SeqCst), 15);

    pipeline.clear();
    assert_eq!(pipeline.stage(), PipelineStage::InitialChecks);
    assert!(pipeline.accepted_frames().is_empty());
    // Completed frames belong to the receiver of the completion event.
    assert_eq!(store.len(), 3);
    assert!(matches!(
        pipeline.process_frame(frame()).await.unwrap(),
        FrameOutcome::Accepted { .. }
    ));
}

#[tokio::test]
async fn repeated_failure_is_one_warning() {
    let checker = FakeChecker::default();
    checker.set_failing(&[QualityCheck::LowLight]);
    let (pipeline, store) = build(checker, PipelineConfig::default());

    for _ in 0..2 {
        let outcome = pipeline.process_frame(frame()).await.unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Rejected { stage: PipelineStage::InitialChecks, failed: vec![QualityCheck::LowLight] }
        );
    }

    let warnings = pipeline.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].kind, WarningKind::LowLight);
    assert_eq!(warnings[0].stage, 1);
    assert!(store.is_empty());
}

#[tokio::test]
async fn warnings_are_ordered_by_stage_not_arrival() {
    let (pipeline, _) = build(FakeChecker::default(), PipelineConfig::default());

    pipeline.checker().set_failing(&[QualityCheck::Blur]);
    pipeline.process_frame(frame()).await.unwrap();
    pipeline.checker().set_failing(&[QualityCheck::Liveness]);
    pipeline.process_frame(frame()).await.unwrap();

    let kinds: Vec<_> = pipeline.warnings().into_iter().map(|w| (w.stage, w.kind)).collect();
    assert_eq!(kinds, vec![(1, WarningKind::Liveness), (3, WarningKind::Blur)]);
    // The stage reached by the first frame is kept.
    assert_eq!(pipeline.stage(), PipelineStage::QualityChecks);
}

#[tokio::test]
async fn both_stage_one_failures_are_reported() {
    let checker = FakeChecker::default();
    checker.set_failing(&[QualityCheck::LowLight, QualityCheck::Liveness]);
    let (pipeline, _) = build(checker, PipelineConfig::default());

    match pipeline.process_frame(frame()).await.unwrap() {
        FrameOutcome::Rejected { failed, .. } => assert_eq!(failed.len(), 2),
        other => panic!("unexpected {other:?}"),
    }
    // Stage two never ran.
    assert_eq!(pipeline.checker().calls.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn checker_error_surfaces_as_unavailable() {
    let checker = FakeChecker::default();
    checker.set_erroring(&[QualityCheck::Segmentation]);
    let (pipeline, _) = build(checker, PipelineConfig::default());

    assert_eq!(
        pipeline.process_frame(frame()).await.unwrap(),
        FrameOutcome::Dropped(DropReason::CheckUnavailable)
    );
    let warnings = pipeline.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!((warnings[0].stage, warnings[0].kind), (2, WarningKind::CheckUnavailable));
    assert_eq!(pipeline.stage(), PipelineStage::Segmentation);

    // Model back: the warning goes away.
    pipeline.checker().set_erroring(&[]);
    pipeline.process_frame(frame()).await.unwrap();
    assert!(pipeline.warnings().is_empty());
}

#[tokio::test]
async fn slow_check_times_out_without_warning() {
    let checker = FakeChecker::default();
    checker.set_slow(QualityCheck::BrightSpots, Duration::from_secs(5));
    let config = PipelineConfig { check_timeout_ms: 20, ..PipelineConfig::default() };
    let (pipeline, store) = build(checker, config);

    assert_eq!(
        pipeline.process_frame(frame()).await.unwrap(),
        FrameOutcome::Dropped(DropReason::Timeout)
    );
    assert!(pipeline.warnings().is_empty());
    assert!(store.is_empty());
}

#[tokio::test]
async fn second_frame_while_busy_is_dropped() {
    let (checker, mut started, release) = GatedChecker::new();
    let (pipeline, _) = build(checker, PipelineConfig::default());

    let first = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.process_frame(frame()).await }
    });
    started.recv().await.unwrap();
    assert!(pipeline.is_busy());

    assert_eq!(
        pipeline.process_frame(frame()).await.unwrap(),
        FrameOutcome::Dropped(DropReason::Busy)
    );

    release.add_permits(1);
    assert!(matches!(first.await.unwrap().unwrap(), FrameOutcome::Accepted { .. }));
    assert!(!pipeline.is_busy());
}

#[tokio::test]
async fn clear_mid_flight_discards_the_frame() {
    let (checker, mut started, release) = GatedChecker::new();
    let (pipeline, store) = build(checker, PipelineConfig::default());

    let in_flight = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.process_frame(frame()).await }
    });
    started.recv().await.unwrap();
    pipeline.clear();
    release.add_permits(1);

    assert_eq!(in_flight.await.unwrap().unwrap(), FrameOutcome::Discarded);
    assert!(pipeline.accepted_frames().is_empty());
    assert!(store.is_empty());
    assert_eq!(pipeline.stage(), PipelineStage::InitialChecks);
}
