//! Couples the capture session to frame validation.
//!
//! The session decides which step is live; the controller points the
//! validation pipeline at the matching capture window, restarts validation
//! whenever the step changes or a capture is thrown away, and surfaces
//! pipeline results as [`SessionEvent`]s.

use crate::common::config::WindowConfig;
use crate::common::{CaptureError, Result};
use crate::core::landmarks::HandObservation;
use crate::core::session::CaptureSession;
use crate::core::state::{CaptureState, CaptureTicket, SessionEvent};
use crate::geometry::CaptureWindow;
use crate::pipeline::{PipelineEvent, QualityChecker, ValidationPipeline};
use crate::storage::{FrameRef, FrameStore};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Palm,
    Finger(u8),
    Verification,
    Idle,
}

impl Phase {
    fn of(state: &CaptureState) -> Self {
        match state {
            CaptureState::AwaitingPalm
            | CaptureState::PalmDetected { .. }
            | CaptureState::PalmCaptured { .. } => Phase::Palm,
            CaptureState::AwaitingFinger { finger_index, .. }
            | CaptureState::FingerDetected { finger_index, .. }
            | CaptureState::FingerCaptured { finger_index, .. } => Phase::Finger(*finger_index),
            CaptureState::AwaitingVerification
            | CaptureState::VerificationDetected { .. }
            | CaptureState::Verification { .. } => Phase::Verification,
            CaptureState::AllDone { .. } | CaptureState::Error { .. } => Phase::Idle,
        }
    }
}

pub struct CaptureController<C> {
    session: CaptureSession,
    pipeline: Arc<ValidationPipeline<C>>,
    frames: Arc<dyn FrameStore>,
    windows: WindowConfig,
    pipeline_events: broadcast::Receiver<PipelineEvent>,
    phase: Phase,
}

impl<C: QualityChecker> CaptureController<C> {
    pub fn new(
        session: CaptureSession,
        pipeline: Arc<ValidationPipeline<C>>,
        frames: Arc<dyn FrameStore>,
        windows: WindowConfig,
    ) -> Self {
        let pipeline_events = pipeline.subscribe();
        let phase = Phase::of(&session.state());
        let controller = Self { session, pipeline, frames, windows, pipeline_events, phase };
        if let Some(window) = controller.window_for(phase) {
            controller.pipeline.set_window(window);
        }
        tracing::debug!("Capture controller starting in {:?}", phase);
        controller
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn pipeline(&self) -> &Arc<ValidationPipeline<C>> {
        &self.pipeline
    }

    fn window_for(&self, phase: Phase) -> Option<CaptureWindow> {
        match phase {
            Phase::Palm | Phase::Verification => Some(self.windows.palm_window()),
            Phase::Finger(_) => Some(self.windows.finger_window()),
            Phase::Idle => None,
        }
    }

    /// Brings the pipeline in line with the session after every action.
    /// `restart` forces a fresh validation run within the same step.
    fn sync(&mut self, restart: bool) {
        let phase = Phase::of(&self.session.state());
        if phase != self.phase {
            tracing::debug!("Capture step {:?} -> {:?}", self.phase, phase);
            if let Some(window) = self.window_for(phase) {
                self.pipeline.set_window(window);
            }
            self.phase = phase;
            self.pipeline.clear();
        } else if restart {
            self.pipeline.clear();
        }
        self.delete_orphans();
    }

    fn delete_orphans(&mut self) {
        for frame_ref in self.session.take_orphans() {
            if let Err(e) = self.frames.delete(&frame_ref) {
                tracing::warn!("Failed to delete frame {}: {}", frame_ref, e);
            }
        }
    }

    pub fn observe(&mut self, obs: Option<&HandObservation>) {
        self.session.observe(obs);
        self.sync(false);
    }

    pub fn start_capture(&mut self) -> Option<CaptureTicket> {
        self.session.start_capture()
    }

    pub fn cancel_capture(&mut self) {
        self.session.cancel_capture();
    }

    pub fn capture_confirmed(&mut self, ticket: CaptureTicket, frame_ref: FrameRef) -> bool {
        let taken = self.session.capture_confirmed(ticket, frame_ref);
        self.sync(false);
        taken
    }

    pub fn verification_frame_ready(&mut self, ticket: CaptureTicket, frame_ref: FrameRef) -> bool {
        let taken = self.session.verification_frame_ready(ticket, frame_ref);
        self.sync(false);
        taken
    }

    pub fn confirm_step(&mut self) -> Result<()> {
        self.session.confirm_step()?;
        self.sync(false);
        Ok(())
    }

    pub fn retake(&mut self) -> bool {
        let retaken = self.session.retake();
        self.sync(retaken);
        retaken
    }

    pub fn start_verification(&mut self) {
        self.session.start_verification();
        self.sync(true);
    }

    pub fn on_device_error(&mut self, error: &CaptureError) -> bool {
        let fatal = self.session.on_device_error(error);
        self.sync(false);
        fatal
    }

    pub fn reset(&mut self) -> Result<()> {
        self.session.reset()?;
        self.sync(true);
        Ok(())
    }

    /// Forwards pending pipeline results to session subscribers. Returns how
    /// many events were forwarded.
    pub fn poll_pipeline(&mut self) -> usize {
        let mut forwarded = 0;
        loop {
            let event = match self.pipeline_events.try_recv() {
                Ok(PipelineEvent::WarningsChanged(warnings)) => SessionEvent::ValidationWarnings(warnings),
                Ok(PipelineEvent::Completed(frames)) => SessionEvent::FramesReady(frames),
                Ok(PipelineEvent::FrameAccepted { .. }) | Ok(PipelineEvent::StageChanged(_)) => continue,
                Err(TryRecvError::Lagged(n)) => {
                    tracing::warn!("Missed {} pipeline events, resending warnings", n);
                    SessionEvent::ValidationWarnings(self.pipeline.warnings())
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            };
            self.session.forward(event);
            forwarded += 1;
        }
        forwarded
    }
}
