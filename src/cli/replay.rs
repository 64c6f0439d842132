//! Scripted capture sessions.
//!
//! A replay script is a TOML list of detector results and user actions:
//!
//! ```toml
//! [[steps]]
//! action = "observe"
//! hand = "right"
//!
//! [[steps]]
//! action = "capture"
//!
//! [[steps]]
//! action = "confirm"
//! ```

use crate::common::{CaptureError, Result};
use crate::core::landmarks::HAND_LANDMARK_COUNT;
use crate::core::{
    CaptureSession, CaptureState, CaptureStep, Finger, HandObservation, HandSide, Landmark,
    SessionEvent,
};
use crate::storage::FrameStore;
use image::DynamicImage;
use serde::Deserialize;
use std::path::Path;
use tokio::sync::broadcast::error::TryRecvError;

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayScript {
    #[serde(default)]
    pub steps: Vec<ReplayStep>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ReplayStep {
    /// A detector result. With `finger` set only that finger sits at
    /// `(x, y)`; otherwise the whole hand does.
    Observe {
        hand: HandSide,
        #[serde(default = "default_true")]
        palm_side: bool,
        #[serde(default = "default_confidence")]
        confidence: f32,
        #[serde(default)]
        finger: Option<Finger>,
        #[serde(default = "default_center")]
        x: f32,
        #[serde(default = "default_center")]
        y: f32,
    },
    /// The detector saw no hand.
    Lost,
    /// Shutter press: start a capture and store a frame for it.
    Capture,
    Cancel,
    Confirm,
    Retake,
    Verify,
    /// The camera failed.
    Error { message: String },
    Reset,
}

fn default_true() -> bool { true }
fn default_confidence() -> f32 { 0.9 }
fn default_center() -> f32 { 0.5 }

impl ReplayScript {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| CaptureError::Config(format!("Replay script parse error: {}", e)))
    }
}

/// Builds a full hand observation for a scripted step.
pub fn synthetic_observation(
    hand: HandSide,
    palm_side: bool,
    confidence: f32,
    finger: Option<Finger>,
    x: f32,
    y: f32,
) -> HandObservation {
    let landmarks = match finger {
        None => vec![Landmark::new(x, y); HAND_LANDMARK_COUNT],
        Some(finger) => {
            // Rest of the hand sits below the placement window.
            let mut points = vec![Landmark::new(0.5, 0.9); HAND_LANDMARK_COUNT];
            for &i in finger.landmark_indices() {
                points[i] = Landmark::new(x, y);
            }
            points
        }
    };
    HandObservation::new(hand, palm_side, confidence, landmarks)
}

/// State and events after one replayed step.
#[derive(Debug, Clone)]
pub struct ReplayLine {
    pub step: usize,
    pub action: &'static str,
    pub state: CaptureState,
    pub events: Vec<SessionEvent>,
}

fn action_name(step: &ReplayStep) -> &'static str {
    match step {
        ReplayStep::Observe { .. } => "observe",
        ReplayStep::Lost => "lost",
        ReplayStep::Capture => "capture",
        ReplayStep::Cancel => "cancel",
        ReplayStep::Confirm => "confirm",
        ReplayStep::Retake => "retake",
        ReplayStep::Verify => "verify",
        ReplayStep::Error { .. } => "error",
        ReplayStep::Reset => "reset",
    }
}

/// Drives `session` through the script. Captured frames are blank images
/// written to `frames`; delete requests from the session are carried out
/// against the same store.
pub fn run(
    session: &mut CaptureSession,
    frames: &dyn FrameStore,
    script: &ReplayScript,
) -> Result<Vec<ReplayLine>> {
    let mut events = session.subscribe();
    let mut lines = Vec::with_capacity(script.steps.len());

    for (index, step) in script.steps.iter().enumerate() {
        match step {
            ReplayStep::Observe { hand, palm_side, confidence, finger, x, y } => {
                let obs = synthetic_observation(*hand, *palm_side, *confidence, *finger, *x, *y);
                session.observe(Some(&obs));
            }
            ReplayStep::Lost => session.observe(None),
            ReplayStep::Capture => {
                if let Some(ticket) = session.start_capture() {
                    let frame_ref = frames.save(&DynamicImage::new_luma8(1, 1))?;
                    if ticket.step == CaptureStep::Verification {
                        session.verification_frame_ready(ticket, frame_ref);
                    } else {
                        session.capture_confirmed(ticket, frame_ref);
                    }
                } else {
                    tracing::debug!("Step {}: nothing to capture in {}", index, session.state());
                }
            }
            ReplayStep::Cancel => session.cancel_capture(),
            ReplayStep::Confirm => session.confirm_step()?,
            ReplayStep::Retake => {
                session.retake();
            }
            ReplayStep::Verify => session.start_verification(),
            ReplayStep::Error { message } => {
                session.on_device_error(&CaptureError::CaptureDevice(message.clone()));
            }
            ReplayStep::Reset => session.reset()?,
        }

        let mut emitted = Vec::new();
        loop {
            match events.try_recv() {
                Ok(event) => emitted.push(event),
                Err(TryRecvError::Lagged(n)) => {
                    tracing::warn!("Replay missed {} session events", n);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        for frame_ref in session.take_orphans() {
            frames.delete(&frame_ref)?;
        }

        lines.push(ReplayLine {
            step: index,
            action: action_name(step),
            state: session.state(),
            events: emitted,
        });
    }

    Ok(lines)
}
