use crate::core::landmarks::{Finger, HandSide, Landmark};
use crate::pipeline::{AcceptedFrame, ValidationWarning};
use crate::storage::FrameRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 128-bit identity of one palm-plus-fingers ritual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(u128);

impl SessionId {
    pub fn generate() -> Self {
        Self(rand::random())
    }

    pub fn from_u128(value: u128) -> Self {
        Self(value)
    }

    pub fn as_u128(self) -> u128 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Where the ritual currently stands. Exactly one value is live at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureState {
    AwaitingPalm,
    PalmDetected {
        hand: HandSide,
        session_id: SessionId,
    },
    AwaitingFinger {
        hand: HandSide,
        finger_index: u8,
        session_id: SessionId,
    },
    FingerDetected {
        hand: HandSide,
        finger_index: u8,
        session_id: SessionId,
    },
    PalmCaptured {
        hand: HandSide,
        session_id: SessionId,
        frame_ref: FrameRef,
    },
    FingerCaptured {
        hand: HandSide,
        finger_index: u8,
        session_id: SessionId,
        frame_ref: FrameRef,
    },
    AllDone {
        hand: HandSide,
    },
    AwaitingVerification,
    VerificationDetected {
        landmarks: Vec<Landmark>,
    },
    Verification {
        frame_ref: FrameRef,
    },
    Error {
        message: String,
    },
}

impl CaptureState {
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            CaptureState::PalmDetected { session_id, .. }
            | CaptureState::AwaitingFinger { session_id, .. }
            | CaptureState::FingerDetected { session_id, .. }
            | CaptureState::PalmCaptured { session_id, .. }
            | CaptureState::FingerCaptured { session_id, .. } => Some(*session_id),
            CaptureState::AwaitingPalm
            | CaptureState::AllDone { .. }
            | CaptureState::AwaitingVerification
            | CaptureState::VerificationDetected { .. }
            | CaptureState::Verification { .. }
            | CaptureState::Error { .. } => None,
        }
    }

    pub fn hand(&self) -> Option<HandSide> {
        match self {
            CaptureState::PalmDetected { hand, .. }
            | CaptureState::AwaitingFinger { hand, .. }
            | CaptureState::FingerDetected { hand, .. }
            | CaptureState::PalmCaptured { hand, .. }
            | CaptureState::FingerCaptured { hand, .. }
            | CaptureState::AllDone { hand } => Some(*hand),
            CaptureState::AwaitingPalm
            | CaptureState::AwaitingVerification
            | CaptureState::VerificationDetected { .. }
            | CaptureState::Verification { .. }
            | CaptureState::Error { .. } => None,
        }
    }

    pub fn finger_index(&self) -> Option<u8> {
        match self {
            CaptureState::AwaitingFinger { finger_index, .. }
            | CaptureState::FingerDetected { finger_index, .. }
            | CaptureState::FingerCaptured { finger_index, .. } => Some(*finger_index),
            CaptureState::AwaitingPalm
            | CaptureState::PalmDetected { .. }
            | CaptureState::PalmCaptured { .. }
            | CaptureState::AllDone { .. }
            | CaptureState::AwaitingVerification
            | CaptureState::VerificationDetected { .. }
            | CaptureState::Verification { .. }
            | CaptureState::Error { .. } => None,
        }
    }

    /// Frame held by a captured state and not yet confirmed.
    pub fn frame_ref(&self) -> Option<&FrameRef> {
        match self {
            CaptureState::PalmCaptured { frame_ref, .. }
            | CaptureState::FingerCaptured { frame_ref, .. }
            | CaptureState::Verification { frame_ref } => Some(frame_ref),
            CaptureState::AwaitingPalm
            | CaptureState::PalmDetected { .. }
            | CaptureState::AwaitingFinger { .. }
            | CaptureState::FingerDetected { .. }
            | CaptureState::AllDone { .. }
            | CaptureState::AwaitingVerification
            | CaptureState::VerificationDetected { .. }
            | CaptureState::Error { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CaptureState::AwaitingPalm => "AwaitingPalm",
            CaptureState::PalmDetected { .. } => "PalmDetected",
            CaptureState::AwaitingFinger { .. } => "AwaitingFinger",
            CaptureState::FingerDetected { .. } => "FingerDetected",
            CaptureState::PalmCaptured { .. } => "PalmCaptured",
            CaptureState::FingerCaptured { .. } => "FingerCaptured",
            CaptureState::AllDone { .. } => "AllDone",
            CaptureState::AwaitingVerification => "AwaitingVerification",
            CaptureState::VerificationDetected { .. } => "VerificationDetected",
            CaptureState::Verification { .. } => "Verification",
            CaptureState::Error { .. } => "Error",
        }
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let finger = self.finger_index().and_then(Finger::from_index);
        match (self, finger) {
            (CaptureState::Error { message }, _) => write!(f, "Error: {}", message),
            (CaptureState::AllDone { hand }, _) => write!(f, "AllDone ({} hand)", hand),
            (_, Some(finger)) => write!(f, "{} ({} finger)", self.name(), finger),
            _ => f.write_str(self.name()),
        }
    }
}

/// What a capture in flight is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStep {
    Palm,
    Finger(Finger),
    Verification,
}

/// Issued by `start_capture`; the matching `capture_confirmed` must present
/// it. Tickets from before a cancel or reset are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTicket {
    pub(crate) epoch: u64,
    pub step: CaptureStep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionWarning {
    /// Back of the hand is facing the camera.
    DorsalSide,
    WrongHand { expected: HandSide },
}

impl SessionWarning {
    pub fn message(&self) -> String {
        match self {
            SessionWarning::DorsalSide => "Turn your hand so the palm faces the camera".to_string(),
            SessionWarning::WrongHand { expected } => format!("Please use your {} hand", expected),
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            SessionWarning::DorsalSide => "icon/hand_flip",
            SessionWarning::WrongHand { .. } => "icon/hand_switch",
        }
    }
}

/// One-shot notifications for the UI and the frame store owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Warning(SessionWarning),
    /// Focus the camera at this normalized point.
    Autofocus { x: f32, y: f32 },
    /// The frame will never be used; remove it from storage.
    DeleteFrame(FrameRef),
    StepCompleted { step: CaptureStep, frame_ref: FrameRef },
    /// Frame validation warnings changed; the full set in display order.
    ValidationWarnings(Vec<ValidationWarning>),
    /// Validation reached its quota for the current step.
    FramesReady(Vec<AcceptedFrame>),
}
