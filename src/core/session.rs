//! Capture session state machine.
//!
//! Consumes detector results and user actions, publishes the current
//! [`CaptureState`] on a watch channel and one-shot [`SessionEvent`]s on a
//! broadcast channel. All mutation goes through `&mut self`, so there is a
//! single writer; readers only ever see whole states.
//!
//! The broadcast channel is lossy. Frames the session gives up on are also
//! queued until [`CaptureSession::take_orphans`] collects them, so storage
//! cleanup never depends on a subscriber keeping up.

use crate::common::config::PlacementConfig;
use crate::common::{CaptureError, Result};
use crate::core::landmarks::{finger_in_window, Finger, HandObservation, HandSide};
use crate::core::state::{
    CaptureState, CaptureStep, CaptureTicket, SessionEvent, SessionId, SessionWarning,
};
use crate::storage::{FrameRef, ProgressStore, SessionProgress};
use tokio::sync::{broadcast, watch};

const EVENT_CAPACITY: usize = 64;

pub struct CaptureSession {
    placement: PlacementConfig,
    store: Box<dyn ProgressStore>,
    state: watch::Sender<CaptureState>,
    events: broadcast::Sender<SessionEvent>,
    epoch: u64,
    in_flight: Option<CaptureTicket>,
    // Palm-phase identity; survives reverts to AwaitingPalm and retakes.
    pending_session: Option<SessionId>,
    last_warning: Option<SessionWarning>,
    orphans: Vec<FrameRef>,
}

impl CaptureSession {
    /// Resumes from persisted progress when there is any.
    pub fn new(placement: PlacementConfig, store: Box<dyn ProgressStore>) -> Result<Self> {
        let progress = store.load()?;
        let (initial, pending_session) = match progress {
            Some(SessionProgress { session_id, hand, finger_index: Some(index), .. }) => {
                let state = if index >= Finger::COUNT {
                    CaptureState::AllDone { hand }
                } else {
                    CaptureState::AwaitingFinger { hand, finger_index: index, session_id }
                };
                (state, Some(session_id))
            }
            Some(SessionProgress { session_id, finger_index: None, .. }) => {
                (CaptureState::AwaitingPalm, Some(session_id))
            }
            None => (CaptureState::AwaitingPalm, None),
        };

        tracing::info!("Capture session starting at {}", initial);

        let (state, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            placement,
            store,
            state,
            events,
            epoch: 0,
            in_flight: None,
            pending_session,
            last_warning: None,
            orphans: Vec::new(),
        })
    }

    pub fn state(&self) -> CaptureState {
        self.state.borrow().clone()
    }

    /// Latest-value view of the state for other tasks.
    pub fn watch(&self) -> watch::Receiver<CaptureState> {
        self.state.subscribe()
    }

    /// One-shot events. A receiver that falls more than 64 events behind
    /// loses the oldest ones.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Frames discarded since the last call, oldest first. The caller owns
    /// deleting them from storage.
    pub fn take_orphans(&mut self) -> Vec<FrameRef> {
        std::mem::take(&mut self.orphans)
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.state.borrow().session_id().or(self.pending_session)
    }

    pub fn is_capturing(&self) -> bool {
        self.in_flight.is_some()
    }

    fn publish(&mut self, next: CaptureState) {
        let previous = self.state.send_replace(next);
        let current = self.state.borrow();
        if previous != *current {
            tracing::debug!("Capture state {} -> {}", previous, *current);
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Re-publishes an event produced outside the state machine.
    pub(crate) fn forward(&self, event: SessionEvent) {
        self.emit(event);
    }

    fn warn(&mut self, warning: SessionWarning) {
        if self.last_warning == Some(warning) {
            return;
        }
        tracing::debug!("Placement warning: {}", warning.message());
        self.last_warning = Some(warning);
        self.emit(SessionEvent::Warning(warning));
    }

    fn discard(&mut self, frame_ref: FrameRef) {
        tracing::debug!("Discarding frame {}", frame_ref);
        self.orphans.push(frame_ref.clone());
        self.emit(SessionEvent::DeleteFrame(frame_ref));
    }

    /// Filters out detections that cannot count as a placement. Dorsal hands
    /// warn; weak or partial detections are silently treated as absent.
    fn usable<'a>(&mut self, obs: Option<&'a HandObservation>) -> Option<&'a HandObservation> {
        let obs = obs?;
        if obs.confidence < self.placement.min_confidence || !obs.is_complete() {
            return None;
        }
        if !obs.is_palm_side {
            self.warn(SessionWarning::DorsalSide);
            return None;
        }
        Some(obs)
    }

    /// Feeds one detector result. Ignored while a capture is in flight.
    pub fn observe(&mut self, obs: Option<&HandObservation>) {
        if self.in_flight.is_some() {
            return;
        }

        match self.state() {
            CaptureState::AwaitingPalm => self.observe_palm(obs, false),
            CaptureState::PalmDetected { .. } => self.observe_palm(obs, true),
            CaptureState::AwaitingFinger { hand, finger_index, session_id } => {
                self.observe_finger(obs, hand, finger_index, session_id, false)
            }
            CaptureState::FingerDetected { hand, finger_index, session_id } => {
                self.observe_finger(obs, hand, finger_index, session_id, true)
            }
            CaptureState::AwaitingVerification => self.observe_verification(obs, false),
            CaptureState::VerificationDetected { .. } => self.observe_verification(obs, true),
            CaptureState::PalmCaptured { .. }
            | CaptureState::FingerCaptured { .. }
            | CaptureState::AllDone { .. }
            | CaptureState::Verification { .. }
            | CaptureState::Error { .. } => {}
        }
    }

    fn observe_palm(&mut self, obs: Option<&HandObservation>, detected: bool) {
        let Some(obs) = self.usable(obs) else {
            if detected {
                self.publish(CaptureState::AwaitingPalm);
            }
            return;
        };

        self.last_warning = None;
        let session_id = *self.pending_session.get_or_insert_with(SessionId::generate);
        if !detected {
            if let Some((x, y)) = obs.palm_center() {
                self.emit(SessionEvent::Autofocus { x, y });
            }
        }
        self.publish(CaptureState::PalmDetected { hand: obs.hand_side, session_id });
    }

    fn observe_finger(
        &mut self,
        obs: Option<&HandObservation>,
        hand: HandSide,
        finger_index: u8,
        session_id: SessionId,
        detected: bool,
    ) {
        let Some(finger) = Finger::from_index(finger_index) else {
            return;
        };

        let placed = match self.usable(obs) {
            Some(obs) if obs.hand_side != hand => {
                self.warn(SessionWarning::WrongHand { expected: hand });
                None
            }
            Some(obs) => finger_in_window(obs, finger, &self.placement),
            None => None,
        };

        match placed {
            Some((x, y)) => {
                self.last_warning = None;
                if !detected {
                    self.emit(SessionEvent::Autofocus { x, y });
                    self.publish(CaptureState::FingerDetected { hand, finger_index, session_id });
                }
            }
            None if detected => {
                self.publish(CaptureState::AwaitingFinger { hand, finger_index, session_id });
            }
            None => {}
        }
    }

    fn observe_verification(&mut self, obs: Option<&HandObservation>, detected: bool) {
        let Some(obs) = self.usable(obs) else {
            if detected {
                self.publish(CaptureState::AwaitingVerification);
            }
            return;
        };

        self.last_warning = None;
        if !detected {
            if let Some((x, y)) = obs.palm_center() {
                self.emit(SessionEvent::Autofocus { x, y });
            }
        }
        self.publish(CaptureState::VerificationDetected { landmarks: obs.landmarks.clone() });
    }

    /// Freezes the placement state for a shutter press. Only valid from a
    /// detected state; returns the ticket the result must be confirmed with.
    pub fn start_capture(&mut self) -> Option<CaptureTicket> {
        if self.in_flight.is_some() {
            return None;
        }

        let step = match self.state() {
            CaptureState::PalmDetected { .. } => CaptureStep::Palm,
            CaptureState::FingerDetected { finger_index, .. } => {
                CaptureStep::Finger(Finger::from_index(finger_index)?)
            }
            CaptureState::VerificationDetected { .. } => CaptureStep::Verification,
            CaptureState::AwaitingPalm
            | CaptureState::AwaitingFinger { .. }
            | CaptureState::PalmCaptured { .. }
            | CaptureState::FingerCaptured { .. }
            | CaptureState::AllDone { .. }
            | CaptureState::AwaitingVerification
            | CaptureState::Verification { .. }
            | CaptureState::Error { .. } => return None,
        };

        let ticket = CaptureTicket { epoch: self.epoch, step };
        self.in_flight = Some(ticket);
        tracing::debug!("Capture started for {:?}", step);
        Some(ticket)
    }

    pub fn cancel_capture(&mut self) {
        if self.in_flight.take().is_some() {
            self.epoch += 1;
            tracing::debug!("Capture cancelled");
        }
    }

    /// Attaches the stored frame to the pending capture. A ticket from before
    /// a cancel/reset is stale: its frame is discarded and nothing changes.
    /// Returns whether the frame was taken.
    pub fn capture_confirmed(&mut self, ticket: CaptureTicket, frame_ref: FrameRef) -> bool {
        if self.in_flight != Some(ticket) {
            tracing::debug!("Stale capture result (ticket epoch {}, now {})", ticket.epoch, self.epoch);
            self.discard(frame_ref);
            return false;
        }
        self.in_flight = None;

        let next = match (self.state(), ticket.step) {
            (CaptureState::PalmDetected { hand, session_id }, CaptureStep::Palm) => {
                CaptureState::PalmCaptured { hand, session_id, frame_ref }
            }
            (
                CaptureState::FingerDetected { hand, finger_index, session_id },
                CaptureStep::Finger(_),
            ) => CaptureState::FingerCaptured { hand, finger_index, session_id, frame_ref },
            (CaptureState::VerificationDetected { .. }, CaptureStep::Verification) => {
                CaptureState::Verification { frame_ref }
            }
            _ => {
                self.discard(frame_ref);
                return false;
            }
        };

        tracing::info!("Captured {:?}", ticket.step);
        self.publish(next);
        true
    }

    /// Accepts the captured frame and moves to the next step. Progress is
    /// persisted first; on storage failure nothing changes. No-op outside a
    /// captured state.
    pub fn confirm_step(&mut self) -> Result<()> {
        match self.state() {
            CaptureState::PalmCaptured { hand, session_id, frame_ref } => {
                self.store.save(&SessionProgress::new(session_id, hand, Some(0)))?;
                tracing::info!("Palm confirmed for session {}", session_id);
                self.emit(SessionEvent::StepCompleted { step: CaptureStep::Palm, frame_ref });
                self.publish(CaptureState::AwaitingFinger { hand, finger_index: 0, session_id });
            }
            CaptureState::FingerCaptured { hand, finger_index, session_id, frame_ref } => {
                let next_index = finger_index + 1;
                self.store.save(&SessionProgress::new(session_id, hand, Some(next_index)))?;

                if let Some(finger) = Finger::from_index(finger_index) {
                    tracing::info!("{} finger confirmed for session {}", finger, session_id);
                    self.emit(SessionEvent::StepCompleted { step: CaptureStep::Finger(finger), frame_ref });
                }
                if next_index >= Finger::COUNT {
                    self.publish(CaptureState::AllDone { hand });
                } else {
                    self.publish(CaptureState::AwaitingFinger { hand, finger_index: next_index, session_id });
                }
            }
            CaptureState::AwaitingPalm
            | CaptureState::PalmDetected { .. }
            | CaptureState::AwaitingFinger { .. }
            | CaptureState::FingerDetected { .. }
            | CaptureState::AllDone { .. }
            | CaptureState::AwaitingVerification
            | CaptureState::VerificationDetected { .. }
            | CaptureState::Verification { .. }
            | CaptureState::Error { .. } => {}
        }
        Ok(())
    }

    /// Throws the captured frame away and goes back to waiting for the same
    /// step. Returns whether there was anything to retake.
    pub fn retake(&mut self) -> bool {
        let next = match self.state() {
            CaptureState::PalmCaptured { frame_ref, .. } => {
                self.discard(frame_ref);
                CaptureState::AwaitingPalm
            }
            CaptureState::FingerCaptured { hand, finger_index, session_id, frame_ref } => {
                self.discard(frame_ref);
                CaptureState::AwaitingFinger { hand, finger_index, session_id }
            }
            CaptureState::Verification { frame_ref } => {
                self.discard(frame_ref);
                CaptureState::AwaitingVerification
            }
            CaptureState::AwaitingPalm
            | CaptureState::PalmDetected { .. }
            | CaptureState::AwaitingFinger { .. }
            | CaptureState::FingerDetected { .. }
            | CaptureState::AllDone { .. }
            | CaptureState::AwaitingVerification
            | CaptureState::VerificationDetected { .. }
            | CaptureState::Error { .. } => return false,
        };

        self.last_warning = None;
        self.publish(next);
        true
    }

    /// Routes a capture-side error. Device failures end the attempt and
    /// return true; anything else is logged and the state is kept.
    pub fn on_device_error(&mut self, error: &CaptureError) -> bool {
        if !error.is_fatal() {
            tracing::debug!("Ignoring recoverable capture error: {}", error);
            return false;
        }
        self.on_error(error.to_string());
        true
    }

    /// Device failure. Terminal until [`CaptureSession::reset`].
    pub fn on_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("Capture session error: {}", message);

        self.in_flight = None;
        self.epoch += 1;
        let held = self.state.borrow().frame_ref().cloned();
        if let Some(frame_ref) = held {
            self.discard(frame_ref);
        }
        self.publish(CaptureState::Error { message });
    }

    pub fn start_verification(&mut self) {
        if matches!(*self.state.borrow(), CaptureState::Error { .. }) {
            return;
        }

        if self.in_flight.take().is_some() {
            self.epoch += 1;
        }
        let held = self.state.borrow().frame_ref().cloned();
        if let Some(frame_ref) = held {
            self.discard(frame_ref);
        }
        self.last_warning = None;
        self.publish(CaptureState::AwaitingVerification);
    }

    /// Verification shot stored. Same staleness rules as
    /// [`CaptureSession::capture_confirmed`]; a ticket for any other step is
    /// refused and its frame discarded.
    pub fn verification_frame_ready(&mut self, ticket: CaptureTicket, frame_ref: FrameRef) -> bool {
        if ticket.step != CaptureStep::Verification {
            self.discard(frame_ref);
            return false;
        }
        self.capture_confirmed(ticket, frame_ref)
    }

    /// Clears persisted progress and starts over at `AwaitingPalm`. Work still
    /// in flight is disowned.
    pub fn reset(&mut self) -> Result<()> {
        self.store.clear()?;

        self.epoch += 1;
        self.in_flight = None;
        let held = self.state.borrow().frame_ref().cloned();
        if let Some(frame_ref) = held {
            self.discard(frame_ref);
        }
        self.pending_session = None;
        self.last_warning = None;
        tracing::info!("Capture session reset");
        self.publish(CaptureState::AwaitingPalm);
        Ok(())
    }
}
