pub mod controller;
pub mod landmarks;
pub mod session;
pub mod state;

pub use controller::CaptureController;
pub use landmarks::{finger_in_window, Finger, HandObservation, HandSide, Landmark};
pub use session::CaptureSession;
pub use state::{CaptureState, CaptureStep, CaptureTicket, SessionEvent, SessionId, SessionWarning};
