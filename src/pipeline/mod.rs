//! Staged frame validation.
//!
//! A frame is cropped to the capture window, then checked in three stages:
//! low light and liveness together, segmentation, then blur and bright spots
//! together. Frames that pass every stage are stored and buffered until the
//! quota is met.

pub mod buffer;
pub mod checks;
pub mod dispatch;
pub mod heuristics;
pub mod validator;
pub mod warnings;

pub use buffer::{AcceptedFrame, AcceptedFrameBuffer};
pub use checks::{CheckOutcome, QualityCheck, QualityChecker};
pub use dispatch::FrameDispatcher;
pub use heuristics::ImageHeuristics;
pub use validator::{DropReason, FrameOutcome, PipelineEvent, PipelineStage, ValidationPipeline};
pub use warnings::{ValidationWarning, WarningKind, WarningSet};
