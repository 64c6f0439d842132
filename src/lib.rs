pub mod camera;
pub mod cli;
pub mod common;
pub mod core;
pub mod geometry;
pub mod pipeline;
pub mod storage;

pub use camera::{Frame, PixelFormat};
pub use common::{CaptureError, Config, DevMode, Result};
pub use core::{CaptureController, CaptureSession, CaptureState, HandObservation, HandSide, SessionEvent};
pub use geometry::{CaptureWindow, FrameGeometry, RectF, Rotation, SizeF};
pub use pipeline::{FrameDispatcher, ImageHeuristics, QualityChecker, ValidationPipeline};
pub use storage::{DiskFrameStore, FileProgressStore, FrameRef, FrameStore};
