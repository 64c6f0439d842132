use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    /// The capture window maps to an empty region of the sensor frame.
    #[error("No valid crop for the capture window")]
    NoValidCrop,

    #[error("Detector failure: {0}")]
    DetectorFailure(String),

    #[error("Capture device error: {0}")]
    CaptureDevice(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl CaptureError {
    /// Device-level failures are the only ones that end a capture attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CaptureError::CaptureDevice(_))
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;
