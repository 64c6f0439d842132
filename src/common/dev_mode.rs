use std::path::PathBuf;
use std::fs;
use directories::ProjectDirs;
use crate::common::error::{CaptureError, Result};

/// Resolves where session progress and captured frames live.
#[derive(Debug, Clone)]
pub struct DevMode {
    enabled: bool,
    base_dir: PathBuf,
}

impl DevMode {
    pub fn new(enabled: bool) -> Result<Self> {
        let base_dir = if enabled {
            PathBuf::from("./dev_data")
        } else {
            let dirs = ProjectDirs::from("com", "handcapture", "HandCapture")
                .ok_or_else(|| CaptureError::Storage("Failed to get project dirs".into()))?;
            dirs.data_dir().to_path_buf()
        };
        Ok(Self::with_base_dir(enabled, base_dir))
    }

    /// Uses an explicit data directory (config override, tests).
    pub fn with_base_dir(enabled: bool, base_dir: PathBuf) -> Self {
        Self { enabled, base_dir }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    pub fn session_dir(&self) -> PathBuf {
        self.base_dir.join("session")
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.base_dir.join("frames")
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.session_dir())?;
        fs::create_dir_all(self.frames_dir())?;

        if self.enabled {
            tracing::debug!("Development mode enabled - data saved to {}", self.base_dir.display());
        }
        Ok(())
    }
}
