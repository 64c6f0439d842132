use crate::common::{CaptureError, Result};
use crate::core::{HandSide, SessionId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

const PROGRESS_VERSION: u32 = 1;

/// Everything needed to resume a capture ritual after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProgress {
    pub version: u32,
    pub session_id: SessionId,
    pub hand: HandSide,
    /// Next finger to capture. `None` means the palm is still pending.
    #[serde(default)]
    pub finger_index: Option<u8>,
}

impl SessionProgress {
    pub fn new(session_id: SessionId, hand: HandSide, finger_index: Option<u8>) -> Self {
        Self {
            version: PROGRESS_VERSION,
            session_id,
            hand,
            finger_index,
        }
    }
}

pub trait ProgressStore: Send + Sync {
    fn load(&self) -> Result<Option<SessionProgress>>;
    fn save(&self, progress: &SessionProgress) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Bincode record in a single file.
pub struct FileProgressStore {
    path: PathBuf,
}

impl FileProgressStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { path: dir.join("progress.bincode") })
    }
}

impl ProgressStore for FileProgressStore {
    fn load(&self) -> Result<Option<SessionProgress>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let data = fs::read(&self.path)?;
        let mut progress: SessionProgress = bincode::deserialize(&data)
            .map_err(|e| CaptureError::Storage(format!("Failed to deserialize progress: {}", e)))?;

        if progress.version < PROGRESS_VERSION {
            progress.version = PROGRESS_VERSION;
        }

        Ok(Some(progress))
    }

    fn save(&self, progress: &SessionProgress) -> Result<()> {
        let encoded = bincode::serialize(progress)
            .map_err(|e| CaptureError::Storage(format!("Failed to serialize progress: {}", e)))?;

        // Write-then-rename so a crash never leaves a torn record.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, encoded)
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|e| CaptureError::Storage(format!("Failed to save progress: {}", e)))?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CaptureError::Storage(format!("Failed to clear progress: {}", e))),
        }
    }
}

/// Non-persistent progress, for replays and dry runs.
#[derive(Default)]
pub struct MemoryProgressStore {
    progress: Mutex<Option<SessionProgress>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressStore for MemoryProgressStore {
    fn load(&self) -> Result<Option<SessionProgress>> {
        Ok(self
            .progress
            .lock()
            .map_err(|_| CaptureError::Storage("progress lock poisoned".into()))?
            .clone())
    }

    fn save(&self, progress: &SessionProgress) -> Result<()> {
        *self
            .progress
            .lock()
            .map_err(|_| CaptureError::Storage("progress lock poisoned".into()))? = Some(progress.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self
            .progress
            .lock()
            .map_err(|_| CaptureError::Storage("progress lock poisoned".into()))? = None;
        Ok(())
    }
}
