use crate::common::{CaptureError, Result};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Opaque handle to a stored frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRef(String);

impl FrameRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FrameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persistent storage for captured crops.
pub trait FrameStore: Send + Sync {
    fn save(&self, image: &DynamicImage) -> Result<FrameRef>;
    fn delete(&self, frame: &FrameRef) -> Result<()>;
}

fn frame_name() -> String {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S%3f");
    format!("frame_{}_{:08x}", timestamp, rand::random::<u32>())
}

/// Writes crops as PNG files into one directory.
pub struct DiskFrameStore {
    dir: PathBuf,
}

impl DiskFrameStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, frame: &FrameRef) -> Result<PathBuf> {
        let name = frame.as_str();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(CaptureError::Storage(format!("Invalid frame reference: {}", name)));
        }
        Ok(self.dir.join(format!("{}.png", name)))
    }
}

impl FrameStore for DiskFrameStore {
    fn save(&self, image: &DynamicImage) -> Result<FrameRef> {
        let frame = FrameRef::new(frame_name());
        let path = self.path(&frame)?;
        image
            .save(&path)
            .map_err(|e| CaptureError::Storage(format!("Failed to write {}: {}", path.display(), e)))?;
        tracing::debug!("Stored frame {} at {:?}", frame, path);
        Ok(frame)
    }

    fn delete(&self, frame: &FrameRef) -> Result<()> {
        let path = self.path(frame)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!("Deleted frame {}", frame);
                Ok(())
            }
            // Already gone is as good as deleted.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CaptureError::Storage(format!(
                "Failed to delete {}: {}", path.display(), e
            ))),
        }
    }
}

/// Keeps crops in memory; used for dry runs.
#[derive(Default)]
pub struct MemoryFrameStore {
    frames: Mutex<HashMap<FrameRef, DynamicImage>>,
}

impl MemoryFrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, frame: &FrameRef) -> bool {
        self.frames.lock().map(|f| f.contains_key(frame)).unwrap_or(false)
    }
}

impl FrameStore for MemoryFrameStore {
    fn save(&self, image: &DynamicImage) -> Result<FrameRef> {
        let frame = FrameRef::new(frame_name());
        self.frames
            .lock()
            .map_err(|_| CaptureError::Storage("frame store lock poisoned".into()))?
            .insert(frame.clone(), image.clone());
        Ok(frame)
    }

    fn delete(&self, frame: &FrameRef) -> Result<()> {
        self.frames
            .lock()
            .map_err(|_| CaptureError::Storage("frame store lock poisoned".into()))?
            .remove(frame);
        Ok(())
    }
}
