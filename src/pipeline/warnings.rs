use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reasons a frame can be refused, one warning slot each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WarningKind {
    LowLight,
    Liveness,
    Segmentation,
    Blur,
    BrightSpots,
    /// A checker errored out instead of returning a verdict.
    CheckUnavailable,
}

impl WarningKind {
    pub fn message(self) -> &'static str {
        match self {
            WarningKind::LowLight => "Not enough light. Move somewhere brighter",
            WarningKind::Liveness => "Use your real hand, not a photo or screen",
            WarningKind::Segmentation => "Place your hand fully inside the frame",
            WarningKind::Blur => "Hold still, the image is blurry",
            WarningKind::BrightSpots => "Avoid direct light or reflections on your hand",
            WarningKind::CheckUnavailable => "Image checks are unavailable, try again",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            WarningKind::LowLight => "icon/low_light",
            WarningKind::Liveness => "icon/liveness",
            WarningKind::Segmentation => "icon/hand_outline",
            WarningKind::Blur => "icon/blur",
            WarningKind::BrightSpots => "icon/glare",
            WarningKind::CheckUnavailable => "icon/error",
        }
    }
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WarningKind::LowLight => "low-light",
            WarningKind::Liveness => "liveness",
            WarningKind::Segmentation => "segmentation",
            WarningKind::Blur => "blur",
            WarningKind::BrightSpots => "bright-spots",
            WarningKind::CheckUnavailable => "check-unavailable",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationWarning {
    pub kind: WarningKind,
    /// 1 = initial checks, 2 = segmentation, 3 = quality checks.
    pub stage: u8,
    pub message: String,
    pub icon: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    seq: u64,
}

/// Active warnings, at most one per kind.
#[derive(Debug, Default)]
pub struct WarningSet {
    active: Vec<ValidationWarning>,
    next_seq: u64,
}

impl WarningSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a warning, or refreshes the existing one of the same kind.
    /// Returns true when the set changed in a way a reader would notice.
    pub fn raise(&mut self, kind: WarningKind, stage: u8) -> bool {
        if let Some(existing) = self.active.iter_mut().find(|w| w.kind == kind) {
            let moved = existing.stage != stage;
            existing.stage = stage;
            existing.created_at = Utc::now();
            return moved;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.active.push(ValidationWarning {
            kind,
            stage,
            message: kind.message().to_string(),
            icon: kind.icon().to_string(),
            created_at: Utc::now(),
            seq,
        });
        true
    }

    pub fn clear(&mut self, kind: WarningKind) -> bool {
        let before = self.active.len();
        self.active.retain(|w| w.kind != kind);
        self.active.len() != before
    }

    pub fn clear_all(&mut self) -> bool {
        let changed = !self.active.is_empty();
        self.active.clear();
        changed
    }

    pub fn contains(&self, kind: WarningKind) -> bool {
        self.active.iter().any(|w| w.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Display order: stage first, then oldest first.
    pub fn snapshot(&self) -> Vec<ValidationWarning> {
        let mut out = self.active.clone();
        out.sort_by_key(|w| (w.stage, w.seq));
        out
    }
}
