use crate::common::config::PlacementConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Points in the 21-landmark hand model.
pub const HAND_LANDMARK_COUNT: usize = 21;

pub const WRIST: usize = 0;
const THUMB: [usize; 4] = [WRIST, 2, 3, 4];
const INDEX: [usize; 4] = [5, 6, 7, 8];
const MIDDLE: [usize; 4] = [9, 10, 11, 12];
const RING: [usize; 4] = [13, 14, 15, 16];
const PINKY: [usize; 4] = [17, 18, 19, 20];
const PALM: [usize; 5] = [WRIST, 5, 9, 13, 17];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandSide {
    Left,
    Right,
}

impl fmt::Display for HandSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandSide::Left => write!(f, "left"),
            HandSide::Right => write!(f, "right"),
        }
    }
}

/// Capture order of the fingers. `finger_index` in the session indexes this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Finger {
    Thumb,
    Index,
    Middle,
    Ring,
    Pinky,
}

impl Finger {
    pub const ALL: [Finger; 5] = [
        Finger::Thumb,
        Finger::Index,
        Finger::Middle,
        Finger::Ring,
        Finger::Pinky,
    ];

    pub const COUNT: u8 = 5;

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    /// Landmarks that locate this finger: MCP to TIP, with the wrist standing
    /// in for the thumb's missing phalanx.
    pub fn landmark_indices(self) -> &'static [usize] {
        match self {
            Finger::Thumb => &THUMB,
            Finger::Index => &INDEX,
            Finger::Middle => &MIDDLE,
            Finger::Ring => &RING,
            Finger::Pinky => &PINKY,
        }
    }
}

impl fmt::Display for Finger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Finger::Thumb => "thumb",
            Finger::Index => "index",
            Finger::Middle => "middle",
            Finger::Ring => "ring",
            Finger::Pinky => "pinky",
        };
        f.write_str(name)
    }
}

/// Normalized image coordinates (0-1), optional relative depth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: Option<f32>,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: None }
    }
}

/// One detector result for one analyzed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandObservation {
    pub hand_side: HandSide,
    pub is_palm_side: bool,
    pub confidence: f32,
    pub landmarks: Vec<Landmark>,
    #[serde(skip, default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl HandObservation {
    pub fn new(hand_side: HandSide, is_palm_side: bool, confidence: f32, landmarks: Vec<Landmark>) -> Self {
        Self {
            hand_side,
            is_palm_side,
            confidence,
            landmarks,
            timestamp: Utc::now(),
        }
    }

    /// All 21 points present.
    pub fn is_complete(&self) -> bool {
        self.landmarks.len() >= HAND_LANDMARK_COUNT
    }

    pub fn centroid(&self, indices: &[usize]) -> Option<(f32, f32)> {
        if indices.is_empty() {
            return None;
        }
        let mut sx = 0.0;
        let mut sy = 0.0;
        for &i in indices {
            let p = self.landmarks.get(i)?;
            sx += p.x;
            sy += p.y;
        }
        let n = indices.len() as f32;
        Some((sx / n, sy / n))
    }

    pub fn palm_center(&self) -> Option<(f32, f32)> {
        self.centroid(&PALM)
    }

    pub fn finger_center(&self, finger: Finger) -> Option<(f32, f32)> {
        self.centroid(finger.landmark_indices())
    }
}

/// Returns the finger's centroid when it sits inside the placement window.
pub fn finger_in_window(obs: &HandObservation, finger: Finger, placement: &PlacementConfig) -> Option<(f32, f32)> {
    let (x, y) = obs.finger_center(finger)?;
    let inside = (placement.finger_x_min..=placement.finger_x_max).contains(&x)
        && (placement.finger_y_min..=placement.finger_y_max).contains(&y);
    inside.then_some((x, y))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A full hand resting low in the frame, with the chosen finger's
    /// landmarks moved to `(x, y)`.
    pub fn hand(side: HandSide, palm_side: bool, finger: Option<(Finger, f32, f32)>) -> HandObservation {
        let mut landmarks = vec![Landmark::new(0.2, 0.8); HAND_LANDMARK_COUNT];
        if let Some((finger, x, y)) = finger {
            for &i in finger.landmark_indices() {
                landmarks[i] = Landmark::new(x, y);
            }
        }
        HandObservation::new(side, palm_side, 0.9, landmarks)
    }
}
