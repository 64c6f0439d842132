use crate::storage::FrameRef;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptedFrame {
    pub frame_ref: FrameRef,
    pub quality_score: f32,
    pub timestamp: DateTime<Utc>,
}

/// Frames that passed every check, oldest first.
#[derive(Debug)]
pub struct AcceptedFrameBuffer {
    frames: VecDeque<AcceptedFrame>,
    max_size: usize,
    required: usize,
}

impl AcceptedFrameBuffer {
    pub fn new(required: usize, max_size: usize) -> Self {
        let max_size = max_size.max(required).max(1);
        Self {
            frames: VecDeque::with_capacity(max_size),
            max_size,
            required,
        }
    }

    /// Appends a frame and returns whatever fell off the front.
    pub fn push(&mut self, frame: AcceptedFrame) -> Vec<AcceptedFrame> {
        self.frames.push_back(frame);
        let mut evicted = Vec::new();
        while self.frames.len() > self.max_size {
            if let Some(old) = self.frames.pop_front() {
                evicted.push(old);
            }
        }
        evicted
    }

    pub fn is_complete(&self) -> bool {
        self.frames.len() >= self.required
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn required(&self) -> usize {
        self.required
    }

    pub fn snapshot(&self) -> Vec<AcceptedFrame> {
        self.frames.iter().cloned().collect()
    }

    /// Empties the buffer, handing back the frames so their storage can go.
    pub fn drain(&mut self) -> Vec<AcceptedFrame> {
        self.frames.drain(..).collect()
    }
}
