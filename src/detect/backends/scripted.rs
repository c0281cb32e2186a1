use std::collections::VecDeque;

use anyhow::Result;

use crate::detect::backend::{apply_params, DetectParams, DetectorBackend};
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Scripted backend for tests and demos. Hands out one queued detection
/// list per frame, then empty frames once the script runs out.
#[derive(Default)]
pub struct ScriptedBackend {
    frames: VecDeque<Vec<Detection>>,
    frames_served: u64,
}

impl ScriptedBackend {
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self {
            frames: frames.into(),
            frames_served: 0,
        }
    }

    /// Queue the detections for one more frame.
    pub fn push_frame(&mut self, detections: Vec<Detection>) {
        self.frames.push_back(detections);
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }

    pub fn frames_served(&self) -> u64 {
        self.frames_served
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame, params: &DetectParams) -> Result<Vec<Detection>> {
        self.frames_served += 1;
        let raw = self.frames.pop_front().unwrap_or_default();
        Ok(apply_params(raw, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::{BoundingBox, FruitClass};

    #[test]
    fn serves_script_then_empty_frames() {
        let det = Detection::new(
            BoundingBox::new(0.0, 0.0, 10.0, 10.0).unwrap(),
            FruitClass::Ripe,
            0.9,
            None,
        )
        .unwrap();
        let mut backend = ScriptedBackend::new(vec![vec![det.clone()], vec![]]);
        backend.push_frame(vec![det]);
        let frame = Frame::blank(16, 16, 0);
        let params = DetectParams::default();

        assert_eq!(backend.detect(&frame, &params).unwrap().len(), 1);
        assert_eq!(backend.detect(&frame, &params).unwrap().len(), 0);
        assert_eq!(backend.detect(&frame, &params).unwrap().len(), 1);
        assert_eq!(backend.remaining(), 0);
        assert!(backend.detect(&frame, &params).unwrap().is_empty());
        assert_eq!(backend.frames_served(), 4);
    }
}
