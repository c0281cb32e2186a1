//! Replay of recorded detections.
//!
//! The recording is JSON lines: one line per frame, each line an array of
//! detections, e.g.
//!
//! ```text
//! [{"bbox":{"x1":300,"y1":100,"x2":360,"y2":180},"class":"ripe","confidence":0.91,"track_id":3}]
//! []
//! ```

use std::path::Path;

use anyhow::{anyhow, Context, Result};

use crate::detect::backend::{apply_params, DetectParams, DetectorBackend};
use crate::detect::result::Detection;
use crate::frame::Frame;

pub struct ReplayBackend {
    frames: Vec<Vec<Detection>>,
    cursor: usize,
    looping: bool,
}

impl ReplayBackend {
    pub fn open(path: &Path, looping: bool) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read detection replay {}", path.display()))?;
        let backend = Self::from_json_lines(&raw, looping)
            .with_context(|| format!("invalid detection replay {}", path.display()))?;
        log::info!(
            "ReplayBackend: loaded {} frames from {} (looping={})",
            backend.len(),
            path.display(),
            looping
        );
        Ok(backend)
    }

    pub fn from_json_lines(raw: &str, looping: bool) -> Result<Self> {
        let mut frames = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let detections: Vec<Detection> = serde_json::from_str(line)
                .map_err(|e| anyhow!("line {}: {}", idx + 1, e))?;
            for det in &detections {
                det.validate()
                    .map_err(|e| anyhow!("line {}: {}", idx + 1, e))?;
            }
            frames.push(detections);
        }
        Ok(Self {
            frames,
            cursor: 0,
            looping,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// True once a non-looping replay has served every frame.
    pub fn is_exhausted(&self) -> bool {
        !self.looping && self.cursor >= self.frames.len()
    }
}

impl DetectorBackend for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn detect(&mut self, _frame: &Frame, params: &DetectParams) -> Result<Vec<Detection>> {
        if self.frames.is_empty() {
            return Ok(Vec::new());
        }
        if self.cursor >= self.frames.len() {
            if !self.looping {
                return Ok(Vec::new());
            }
            self.cursor = 0;
        }
        let raw = self.frames[self.cursor].clone();
        self.cursor += 1;
        Ok(apply_params(raw, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::FruitClass;

    const RECORDING: &str = r#"
[{"bbox":{"x1":300,"y1":100,"x2":360,"y2":180},"class":"ripe","confidence":0.91,"track_id":3}]

[]
[{"bbox":{"x1":10,"y1":10,"x2":40,"y2":50},"class":"unripe","confidence":0.66}]
"#;

    #[test]
    fn parses_frames_and_skips_blank_lines() {
        let backend = ReplayBackend::from_json_lines(RECORDING, false).unwrap();
        assert_eq!(backend.len(), 3);
    }

    #[test]
    fn replays_in_order_then_stops() {
        let mut backend = ReplayBackend::from_json_lines(RECORDING, false).unwrap();
        let frame = Frame::blank(8, 8, 0);
        let params = DetectParams::default();

        let first = backend.detect(&frame, &params).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].class, FruitClass::Ripe);
        assert_eq!(first[0].track_id, Some(3));
        assert!(backend.detect(&frame, &params).unwrap().is_empty());
        let third = backend.detect(&frame, &params).unwrap();
        assert_eq!(third[0].class, FruitClass::Unripe);
        assert!(backend.is_exhausted());
        assert!(backend.detect(&frame, &params).unwrap().is_empty());
    }

    #[test]
    fn looping_replay_wraps_around() {
        let mut backend = ReplayBackend::from_json_lines(RECORDING, true).unwrap();
        let frame = Frame::blank(8, 8, 0);
        let params = DetectParams::default();
        for _ in 0..3 {
            backend.detect(&frame, &params).unwrap();
        }
        assert!(!backend.is_exhausted());
        assert_eq!(backend.detect(&frame, &params).unwrap().len(), 1);
    }

    #[test]
    fn rejects_invalid_records_with_line_number() {
        let bad = r#"[{"bbox":{"x1":30,"y1":10,"x2":20,"y2":50},"class":"ripe","confidence":0.5}]"#;
        let err = ReplayBackend::from_json_lines(bad, false)
            .err()
            .expect("degenerate box rejected");
        assert!(err.to_string().contains("line 1"));

        assert!(ReplayBackend::from_json_lines("not json", false).is_err());
    }
}
