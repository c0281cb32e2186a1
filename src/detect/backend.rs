use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// Per-call detector knobs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectParams {
    /// Minimum confidence in [0, 1].
    pub confidence_threshold: f32,
    /// Overlap above which the weaker of two same-class boxes is dropped, in [0, 1].
    pub iou_threshold: f32,
    /// Keep track identifiers across frames.
    pub tracking: bool,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            tracking: true,
        }
    }
}

/// Detector backend trait.
///
/// The model itself lives outside this crate. Backends hand back the
/// detections for one frame, in detector order.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame, params: &DetectParams) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Enforce the thresholds and tracking flag on raw backend output.
///
/// Survivors keep their original relative order.
pub fn apply_params(detections: Vec<Detection>, params: &DetectParams) -> Vec<Detection> {
    let mut candidates: Vec<Detection> = detections
        .into_iter()
        .filter(|d| d.confidence >= params.confidence_threshold)
        .collect();

    let mut by_confidence: Vec<usize> = (0..candidates.len()).collect();
    by_confidence.sort_by(|a, b| {
        candidates[*b]
            .confidence
            .total_cmp(&candidates[*a].confidence)
    });

    let mut keep = vec![false; candidates.len()];
    for &idx in &by_confidence {
        let overlaps = by_confidence
            .iter()
            .filter(|&&kept| keep[kept])
            .any(|&kept| {
                candidates[kept].class == candidates[idx].class
                    && candidates[kept].bbox.iou(&candidates[idx].bbox) > params.iou_threshold
            });
        keep[idx] = !overlaps;
    }

    let mut idx = 0;
    candidates.retain(|_| {
        let kept = keep[idx];
        idx += 1;
        kept
    });

    if !params.tracking {
        for det in &mut candidates {
            det.track_id = None;
        }
    }
    candidates
}
