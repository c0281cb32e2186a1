//! Detector seam.
//!
//! The trained model is an external collaborator. This module fixes what the
//! pipeline consumes from it (`Detection` lists per frame) and ships two
//! model-free backends: a scripted queue for tests and demos, and a replay of
//! recorded detections.

mod backend;
mod backends;
mod result;

pub use backend::{
    apply_params, DetectParams, DetectorBackend, DEFAULT_CONFIDENCE_THRESHOLD,
    DEFAULT_IOU_THRESHOLD,
};
pub use backends::{ReplayBackend, ScriptedBackend};
pub use result::{BoundingBox, Detection, FruitClass};
