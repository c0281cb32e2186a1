//! Target-zone gate.
//!
//! The zone is a vertical band of the image bounded by two pixel columns.
//! A detection whose center column lies inside the band (inclusive at both
//! edges) is ready for actuation.

use anyhow::Result;
use serde::Serialize;

use crate::detect::{Detection, FruitClass};
use crate::{OperatorError, ZONE_BOUNDS_INVALID};

pub const DEFAULT_ZONE_LEFT: i32 = 250;
pub const DEFAULT_ZONE_RIGHT: i32 = 390;

/// BGR triple, the channel order of the camera frames.
pub type Bgr = (u8, u8, u8);

pub const RIPE_COLOR: Bgr = (0, 255, 0);
pub const UNRIPE_COLOR: Bgr = (0, 0, 255);
/// Overrides the class color for detections inside the zone.
pub const HIGHLIGHT_COLOR: Bgr = (0, 165, 255);

/// Horizontal pixel band. `left < right` always holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TargetZone {
    left: i32,
    right: i32,
}

impl Default for TargetZone {
    fn default() -> Self {
        Self {
            left: DEFAULT_ZONE_LEFT,
            right: DEFAULT_ZONE_RIGHT,
        }
    }
}

impl TargetZone {
    pub fn new(left: i32, right: i32, image_width: u32) -> Result<Self> {
        if left >= right {
            return Err(OperatorError::new(
                ZONE_BOUNDS_INVALID,
                format!("left bound {left} must be smaller than right bound {right}"),
            )
            .into());
        }
        let max = i64::from(image_width);
        if left < 0 || i64::from(right) > max {
            return Err(OperatorError::new(
                ZONE_BOUNDS_INVALID,
                format!("zone [{left}, {right}] outside image width {image_width}"),
            )
            .into());
        }
        Ok(Self { left, right })
    }

    pub fn left(&self) -> i32 {
        self.left
    }

    pub fn right(&self) -> i32 {
        self.right
    }

    /// Replace the bounds. A rejected update keeps the current zone.
    pub fn update(&mut self, left: i32, right: i32, image_width: u32) -> Result<()> {
        *self = Self::new(left, right, image_width)?;
        Ok(())
    }

    pub fn contains(&self, center_x: i32) -> bool {
        self.left <= center_x && center_x <= self.right
    }
}

/// True iff `center_x` lies in `zone`, edges included.
pub fn in_zone(center_x: i32, zone: &TargetZone) -> bool {
    zone.contains(center_x)
}

/// Per-frame gate outcome.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GateResult {
    /// One flag per detection, in detector order.
    pub in_zone: Vec<bool>,
    /// At least one detection is inside the zone.
    pub target_in_zone: bool,
}

/// Evaluate the gate for every detection of one frame.
pub fn evaluate(detections: &[Detection], zone: &TargetZone) -> GateResult {
    let in_zone: Vec<bool> = detections
        .iter()
        .map(|d| in_zone(d.center().0, zone))
        .collect();
    let target_in_zone = in_zone.iter().any(|hit| *hit);
    GateResult {
        in_zone,
        target_in_zone,
    }
}

/// Overlay color for a detection. The zone highlight wins over the class color.
pub fn render_color(class: FruitClass, in_zone: bool) -> Bgr {
    if in_zone {
        return HIGHLIGHT_COLOR;
    }
    match class {
        FruitClass::Ripe => RIPE_COLOR,
        FruitClass::Unripe => UNRIPE_COLOR,
    }
}
