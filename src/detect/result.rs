use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Detector classes. Index order matches the trained model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FruitClass {
    Ripe,
    Unripe,
}

impl FruitClass {
    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Self::Ripe),
            1 => Some(Self::Unripe),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Ripe => "Ripe",
            Self::Unripe => "Unripe",
        }
    }
}

/// Axis-aligned box in pixel space (`x2 > x1`, `y2 > y1`).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Result<Self> {
        let bbox = Self { x1, y1, x2, y2 };
        bbox.validate()?;
        Ok(bbox)
    }

    pub fn validate(&self) -> Result<()> {
        let finite = [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(anyhow!("bounding box has non-finite corner"));
        }
        if self.x2 <= self.x1 || self.y2 <= self.y1 {
            return Err(anyhow!(
                "degenerate bounding box ({}, {})-({}, {})",
                self.x1,
                self.y1,
                self.x2,
                self.y2
            ));
        }
        Ok(())
    }

    /// Corners truncated to whole pixels, the resolution overlays and the gate work at.
    pub fn pixel_corners(&self) -> (i32, i32, i32, i32) {
        (
            self.x1 as i32,
            self.y1 as i32,
            self.x2 as i32,
            self.y2 as i32,
        )
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1) * (self.y2 - self.y1)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One recognized fruit in one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class: FruitClass,
    pub confidence: f32,
    /// Stable across frames while the tracker holds the object.
    #[serde(default)]
    pub track_id: Option<u32>,
}

impl Detection {
    pub fn new(
        bbox: BoundingBox,
        class: FruitClass,
        confidence: f32,
        track_id: Option<u32>,
    ) -> Result<Self> {
        let detection = Self {
            bbox,
            class,
            confidence,
            track_id,
        };
        detection.validate()?;
        Ok(detection)
    }

    pub fn validate(&self) -> Result<()> {
        self.bbox.validate()?;
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(anyhow!(
                "detection confidence {} out of bounds",
                self.confidence
            ));
        }
        Ok(())
    }

    /// Box center in whole pixels.
    pub fn center(&self) -> (i32, i32) {
        let (x1, y1, x2, y2) = self.bbox.pixel_corners();
        ((x1 + x2) / 2, (y1 + y2) / 2)
    }

    /// Apparent width in whole pixels; the input to the range estimate.
    pub fn pixel_width(&self) -> i32 {
        let (x1, _, x2, _) = self.bbox.pixel_corners();
        x2 - x1
    }
}
