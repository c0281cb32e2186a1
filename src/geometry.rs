//! Monocular range and position estimation.
//!
//! Distance comes from the pinhole relation between a known real-world width
//! and its apparent width in pixels. Position offsets are scaled from the
//! image center by `Z / focal_length`.
//!
//! Every function here is pure. A non-positive denominator yields the
//! documented sentinel (zero distance, origin position) rather than an error:
//! frames with no usable measurement are routine.

use anyhow::Result;
use serde::Serialize;

use crate::{OperatorError, CALIBRATION_INVALID_WIDTH, CALIBRATION_NO_REFERENCE};

pub const DEFAULT_FOCAL_LENGTH_PX: f64 = 615.0;
pub const DEFAULT_REAL_WIDTH_CM: f64 = 3.0;
pub const DEFAULT_CALIBRATION_DISTANCE_CM: f64 = 30.0;
pub const DEFAULT_IMAGE_WIDTH: u32 = 640;
pub const DEFAULT_IMAGE_HEIGHT: u32 = 480;

/// Camera model used by the range estimator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationParameters {
    /// Focal length in pixels.
    pub focal_length_px: f64,
    /// Real-world width of the reference object (a strawberry) in cm.
    pub real_width_cm: f64,
    /// Distance at which the reference object is held during calibration, in cm.
    pub calibration_distance_cm: f64,
    pub image_width: u32,
    pub image_height: u32,
}

impl Default for CalibrationParameters {
    fn default() -> Self {
        Self {
            focal_length_px: DEFAULT_FOCAL_LENGTH_PX,
            real_width_cm: DEFAULT_REAL_WIDTH_CM,
            calibration_distance_cm: DEFAULT_CALIBRATION_DISTANCE_CM,
            image_width: DEFAULT_IMAGE_WIDTH,
            image_height: DEFAULT_IMAGE_HEIGHT,
        }
    }
}

impl CalibrationParameters {
    /// Re-derive the focal length from a reference object held at
    /// `calibration_distance_cm`.
    ///
    /// On failure the parameters are left untouched.
    pub fn recalibrate(&mut self, observed_pixel_width: f64, real_width_cm: f64) -> Result<f64> {
        let focal = calibrate(
            observed_pixel_width,
            real_width_cm,
            self.calibration_distance_cm,
        )?;
        self.focal_length_px = focal;
        self.real_width_cm = real_width_cm;
        Ok(focal)
    }
}

/// Camera-relative position in centimeters.
///
/// Z is depth along the optical axis, X grows to the operator's right and
/// Y grows upward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Position3D {
    pub x_cm: f64,
    pub y_cm: f64,
    pub z_cm: f64,
}

/// Distance to an object of `calib.real_width_cm` that spans `pixel_width` pixels.
///
/// Returns 0.0 when no estimate is possible. Callers must read 0.0 as
/// "unknown", never as a contact reading.
pub fn distance(pixel_width: f64, calib: &CalibrationParameters) -> f64 {
    if pixel_width > 0.0 && calib.focal_length_px > 0.0 {
        (calib.real_width_cm * calib.focal_length_px) / pixel_width
    } else {
        0.0
    }
}

/// Back-project a pixel center at depth `z_cm` into camera coordinates.
pub fn position_3d(
    center_x: f64,
    center_y: f64,
    z_cm: f64,
    calib: &CalibrationParameters,
) -> Position3D {
    if z_cm <= 0.0 || calib.focal_length_px <= 0.0 {
        return Position3D::default();
    }
    let offset_x = center_x - calib.image_width as f64 / 2.0;
    let offset_y = center_y - calib.image_height as f64 / 2.0;
    let scale = z_cm / calib.focal_length_px;
    Position3D {
        x_cm: offset_x * scale,
        // image rows grow downward
        y_cm: -(offset_y * scale),
        z_cm,
    }
}

/// Focal length that makes `observed_pixel_width` correspond to an object of
/// `known_real_width_cm` at `known_distance_cm`.
pub fn calibrate(
    observed_pixel_width: f64,
    known_real_width_cm: f64,
    known_distance_cm: f64,
) -> Result<f64> {
    if observed_pixel_width <= 0.0 {
        return Err(OperatorError::new(
            CALIBRATION_NO_REFERENCE,
            "no reference object detected for calibration",
        )
        .into());
    }
    if known_real_width_cm <= 0.0 {
        return Err(OperatorError::new(
            CALIBRATION_INVALID_WIDTH,
            format!("real width must be > 0 cm (got {known_real_width_cm})"),
        )
        .into());
    }
    Ok((observed_pixel_width * known_distance_cm) / known_real_width_cm)
}
