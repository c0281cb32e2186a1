//! Strawberry Harvest Console
//!
//! This crate implements the detection-to-actuation pipeline behind the
//! operator console of a vision-guided strawberry harvester.
//!
//! # Architecture
//!
//! The pipeline holds four invariants by construction:
//!
//! 1. **Sentinel Geometry**: Invalid measurements yield a zero distance, never a fault.
//! 2. **Single-Shot Actuation**: At most one stop and one pick coordinate per arming cycle.
//! 3. **Settle Delay**: The pick coordinate never leaves before 1 s after the stop.
//! 4. **Owned State**: Background serial readers never mutate sequencer state directly;
//!    emergency stops are handed off and applied on the next frame tick.
//!
//! # Module Structure
//!
//! - `geometry`: Distance / 3D position estimation and focal-length calibration
//! - `zone`: Target-zone gate
//! - `sequencer`: Stop / settle / pick state machine
//! - `transport`: Wire protocols, serial links, harvest and drive connections
//! - `console`: Per-frame orchestrator and operator actions
//! - `detect`, `frame`, `ingest`: Detector seam, frames, synthetic camera
//! - `config`: Flat key/value settings with defaults

pub mod config;
pub mod console;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod sequencer;
pub mod transport;
pub mod ui;
pub mod zone;

pub use console::{
    AnnotatedDetection, DisplayOptions, FrameMetrics, FrameReport, HarvestConsole,
};
pub use detect::{
    BoundingBox, DetectParams, Detection, DetectorBackend, FruitClass, ReplayBackend,
    ScriptedBackend,
};
pub use frame::{Frame, Preprocess};
pub use geometry::{calibrate, distance, position_3d, CalibrationParameters, Position3D};
pub use ingest::{SyntheticConfig, SyntheticSource};
pub use sequencer::{ActuationSequencer, Phase, SavedCoordinate, SequencerState};
pub use transport::{
    open_link, ControllerMessage, ControllerSignals, DirectedRpm, DriveLink, DriveSetpoint,
    HarvestCommand, HarvestLink, MemoryLink, MemoryPeer, MotorDirection, SerialLink, Telemetry,
    TelemetryLog, TelemetrySample,
};
pub use zone::{in_zone, GateResult, TargetZone};

// -------------------- Operator Errors --------------------

pub const ZONE_BOUNDS_INVALID: &str = "ZONE_BOUNDS_INVALID";
pub const CALIBRATION_NO_REFERENCE: &str = "CALIBRATION_NO_REFERENCE";
pub const CALIBRATION_INVALID_WIDTH: &str = "CALIBRATION_INVALID_WIDTH";
pub const LINK_ALREADY_OPEN: &str = "LINK_ALREADY_OPEN";
pub const LINK_NOT_CONNECTED: &str = "LINK_NOT_CONNECTED";
pub const SETPOINT_OUT_OF_RANGE: &str = "SETPOINT_OUT_OF_RANGE";
pub const COORDINATE_NOT_FINITE: &str = "COORDINATE_NOT_FINITE";

/// A rejected operator action. The previous state is always retained.
///
/// Carried inside `anyhow::Error`; callers recover the code with
/// `err.downcast_ref::<OperatorError>()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorError {
    pub code: &'static str,
    pub message: String,
}

impl OperatorError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for OperatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
impl std::error::Error for OperatorError {}

/// Returns the operator error code carried by `err`, if any.
pub fn operator_error_code(err: &anyhow::Error) -> Option<&'static str> {
    err.downcast_ref::<OperatorError>().map(|e| e.code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_error_code_survives_anyhow() {
        let err: anyhow::Error = OperatorError::new(ZONE_BOUNDS_INVALID, "left >= right").into();
        assert_eq!(operator_error_code(&err), Some(ZONE_BOUNDS_INVALID));
        assert_eq!(err.to_string(), "ZONE_BOUNDS_INVALID: left >= right");

        let plain = anyhow::anyhow!("io failure");
        assert_eq!(operator_error_code(&plain), None);
    }
}
