//! Serial transport to the harvest and drive controllers.
//!
//! This module provides the two wire protocols, the `SerialLink` seam with
//! in-memory and hardware backends, and one connection handle per
//! controller. Each open connection runs its own polling reader thread;
//! the drive connection adds a fixed-cadence setpoint sender.

mod connection;
mod drive;
mod harvest;
mod link;
pub mod protocol;

pub use drive::{
    DriveLink, TelemetryLog, TelemetrySample, DEFAULT_DRIVE_BAUD, DEFAULT_RESET_WAIT,
    SETPOINT_PERIOD, TELEMETRY_CAPACITY,
};
pub use harvest::{ControllerSignals, HarvestLink, DEFAULT_HARVEST_BAUD, HARVEST_POLL_INTERVAL};
pub use link::{open_link, MemoryLink, MemoryPeer, SerialLink};
pub use protocol::{
    ControllerMessage, DirectedRpm, DriveSetpoint, HarvestCommand, MotorDirection, Telemetry,
    MAX_RPM,
};
