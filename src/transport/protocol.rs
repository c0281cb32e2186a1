//! Wire formats shared with the controller firmware.
//!
//! Harvest controller, outbound: `T#`, `D#`, `G<z>,<y>#` (one decimal, no
//! newline). Inbound lines: `STOP`, `HARVEST_DONE#`, anything else is chatter.
//!
//! Drive controller, outbound: `<lDir>,<lRpm>,<rDir>,<rRpm>#\n`. Inbound
//! telemetry: `<echoed target> <left rpm> <right rpm> ...`.

use anyhow::Result;
use serde::Serialize;

use crate::{OperatorError, COORDINATE_NOT_FINITE, SETPOINT_OUT_OF_RANGE};

pub const MAX_RPM: u16 = 250;

/// Longest partial line kept while waiting for its newline.
pub const MAX_PENDING_LINE: usize = 1024;

/// Discrete command sent to the harvest controller.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum HarvestCommand {
    /// Begin continuous forward drive.
    Forward,
    Stop,
    /// Execute a pick at depth `z_cm`, height `y_cm`.
    Pick { z_cm: f64, y_cm: f64 },
}

impl HarvestCommand {
    /// Pick command with a finite depth and height; `NaN` and infinities
    /// have no wire rendering.
    pub fn pick(z_cm: f64, y_cm: f64) -> Result<Self> {
        if !z_cm.is_finite() || !y_cm.is_finite() {
            return Err(OperatorError::new(
                COORDINATE_NOT_FINITE,
                format!("coordinate must be finite (got Z={} Y={})", z_cm, y_cm),
            )
            .into());
        }
        Ok(HarvestCommand::Pick { z_cm, y_cm })
    }

    pub fn encode(&self) -> String {
        match self {
            HarvestCommand::Forward => "T#".to_string(),
            HarvestCommand::Stop => "D#".to_string(),
            HarvestCommand::Pick { z_cm, y_cm } => format!("G{:.1},{:.1}#", z_cm, y_cm),
        }
    }
}

/// Line received from the harvest controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControllerMessage {
    EmergencyStop,
    HarvestDone,
    Chatter(String),
}

impl ControllerMessage {
    /// Classify one line. Returns `None` for blank lines.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        Some(match line {
            "STOP" => ControllerMessage::EmergencyStop,
            "HARVEST_DONE#" => ControllerMessage::HarvestDone,
            other => ControllerMessage::Chatter(other.to_string()),
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum MotorDirection {
    #[default]
    Stop = 0,
    Forward = 1,
    Backward = 2,
}

impl MotorDirection {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(MotorDirection::Stop),
            1 => Some(MotorDirection::Forward),
            2 => Some(MotorDirection::Backward),
            _ => None,
        }
    }
}

/// One wheel's direction and speed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DirectedRpm {
    pub direction: MotorDirection,
    rpm: u16,
}

impl DirectedRpm {
    pub fn new(direction: MotorDirection, rpm: u16) -> Result<Self> {
        if rpm > MAX_RPM {
            return Err(OperatorError::new(
                SETPOINT_OUT_OF_RANGE,
                format!("rpm {} outside 0..={}", rpm, MAX_RPM),
            )
            .into());
        }
        Ok(Self { direction, rpm })
    }

    pub fn rpm(&self) -> u16 {
        self.rpm
    }
}

/// Operator setpoint for both drive wheels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DriveSetpoint {
    pub left: DirectedRpm,
    pub right: DirectedRpm,
}

impl DriveSetpoint {
    pub fn new(left: DirectedRpm, right: DirectedRpm) -> Self {
        Self { left, right }
    }

    /// Both wheels stopped at zero rpm.
    pub fn stopped() -> Self {
        Self::default()
    }

    pub fn encode(&self) -> String {
        format!(
            "{},{},{},{}#\n",
            self.left.direction.code(),
            self.left.rpm,
            self.right.direction.code(),
            self.right.rpm
        )
    }
}

/// Measured wheel speeds from one telemetry line.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Telemetry {
    pub left_rpm: f64,
    pub right_rpm: f64,
}

impl Telemetry {
    /// Parse `<target> <left> <right> ...`. The echoed target is ignored.
    /// Malformed lines yield `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            return None;
        }
        fields[0].parse::<f64>().ok()?;
        let left_rpm = fields[1].parse::<f64>().ok()?;
        let right_rpm = fields[2].parse::<f64>().ok()?;
        Some(Self {
            left_rpm,
            right_rpm,
        })
    }
}

/// Reassembles newline-terminated lines from arbitrary read chunks.
#[derive(Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    // bytes of `pending` already known to hold no newline
    scanned: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every complete line, decoded lossily.
    ///
    /// A partial line longer than `MAX_PENDING_LINE` is dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(offset) = self.pending[self.scanned..].iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=self.scanned + offset).collect();
            self.scanned = 0;
            let text = String::from_utf8_lossy(&raw);
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
        if self.pending.len() > MAX_PENDING_LINE {
            log::warn!(
                "serial: dropping {} bytes without a line terminator",
                self.pending.len()
            );
            self.pending.clear();
        }
        self.scanned = self.pending.len();
        lines
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator_error_code;

    #[test]
    fn encodes_discrete_commands() {
        assert_eq!(HarvestCommand::Forward.encode(), "T#");
        assert_eq!(HarvestCommand::Stop.encode(), "D#");
        let pick = HarvestCommand::Pick {
            z_cm: 55.0,
            y_cm: 12.34,
        };
        assert_eq!(pick.encode(), "G55.0,12.3#");
        let below = HarvestCommand::Pick {
            z_cm: 30.0,
            y_cm: -4.26,
        };
        assert_eq!(below.encode(), "G30.0,-4.3#");
    }

    #[test]
    fn pick_rejects_non_finite_coordinates() {
        assert_eq!(
            HarvestCommand::pick(55.0, -3.5).unwrap().encode(),
            "G55.0,-3.5#"
        );
        for (z, y) in [(f64::NAN, 1.0), (10.0, f64::INFINITY), (f64::NEG_INFINITY, 0.0)] {
            let err = HarvestCommand::pick(z, y).unwrap_err();
            assert_eq!(operator_error_code(&err), Some(COORDINATE_NOT_FINITE));
        }
    }

    #[test]
    fn classifies_controller_lines() {
        assert_eq!(
            ControllerMessage::parse_line("STOP\r"),
            Some(ControllerMessage::EmergencyStop)
        );
        assert_eq!(
            ControllerMessage::parse_line("  HARVEST_DONE#  "),
            Some(ControllerMessage::HarvestDone)
        );
        assert_eq!(
            ControllerMessage::parse_line("arm at home"),
            Some(ControllerMessage::Chatter("arm at home".to_string()))
        );
        assert_eq!(ControllerMessage::parse_line(" \r "), None);
        // only the exact token counts as an emergency stop
        assert!(matches!(
            ControllerMessage::parse_line("STOPPED"),
            Some(ControllerMessage::Chatter(_))
        ));
    }

    #[test]
    fn encodes_setpoint_record() {
        let sp = DriveSetpoint::new(
            DirectedRpm::new(MotorDirection::Forward, 120).unwrap(),
            DirectedRpm::new(MotorDirection::Backward, 250).unwrap(),
        );
        assert_eq!(sp.encode(), "1,120,2,250#\n");
        assert_eq!(DriveSetpoint::stopped().encode(), "0,0,0,0#\n");
    }

    #[test]
    fn rejects_rpm_above_limit() {
        let err = DirectedRpm::new(MotorDirection::Forward, 251).unwrap_err();
        assert_eq!(operator_error_code(&err), Some(SETPOINT_OUT_OF_RANGE));
    }

    #[test]
    fn parses_telemetry_and_drops_malformed() {
        let t = Telemetry::parse_line("100 98.5 101.25").unwrap();
        assert_eq!(t.left_rpm, 98.5);
        assert_eq!(t.right_rpm, 101.25);
        assert!(Telemetry::parse_line("100 98.5 101 7").is_some());
        assert!(Telemetry::parse_line("100 98.5").is_none());
        assert!(Telemetry::parse_line("x 98.5 101").is_none());
        assert!(Telemetry::parse_line("100 fast 101").is_none());
        assert!(Telemetry::parse_line("").is_none());
    }

    #[test]
    fn line_buffer_reassembles_split_chunks() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"HARV").is_empty());
        assert_eq!(buf.push(b"EST_DONE#\r\nST"), vec!["HARVEST_DONE#"]);
        assert_eq!(buf.pending_len(), 2);
        assert_eq!(buf.push(b"OP\n\n"), vec!["STOP"]);
        assert_eq!(buf.push(&[0xff, b'o', b'k', b'\n']), vec!["\u{fffd}ok"]);
    }

    #[test]
    fn line_buffer_drops_unterminated_overflow() {
        let mut buf = LineBuffer::new();
        let noise = vec![b'x'; 700];
        assert!(buf.push(&noise).is_empty());
        assert_eq!(buf.pending_len(), 700);
        assert!(buf.push(&noise).is_empty());
        assert_eq!(buf.pending_len(), 0);
        // the next terminated line still comes through intact
        assert_eq!(buf.push(b"STOP\n"), vec!["STOP"]);
        assert_eq!(buf.pending_len(), 0);
    }
}
