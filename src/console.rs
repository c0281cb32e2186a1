//! Frame orchestrator and operator actions.
//!
//! `HarvestConsole::process_frame` runs one tick in a fixed order:
//!
//! 1. mirror / brightness pre-processing
//! 2. detection
//! 3. pending emergency stop from the controller reader
//! 4. zone gate over the current frame's detections
//! 5. sequencer stop check, then the settle-delay check
//! 6. transmission of whatever the sequencer emitted
//! 7. annotation and metrics
//!
//! The console owns the calibration, the zone and the sequencer. The pure
//! geometry and gate functions only ever see them by reference.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use crate::config::ConsoleConfig;
use crate::detect::{Detection, DetectorBackend};
use crate::frame::Frame;
use crate::geometry::{self, CalibrationParameters, Position3D};
use crate::sequencer::{ActuationSequencer, Phase, SavedCoordinate, SequencerState};
use crate::transport::{ControllerSignals, HarvestCommand, HarvestLink, SerialLink};
use crate::zone::{self, Bgr, TargetZone};

pub const ZONE_BANNER: &str = "TARGET IN ZONE - STOPPED";

/// Which overlay texts the operator wants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DisplayOptions {
    pub show_distance: bool,
    pub show_coordinates: bool,
    pub show_target_zone: bool,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            show_distance: true,
            show_coordinates: true,
            show_target_zone: true,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct AnnotatedDetection {
    pub detection: Detection,
    pub center: (i32, i32),
    pub in_zone: bool,
    pub color: Bgr,
    /// `None` when the range estimate is unknown.
    pub distance_cm: Option<f64>,
    pub position: Option<Position3D>,
    /// `"<Class> <conf>"`, plus `" ID:<n>"` when tracked.
    pub label: String,
    /// Text lines drawn under the box.
    pub detail_lines: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct FrameMetrics {
    pub fps: f64,
    pub objects: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct FrameReport {
    pub sequence: u64,
    pub detections: Vec<AnnotatedDetection>,
    pub target_in_zone: bool,
    /// Zone bounds to draw, when the operator shows them.
    pub zone: Option<TargetZone>,
    pub banner: Option<&'static str>,
    /// Commands written to the harvest controller during this tick.
    pub commands_sent: Vec<HarvestCommand>,
    pub emergency_stop: bool,
    pub metrics: FrameMetrics,
}

pub struct HarvestConsole {
    config: ConsoleConfig,
    calibration: CalibrationParameters,
    zone: TargetZone,
    sequencer: ActuationSequencer,
    detector: Box<dyn DetectorBackend>,
    harvest: HarvestLink,
    signals: Arc<ControllerSignals>,
    last_pixel_width: Option<i32>,
    last_tick: Option<Instant>,
}

impl HarvestConsole {
    pub fn new(config: ConsoleConfig, detector: Box<dyn DetectorBackend>) -> Self {
        let harvest = HarvestLink::new();
        let signals = harvest.signals();
        log::info!(
            "console: detector={} zone=[{}, {}] focal={:.1}px auto_stop={}",
            detector.name(),
            config.x_line_left,
            config.x_line_right,
            config.focal_length,
            config.auto_stop_enabled
        );
        Self {
            calibration: config.calibration(),
            zone: config.zone(),
            sequencer: ActuationSequencer::new(config.auto_stop_enabled),
            config,
            detector,
            harvest,
            signals,
            last_pixel_width: None,
            last_tick: None,
        }
    }

    pub fn calibration(&self) -> &CalibrationParameters {
        &self.calibration
    }

    pub fn zone(&self) -> &TargetZone {
        &self.zone
    }

    pub fn sequencer_state(&self) -> SequencerState {
        self.sequencer.state()
    }

    pub fn phase(&self) -> Phase {
        self.sequencer.phase()
    }

    pub fn is_harvest_connected(&self) -> bool {
        self.harvest.is_connected()
    }

    pub fn harvests_completed(&self) -> u64 {
        self.signals.harvests_completed()
    }

    /// Pixel width of the last detection seen, the calibration reference.
    pub fn last_pixel_width(&self) -> Option<i32> {
        self.last_pixel_width
    }

    /// Run one frame through the pipeline.
    pub fn process_frame(&mut self, mut frame: Frame, now: Instant) -> Result<FrameReport> {
        self.config.preprocess().apply(&mut frame);
        let detections = self
            .detector
            .detect(&frame, &self.config.detect_params())
            .with_context(|| format!("detector {} failed", self.detector.name()))?;

        let emergency_stop = self.signals.take_emergency_stop();
        if emergency_stop {
            log::warn!("console: emergency stop from controller; sequencer disarmed");
            self.sequencer.emergency_stop();
        }

        let gate = zone::evaluate(&detections, &self.zone);
        let was_armed = self.sequencer.phase() == Phase::Armed;
        let commands = self.sequencer.on_frame(gate.target_in_zone, now);
        let commands_sent = self.transmit(commands);
        let banner = (was_armed && gate.target_in_zone && self.sequencer.auto_stop())
            .then_some(ZONE_BANNER);

        let display = self.config.display();
        let annotated: Vec<AnnotatedDetection> = detections
            .into_iter()
            .zip(gate.in_zone.iter().copied())
            .map(|(det, hit)| annotate(det, hit, &self.calibration, &display))
            .collect();
        if let Some(last) = annotated.last() {
            self.last_pixel_width = Some(last.detection.pixel_width());
        }

        let fps = match self.last_tick {
            Some(prev) => {
                let dt = now.saturating_duration_since(prev).as_secs_f64();
                if dt > 0.0 {
                    1.0 / dt
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.last_tick = Some(now);
        let metrics = FrameMetrics {
            fps,
            objects: annotated.len(),
        };
        log::debug!(
            "frame {}: objects={} in_zone={} sent={:?}",
            frame.sequence,
            metrics.objects,
            gate.target_in_zone,
            commands_sent
        );

        Ok(FrameReport {
            sequence: frame.sequence,
            detections: annotated,
            target_in_zone: gate.target_in_zone,
            zone: display.show_target_zone.then_some(self.zone),
            banner,
            commands_sent,
            emergency_stop,
            metrics,
        })
    }

    fn transmit(&mut self, commands: Vec<HarvestCommand>) -> Vec<HarvestCommand> {
        let mut sent = Vec::with_capacity(commands.len());
        for command in commands {
            match self.harvest.send(&command) {
                Ok(()) => sent.push(command),
                Err(err) => log::error!("console: {} not sent: {:#}", command.encode(), err),
            }
        }
        if !self.harvest.is_connected() && self.sequencer.phase() != Phase::Idle {
            log::warn!("console: harvest link lost; sequencer halted");
            self.sequencer.halt();
        }
        sent
    }

    // -------------------- Operator actions --------------------

    pub fn connect_harvest(&mut self, port_id: &str, baud: u32) -> Result<()> {
        self.harvest.connect(port_id, baud)
    }

    /// Use an already opened link, e.g. a `MemoryLink`.
    pub fn attach_harvest_link(&mut self, port_id: &str, link: Box<dyn SerialLink>) -> Result<()> {
        self.harvest.connect_with(port_id, link)
    }

    /// Disarms the sequencer, then closes the link.
    pub fn disconnect_harvest(&mut self) -> Result<()> {
        self.sequencer.halt();
        self.harvest.disconnect()
    }

    /// Send `T#` and arm the sequencer once it went out.
    ///
    /// An emergency stop posted before this start belongs to the previous
    /// cycle and is discarded.
    pub fn start_forward(&mut self) -> Result<()> {
        self.harvest.send(&HarvestCommand::Forward)?;
        if self.signals.take_emergency_stop() {
            log::warn!("console: discarding controller STOP received before start");
        }
        self.sequencer.arm();
        log::info!("console: continuous forward started");
        Ok(())
    }

    /// Disarm, then send `D#`. No coordinate follows a manual stop.
    pub fn stop_forward(&mut self) -> Result<()> {
        self.sequencer.halt();
        self.harvest.send(&HarvestCommand::Stop)?;
        log::info!("console: continuous forward stopped by operator");
        Ok(())
    }

    /// Coordinate to dispatch after the next automatic stop.
    pub fn save_coordinate(&mut self, z_cm: f64, y_cm: f64) -> Result<()> {
        HarvestCommand::pick(z_cm, y_cm)?;
        self.sequencer.save_coordinate(SavedCoordinate { z_cm, y_cm });
        log::info!("console: saved coordinate Z={:.1} Y={:.1}", z_cm, y_cm);
        Ok(())
    }

    pub fn clear_saved_coordinate(&mut self) {
        self.sequencer.clear_coordinate();
    }

    /// Send a pick coordinate right away, outside the sequencer.
    pub fn send_coordinate(&mut self, z_cm: f64, y_cm: f64) -> Result<()> {
        let command = HarvestCommand::pick(z_cm, y_cm)?;
        self.harvest.send(&command)
    }

    /// Rejected bounds leave the current zone in place.
    pub fn set_zone(&mut self, left: i32, right: i32) -> Result<()> {
        self.zone.update(left, right, self.calibration.image_width)?;
        self.config.x_line_left = left;
        self.config.x_line_right = right;
        log::info!("console: zone set to [{}, {}]", left, right);
        Ok(())
    }

    pub fn set_auto_stop(&mut self, enabled: bool) {
        self.sequencer.set_auto_stop(enabled);
        self.config.auto_stop_enabled = enabled;
        log::info!("console: auto-stop {}", if enabled { "on" } else { "off" });
    }

    pub fn set_tracking(&mut self, enabled: bool) {
        self.config.tracking_enabled = enabled;
    }

    pub fn set_mirror(&mut self, enabled: bool) {
        self.config.flip_horizontal = enabled;
    }

    pub fn set_brightness(&mut self, brightness: i32) {
        self.config.brightness =
            brightness.clamp(crate::frame::MIN_BRIGHTNESS, crate::frame::MAX_BRIGHTNESS);
    }

    pub fn set_thresholds(&mut self, confidence: f32, iou: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&confidence) || !(0.0..=1.0).contains(&iou) {
            return Err(anyhow!(
                "thresholds must be within [0, 1] (confidence={}, iou={})",
                confidence,
                iou
            ));
        }
        self.config.conf_threshold = confidence;
        self.config.iou_threshold = iou;
        Ok(())
    }

    pub fn set_display(&mut self, display: DisplayOptions) {
        self.config.show_distance = display.show_distance;
        self.config.show_coordinates = display.show_coordinates;
        self.config.show_target_zone = display.show_target_zone;
    }

    /// Re-derive the focal length from the last detection, assumed to be a
    /// reference object of `real_width_cm` held at the calibration distance.
    pub fn calibrate(&mut self, real_width_cm: f64) -> Result<f64> {
        let observed = f64::from(self.last_pixel_width.unwrap_or(0));
        let focal = self.calibration.recalibrate(observed, real_width_cm)?;
        self.config.focal_length = focal;
        self.config.real_width = real_width_cm;
        log::info!(
            "console: calibrated focal length {:.1}px from {}px at {:.1}cm",
            focal,
            observed,
            self.calibration.calibration_distance_cm
        );
        Ok(focal)
    }

    pub fn config_snapshot(&self) -> ConsoleConfig {
        self.config.clone()
    }

    pub fn save_config(&self, path: &Path) -> Result<()> {
        self.config.save(path)
    }

    /// Disarm and close every link.
    pub fn shutdown(&mut self) -> Result<()> {
        self.disconnect_harvest()
    }
}

fn annotate(
    detection: Detection,
    in_zone: bool,
    calib: &CalibrationParameters,
    display: &DisplayOptions,
) -> AnnotatedDetection {
    let center = detection.center();
    let z = geometry::distance(f64::from(detection.pixel_width()), calib);
    let distance_cm = (z > 0.0).then_some(z);
    let position = distance_cm
        .map(|z| geometry::position_3d(f64::from(center.0), f64::from(center.1), z, calib));

    let mut label = format!("{} {:.2}", detection.class.label(), detection.confidence);
    if let Some(id) = detection.track_id {
        label.push_str(&format!(" ID:{}", id));
    }

    let mut detail_lines = Vec::new();
    match (position, distance_cm) {
        (Some(p), Some(_)) if display.show_coordinates => {
            detail_lines.push(format!("X:{:+.1} Y:{:+.1}", p.x_cm, p.y_cm));
            detail_lines.push(format!("Z:{:.1}cm", p.z_cm));
        }
        (_, Some(z)) if display.show_distance => detail_lines.push(format!("{:.1}cm", z)),
        _ => {}
    }

    AnnotatedDetection {
        color: zone::render_color(detection.class, in_zone),
        detection,
        center,
        in_zone,
        distance_cm,
        position,
        label,
        detail_lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, FruitClass, ScriptedBackend};
    use crate::transport::MemoryLink;
    use crate::zone::{HIGHLIGHT_COLOR, RIPE_COLOR};
    use crate::{operator_error_code, CALIBRATION_NO_REFERENCE, ZONE_BOUNDS_INVALID};
    use std::time::Duration;

    fn ripe(x1: f32, x2: f32, track_id: Option<u32>) -> Detection {
        Detection::new(
            BoundingBox::new(x1, 100.0, x2, 180.0).unwrap(),
            FruitClass::Ripe,
            0.87,
            track_id,
        )
        .unwrap()
    }

    fn console(frames: Vec<Vec<Detection>>) -> HarvestConsole {
        let config = ConsoleConfig {
            flip_horizontal: false,
            auto_stop_enabled: true,
            ..ConsoleConfig::default()
        };
        HarvestConsole::new(config, Box::new(ScriptedBackend::new(frames)))
    }

    fn frame(seq: u64) -> Frame {
        Frame::blank(640, 480, seq)
    }

    #[test]
    fn annotates_labels_colors_and_geometry() {
        let mut console = console(vec![vec![ripe(200.0, 260.0, Some(7)), ripe(290.0, 351.5, None)]]);
        let report = console.process_frame(frame(1), Instant::now()).unwrap();

        let outside = &report.detections[0];
        assert_eq!(outside.center, (230, 140));
        assert!(!outside.in_zone);
        assert_eq!(outside.color, RIPE_COLOR);
        assert_eq!(outside.label, "Ripe 0.87 ID:7");
        assert_eq!(outside.distance_cm, Some(30.75));

        let inside = &report.detections[1];
        assert_eq!(inside.center, (320, 140));
        assert!(inside.in_zone);
        assert_eq!(inside.color, HIGHLIGHT_COLOR);
        assert_eq!(inside.label, "Ripe 0.87");
        assert_eq!(inside.detail_lines[0], "X:+0.0 Y:+4.9");
        assert_eq!(report.metrics.objects, 2);
        assert!(report.target_in_zone);
        // not armed, so nothing is sent and no banner
        assert!(report.commands_sent.is_empty());
        assert!(report.banner.is_none());
    }

    #[test]
    fn distance_only_when_coordinates_hidden() {
        let mut console = console(vec![vec![ripe(300.0, 361.0, None)]]);
        console.set_display(DisplayOptions {
            show_distance: true,
            show_coordinates: false,
            show_target_zone: false,
        });
        let report = console.process_frame(frame(1), Instant::now()).unwrap();
        assert_eq!(report.detections[0].detail_lines, vec!["30.2cm".to_string()]);
        assert!(report.zone.is_none());
    }

    #[test]
    fn zone_update_rejection_keeps_previous_zone() {
        let mut console = console(vec![]);
        let err = console.set_zone(400, 300).unwrap_err();
        assert_eq!(operator_error_code(&err), Some(ZONE_BOUNDS_INVALID));
        assert_eq!((console.zone().left(), console.zone().right()), (250, 390));

        console.set_zone(100, 500).unwrap();
        assert_eq!(console.config_snapshot().x_line_left, 100);
    }

    #[test]
    fn calibration_needs_reference_detection() {
        let mut console = console(vec![vec![], vec![ripe(300.0, 361.5, None)]]);
        let err = console.calibrate(3.0).unwrap_err();
        assert_eq!(operator_error_code(&err), Some(CALIBRATION_NO_REFERENCE));
        assert_eq!(console.calibration().focal_length_px, 615.0);

        console.process_frame(frame(1), Instant::now()).unwrap();
        console.process_frame(frame(2), Instant::now()).unwrap();
        assert_eq!(console.last_pixel_width(), Some(61));
        let focal = console.calibrate(3.0).unwrap();
        assert_eq!(focal, 610.0);
        assert_eq!(console.config_snapshot().focal_length, 610.0);
    }

    #[test]
    fn start_forward_requires_connection() {
        let mut console = console(vec![]);
        let err = console.start_forward().unwrap_err();
        assert_eq!(operator_error_code(&err), Some(crate::LINK_NOT_CONNECTED));
        assert_eq!(console.phase(), Phase::Idle);
    }

    #[test]
    fn stop_sent_once_then_coordinate_after_settle() {
        let in_zone = || vec![ripe(300.0, 360.0, Some(1))];
        let mut console = console(vec![in_zone(), in_zone(), in_zone(), in_zone()]);
        let (link, peer) = MemoryLink::pair("stub://harvest");
        console.attach_harvest_link("stub://harvest", Box::new(link)).unwrap();
        console.save_coordinate(55.0, 12.3).unwrap();
        console.start_forward().unwrap();
        assert_eq!(peer.take_written_string(), "T#");

        let t0 = Instant::now();
        let first = console.process_frame(frame(1), t0).unwrap();
        assert_eq!(first.commands_sent, vec![HarvestCommand::Stop]);
        assert_eq!(first.banner, Some(ZONE_BANNER));
        let second = console
            .process_frame(frame(2), t0 + Duration::from_millis(400))
            .unwrap();
        assert!(second.commands_sent.is_empty());
        assert!(second.banner.is_none());
        console
            .process_frame(frame(3), t0 + Duration::from_millis(1000))
            .unwrap();
        console
            .process_frame(frame(4), t0 + Duration::from_millis(1100))
            .unwrap();
        assert_eq!(peer.take_written_string(), "D#G55.0,12.3#");
        console.shutdown().unwrap();
    }

    #[test]
    fn manual_stop_disarms_and_schedules_nothing() {
        let mut console = console(vec![vec![ripe(300.0, 360.0, None)]]);
        let (link, peer) = MemoryLink::pair("stub://harvest");
        console.attach_harvest_link("stub://harvest", Box::new(link)).unwrap();
        console.save_coordinate(40.0, 0.0).unwrap();
        console.start_forward().unwrap();
        console.stop_forward().unwrap();
        let t0 = Instant::now();
        console.process_frame(frame(1), t0).unwrap();
        assert_eq!(peer.take_written_string(), "T#D#");
        assert_eq!(console.phase(), Phase::Idle);
    }

    #[test]
    fn non_finite_coordinates_are_refused() {
        let mut console = console(vec![]);
        let (link, peer) = MemoryLink::pair("stub://harvest");
        console.attach_harvest_link("stub://harvest", Box::new(link)).unwrap();

        let err = console.save_coordinate(f64::NAN, 10.0).unwrap_err();
        assert_eq!(operator_error_code(&err), Some(crate::COORDINATE_NOT_FINITE));
        assert!(console.sequencer_state().saved_coordinate.is_none());

        let err = console.send_coordinate(25.0, f64::INFINITY).unwrap_err();
        assert_eq!(operator_error_code(&err), Some(crate::COORDINATE_NOT_FINITE));
        assert!(peer.take_written().is_empty());
        assert!(console.is_harvest_connected());

        console.send_coordinate(25.0, -1.5).unwrap();
        assert_eq!(peer.take_written_string(), "G25.0,-1.5#");
    }
}
