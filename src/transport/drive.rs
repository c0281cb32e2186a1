//! Drive controller connection.
//!
//! Streams the operator's live setpoint on a fixed 50 ms cadence and records
//! measured wheel speeds next to the target that was live when they arrived.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde::Serialize;

use super::connection::{Connection, LinkHandle};
use super::link::{open_link, SerialLink};
use super::protocol::{DriveSetpoint, LineBuffer, Telemetry};
use crate::{OperatorError, LINK_ALREADY_OPEN, LINK_NOT_CONNECTED};

pub const DEFAULT_DRIVE_BAUD: u32 = 9_600;
pub const SETPOINT_PERIOD: Duration = Duration::from_millis(50);
pub const TELEMETRY_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const TELEMETRY_CAPACITY: usize = 200;
/// Boards that reset on port open need this long before they listen.
pub const DEFAULT_RESET_WAIT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TelemetrySample {
    /// Seconds since the log started.
    pub elapsed_secs: f64,
    pub target_left: f64,
    pub actual_left: f64,
    pub target_right: f64,
    pub actual_right: f64,
}

/// Bounded history of the most recent telemetry samples.
pub struct TelemetryLog {
    samples: VecDeque<TelemetrySample>,
    capacity: usize,
    started: Instant,
}

impl TelemetryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            started: Instant::now(),
        }
    }

    pub fn record(&mut self, target: &DriveSetpoint, measured: Telemetry, now: Instant) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(TelemetrySample {
            elapsed_secs: now.saturating_duration_since(self.started).as_secs_f64(),
            target_left: f64::from(target.left.rpm()),
            actual_left: measured.left_rpm,
            target_right: f64::from(target.right.rpm()),
            actual_right: measured.right_rpm,
        });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<TelemetrySample> {
        self.samples.back().copied()
    }

    pub fn samples(&self) -> Vec<TelemetrySample> {
        self.samples.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.started = Instant::now();
    }
}

impl Default for TelemetryLog {
    fn default() -> Self {
        Self::new(TELEMETRY_CAPACITY)
    }
}

struct Streamer {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl Streamer {
    fn stop(mut self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("setpoint sender thread panicked"))?;
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }
}

pub struct DriveLink {
    connection: Option<Connection>,
    setpoint: Arc<Mutex<DriveSetpoint>>,
    telemetry: Arc<Mutex<TelemetryLog>>,
    streamer: Option<Streamer>,
    reset_wait: Duration,
}

impl DriveLink {
    pub fn new() -> Self {
        Self {
            connection: None,
            setpoint: Arc::new(Mutex::new(DriveSetpoint::stopped())),
            telemetry: Arc::new(Mutex::new(TelemetryLog::default())),
            streamer: None,
            reset_wait: DEFAULT_RESET_WAIT,
        }
    }

    pub fn with_reset_wait(mut self, wait: Duration) -> Self {
        self.reset_wait = wait;
        self
    }

    pub fn connect(&mut self, port_id: &str, baud: u32) -> Result<()> {
        self.ensure_closed()?;
        let link = open_link(port_id, baud)?;
        if !self.reset_wait.is_zero() {
            log::info!(
                "drive link: waiting {:?} for controller reset on {}",
                self.reset_wait,
                port_id
            );
            std::thread::sleep(self.reset_wait);
        }
        self.connect_with(port_id, link)
    }

    pub fn connect_with(&mut self, port_id: &str, link: Box<dyn SerialLink>) -> Result<()> {
        self.ensure_closed()?;
        let mut connection = Connection::new(port_id, link);
        let setpoint = self.setpoint.clone();
        let telemetry = self.telemetry.clone();
        telemetry
            .lock()
            .map_err(|_| anyhow!("telemetry lock poisoned"))?
            .clear();
        connection.spawn_worker("telemetry reader", move |handle| {
            run_telemetry_reader(handle, setpoint, telemetry);
        });
        log::info!("drive link: connected to {}", port_id);
        self.connection = Some(connection);
        Ok(())
    }

    fn ensure_closed(&mut self) -> Result<()> {
        match &self.connection {
            Some(conn) if conn.is_open() => Err(OperatorError::new(
                LINK_ALREADY_OPEN,
                format!("drive link already open on {}", conn.port_id()),
            )
            .into()),
            Some(_) => self.disconnect(),
            None => Ok(()),
        }
    }

    fn open_handle(&self) -> Result<LinkHandle> {
        match &self.connection {
            Some(conn) if conn.is_open() => Ok(conn.handle()),
            _ => Err(OperatorError::new(LINK_NOT_CONNECTED, "drive link not connected").into()),
        }
    }

    /// Stops streaming, then closes the port. Safe to repeat.
    pub fn disconnect(&mut self) -> Result<()> {
        self.stop_streaming()?;
        if let Some(mut conn) = self.connection.take() {
            conn.close()?;
            log::info!("drive link: disconnected from {}", conn.port_id());
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_open)
    }

    pub fn is_streaming(&self) -> bool {
        self.streamer.as_ref().is_some_and(Streamer::is_running)
    }

    pub fn set_setpoint(&self, setpoint: DriveSetpoint) -> Result<()> {
        *self
            .setpoint
            .lock()
            .map_err(|_| anyhow!("setpoint lock poisoned"))? = setpoint;
        Ok(())
    }

    pub fn setpoint(&self) -> Result<DriveSetpoint> {
        self.setpoint
            .lock()
            .map(|sp| *sp)
            .map_err(|_| anyhow!("setpoint lock poisoned"))
    }

    /// Write the current setpoint once. A failed write closes the link.
    pub fn send_once(&mut self) -> Result<()> {
        let handle = self.open_handle()?;
        let record = self.setpoint()?.encode();
        if let Err(err) = handle.write(record.as_bytes()) {
            log::error!("drive link: setpoint write failed: {}", err);
            if let Err(close_err) = self.disconnect() {
                log::warn!("drive link: close after write failure: {}", close_err);
            }
            return Err(err.context("setpoint write failed"));
        }
        log::info!("drive link: sent {}", record.trim_end());
        Ok(())
    }

    /// Begin the 50 ms setpoint stream. No-op when already streaming.
    pub fn start_streaming(&mut self) -> Result<()> {
        let handle = self.open_handle()?;
        if self.is_streaming() {
            return Ok(());
        }
        if let Some(finished) = self.streamer.take() {
            finished.stop()?;
        }
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();
        let setpoint = self.setpoint.clone();
        let join = std::thread::spawn(move || {
            run_setpoint_sender(handle, setpoint, stop_thread);
        });
        self.streamer = Some(Streamer {
            stop,
            join: Some(join),
        });
        log::info!("drive link: streaming setpoints every {:?}", SETPOINT_PERIOD);
        Ok(())
    }

    pub fn stop_streaming(&mut self) -> Result<()> {
        if let Some(streamer) = self.streamer.take() {
            streamer.stop()?;
            log::info!("drive link: streaming stopped");
        }
        Ok(())
    }

    pub fn telemetry(&self) -> Result<Vec<TelemetrySample>> {
        self.telemetry
            .lock()
            .map(|history| history.samples())
            .map_err(|_| anyhow!("telemetry lock poisoned"))
    }

    pub fn latest_telemetry(&self) -> Result<Option<TelemetrySample>> {
        self.telemetry
            .lock()
            .map(|history| history.latest())
            .map_err(|_| anyhow!("telemetry lock poisoned"))
    }
}

impl Default for DriveLink {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DriveLink {
    fn drop(&mut self) {
        if let Err(err) = self.disconnect() {
            log::warn!("drive link: teardown failed: {}", err);
        }
    }
}

fn run_setpoint_sender(
    handle: LinkHandle,
    setpoint: Arc<Mutex<DriveSetpoint>>,
    stop: Arc<AtomicBool>,
) {
    let mut next_tick = Instant::now();
    while !stop.load(Ordering::SeqCst) && !handle.should_stop() {
        let current = match setpoint.lock() {
            Ok(sp) => *sp,
            Err(_) => {
                log::error!("drive link: setpoint lock poisoned");
                break;
            }
        };
        if let Err(err) = handle.write(current.encode().as_bytes()) {
            log::error!("drive link: streaming write failed: {}", err);
            if let Err(close_err) = handle.shut_down() {
                log::warn!("drive link: close after write failure: {}", close_err);
            }
            break;
        }
        next_tick += SETPOINT_PERIOD;
        let now = Instant::now();
        if next_tick > now {
            std::thread::sleep(next_tick - now);
        } else {
            // fell behind; restart the cadence instead of bursting
            next_tick = now;
        }
    }
}

fn run_telemetry_reader(
    handle: LinkHandle,
    setpoint: Arc<Mutex<DriveSetpoint>>,
    telemetry: Arc<Mutex<TelemetryLog>>,
) {
    let mut lines = LineBuffer::new();
    let mut buf = [0u8; 256];
    while !handle.should_stop() {
        let n = match handle.read_available(&mut buf) {
            Ok(0) => {
                std::thread::sleep(TELEMETRY_POLL_INTERVAL);
                continue;
            }
            Ok(n) => n,
            Err(err) => {
                if !handle.should_stop() {
                    log::error!("drive link: read failed: {}", err);
                }
                break;
            }
        };
        for line in lines.push(&buf[..n]) {
            let Some(measured) = Telemetry::parse_line(&line) else {
                log::debug!("drive link: ignoring line {:?}", line);
                continue;
            };
            let target = match setpoint.lock() {
                Ok(sp) => *sp,
                Err(_) => {
                    log::error!("drive link: setpoint lock poisoned");
                    return;
                }
            };
            match telemetry.lock() {
                Ok(mut history) => history.record(&target, measured, Instant::now()),
                Err(_) => {
                    log::error!("drive link: telemetry lock poisoned");
                    return;
                }
            }
        }
    }
}
