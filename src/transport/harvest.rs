//! Harvest controller connection.
//!
//! The frame path sends discrete commands. A reader thread polls for
//! controller lines and posts what it sees to `ControllerSignals`; it never
//! touches sequencer state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use super::connection::{Connection, LinkHandle};
use super::link::{open_link, SerialLink};
use super::protocol::{ControllerMessage, HarvestCommand, LineBuffer};
use crate::{OperatorError, LINK_ALREADY_OPEN, LINK_NOT_CONNECTED};

pub const DEFAULT_HARVEST_BAUD: u32 = 115_200;
pub const HARVEST_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Hand-off from the reader thread to the frame path.
#[derive(Debug, Default)]
pub struct ControllerSignals {
    emergency_stop: AtomicBool,
    harvests_done: AtomicU64,
    chatter_lines: AtomicU64,
}

impl ControllerSignals {
    pub fn post_emergency_stop(&self) {
        self.emergency_stop.store(true, Ordering::SeqCst);
    }

    /// Consume a posted emergency stop. True at most once per post.
    pub fn take_emergency_stop(&self) -> bool {
        self.emergency_stop.swap(false, Ordering::SeqCst)
    }

    pub fn harvests_completed(&self) -> u64 {
        self.harvests_done.load(Ordering::SeqCst)
    }

    pub fn chatter_lines(&self) -> u64 {
        self.chatter_lines.load(Ordering::SeqCst)
    }

    fn apply(&self, message: ControllerMessage) {
        match message {
            ControllerMessage::EmergencyStop => {
                log::warn!("harvest controller: STOP received");
                self.post_emergency_stop();
            }
            ControllerMessage::HarvestDone => {
                let total = self.harvests_done.fetch_add(1, Ordering::SeqCst) + 1;
                log::info!("harvest controller: harvest complete ({} total)", total);
            }
            ControllerMessage::Chatter(line) => {
                self.chatter_lines.fetch_add(1, Ordering::SeqCst);
                log::info!("harvest controller: {}", line);
            }
        }
    }
}

#[derive(Default)]
pub struct HarvestLink {
    connection: Option<Connection>,
    signals: Arc<ControllerSignals>,
}

impl HarvestLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self, port_id: &str, baud: u32) -> Result<()> {
        self.ensure_closed()?;
        let link = open_link(port_id, baud)?;
        self.connect_with(port_id, link)
    }

    /// Adopt an already opened link, e.g. a `MemoryLink` in tests.
    pub fn connect_with(&mut self, port_id: &str, link: Box<dyn SerialLink>) -> Result<()> {
        self.ensure_closed()?;
        if self.signals.take_emergency_stop() {
            log::warn!("harvest link: discarding STOP left over from the previous connection");
        }
        let mut connection = Connection::new(port_id, link);
        let signals = self.signals.clone();
        connection.spawn_worker("harvest reader", move |handle| {
            run_reader(handle, signals);
        });
        log::info!("harvest link: connected to {}", port_id);
        self.connection = Some(connection);
        Ok(())
    }

    fn ensure_closed(&mut self) -> Result<()> {
        match &self.connection {
            Some(conn) if conn.is_open() => Err(OperatorError::new(
                LINK_ALREADY_OPEN,
                format!("harvest link already open on {}", conn.port_id()),
            )
            .into()),
            Some(_) => self.disconnect(),
            None => Ok(()),
        }
    }

    /// Safe on a closed or never-opened link.
    pub fn disconnect(&mut self) -> Result<()> {
        if let Some(mut conn) = self.connection.take() {
            conn.close()?;
            log::info!("harvest link: disconnected from {}", conn.port_id());
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_open)
    }

    pub fn port_id(&self) -> Option<&str> {
        self.connection.as_ref().map(Connection::port_id)
    }

    pub fn signals(&self) -> Arc<ControllerSignals> {
        self.signals.clone()
    }

    /// Write one command. A failed write closes the connection; nothing is
    /// retried.
    pub fn send(&mut self, command: &HarvestCommand) -> Result<()> {
        let handle = match &self.connection {
            Some(conn) if conn.is_open() => conn.handle(),
            _ => {
                return Err(OperatorError::new(
                    LINK_NOT_CONNECTED,
                    format!("cannot send {}: harvest link not connected", command.encode()),
                )
                .into())
            }
        };
        let encoded = command.encode();
        if let Err(err) = handle.write(encoded.as_bytes()) {
            log::error!("harvest link: sending {} failed: {}", encoded, err);
            if let Err(close_err) = self.disconnect() {
                log::warn!("harvest link: close after write failure: {}", close_err);
            }
            return Err(err.context(format!("sending {} failed", encoded)));
        }
        log::info!("harvest link: sent {}", encoded);
        Ok(())
    }
}

fn run_reader(handle: LinkHandle, signals: Arc<ControllerSignals>) {
    let mut lines = LineBuffer::new();
    let mut buf = [0u8; 256];
    while !handle.should_stop() {
        match handle.read_available(&mut buf) {
            Ok(0) => std::thread::sleep(HARVEST_POLL_INTERVAL),
            Ok(n) => {
                for line in lines.push(&buf[..n]) {
                    if let Some(message) = ControllerMessage::parse_line(&line) {
                        signals.apply(message);
                    }
                }
            }
            Err(err) => {
                if !handle.should_stop() {
                    log::error!("harvest link: read failed: {}", err);
                }
                break;
            }
        }
    }
}
