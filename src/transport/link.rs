//! Byte-level serial links.
//!
//! `SerialLink` is the seam between the connection handles and the port.
//! `stub://` identifiers open an in-memory link; device paths need the
//! `serial-hw` feature.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Result};

/// Non-blocking byte transport.
pub trait SerialLink: Send {
    fn describe(&self) -> String;

    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read whatever is already waiting, up to `buf.len()`. Returns 0 when
    /// nothing is available; never waits for data.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn close(&mut self) -> Result<()>;
}

/// Open the link named by `port_id`.
pub fn open_link(port_id: &str, baud: u32) -> Result<Box<dyn SerialLink>> {
    if port_id.trim().is_empty() {
        bail!("serial port identifier is empty");
    }
    if baud == 0 {
        bail!("baud rate must be positive");
    }
    if port_id.starts_with("stub://") {
        let (link, _peer) = MemoryLink::pair(port_id);
        log::info!("serial: opened in-memory link {} @ {}", port_id, baud);
        return Ok(Box::new(link));
    }
    open_hardware(port_id, baud)
}

#[cfg(feature = "serial-hw")]
fn open_hardware(port_id: &str, baud: u32) -> Result<Box<dyn SerialLink>> {
    let link = hw::HardwareLink::open(port_id, baud)?;
    Ok(Box::new(link))
}

#[cfg(not(feature = "serial-hw"))]
fn open_hardware(port_id: &str, _baud: u32) -> Result<Box<dyn SerialLink>> {
    bail!(
        "serial port '{}' requires building with --features serial-hw",
        port_id
    )
}

#[derive(Default)]
struct MemoryState {
    inbound: VecDeque<u8>,
    written: Vec<u8>,
    closed: bool,
    close_calls: u32,
    fail_writes: bool,
}

fn lock_state(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    // plain bytes and flags; still consistent after a poisoning panic
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory link. Bytes injected by the paired `MemoryPeer` become readable
/// here; bytes written here are collected for the peer.
pub struct MemoryLink {
    name: String,
    state: Arc<Mutex<MemoryState>>,
}

/// Controller side of a `MemoryLink`.
#[derive(Clone)]
pub struct MemoryPeer {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLink {
    pub fn pair(name: &str) -> (MemoryLink, MemoryPeer) {
        let state = Arc::new(Mutex::new(MemoryState::default()));
        (
            MemoryLink {
                name: name.to_string(),
                state: state.clone(),
            },
            MemoryPeer { state },
        )
    }
}

impl SerialLink for MemoryLink {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = lock_state(&self.state);
        if state.closed {
            bail!("{}: link is closed", self.name);
        }
        if state.fail_writes {
            bail!("{}: write failed", self.name);
        }
        // nobody left to drain the bytes once every peer is gone
        if Arc::strong_count(&self.state) > 1 {
            state.written.extend_from_slice(bytes);
        }
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut state = lock_state(&self.state);
        if state.closed {
            bail!("{}: link is closed", self.name);
        }
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn close(&mut self) -> Result<()> {
        let mut state = lock_state(&self.state);
        state.closed = true;
        state.close_calls += 1;
        Ok(())
    }
}

impl MemoryPeer {
    /// Queue bytes for the console to read.
    pub fn inject(&self, bytes: &[u8]) {
        lock_state(&self.state).inbound.extend(bytes.iter().copied());
    }

    /// Drain everything the console has written so far.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut lock_state(&self.state).written)
    }

    pub fn take_written_string(&self) -> String {
        String::from_utf8_lossy(&self.take_written()).into_owned()
    }

    pub fn is_closed(&self) -> bool {
        lock_state(&self.state).closed
    }

    /// Number of times the console closed the link.
    pub fn close_calls(&self) -> u32 {
        lock_state(&self.state).close_calls
    }

    /// Make subsequent console writes fail, as an unplugged port would.
    pub fn fail_writes(&self, fail: bool) {
        lock_state(&self.state).fail_writes = fail;
    }
}

#[cfg(feature = "serial-hw")]
mod hw {
    use std::io::{ErrorKind, Read, Write};
    use std::time::Duration;

    use anyhow::{Context, Result};

    use super::SerialLink;

    pub struct HardwareLink {
        name: String,
        port: Option<Box<dyn serialport::SerialPort>>,
    }

    impl HardwareLink {
        pub fn open(path: &str, baud: u32) -> Result<Self> {
            let port = serialport::new(path, baud)
                .timeout(Duration::from_millis(100))
                .open()
                .with_context(|| format!("failed to open serial port {} @ {}", path, baud))?;
            log::info!("serial: opened {} @ {}", path, baud);
            Ok(Self {
                name: path.to_string(),
                port: Some(port),
            })
        }

        fn port(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
            let name = &self.name;
            self.port
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("{}: port is closed", name))
        }
    }

    impl SerialLink for HardwareLink {
        fn describe(&self) -> String {
            self.name.clone()
        }

        fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
            let port = self.port()?;
            port.write_all(bytes)?;
            port.flush()?;
            Ok(())
        }

        fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
            let port = self.port()?;
            let waiting = port.bytes_to_read()? as usize;
            if waiting == 0 {
                return Ok(0);
            }
            let take = waiting.min(buf.len());
            match port.read(&mut buf[..take]) {
                Ok(n) => Ok(n),
                Err(err) if err.kind() == ErrorKind::TimedOut => Ok(0),
                Err(err) => Err(err.into()),
            }
        }

        fn close(&mut self) -> Result<()> {
            // Dropping the handle releases the device.
            self.port = None;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_link_carries_bytes_both_ways() {
        let (mut link, peer) = MemoryLink::pair("stub://harvest");
        link.write_all(b"T#").unwrap();
        assert_eq!(peer.take_written_string(), "T#");
        assert!(peer.take_written().is_empty());

        let mut buf = [0u8; 4];
        assert_eq!(link.read_available(&mut buf).unwrap(), 0);
        peer.inject(b"STOP\n");
        assert_eq!(link.read_available(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"STOP");
        assert_eq!(link.read_available(&mut buf).unwrap(), 1);
    }

    #[test]
    fn writes_without_a_peer_are_discarded() {
        let (mut link, peer) = MemoryLink::pair("stub://drive");
        drop(peer);
        for _ in 0..100 {
            link.write_all(b"1,80,1,90#\n").unwrap();
        }
        assert!(lock_state(&link.state).written.is_empty());
    }

    #[test]
    fn closed_memory_link_refuses_io() {
        let (mut link, peer) = MemoryLink::pair("stub://drive");
        link.close().unwrap();
        assert!(peer.is_closed());
        assert!(link.write_all(b"D#").is_err());
        let mut buf = [0u8; 1];
        assert!(link.read_available(&mut buf).is_err());
    }

    #[test]
    fn open_link_validates_identifier() {
        assert!(open_link("", 115200).is_err());
        assert!(open_link("stub://x", 0).is_err());
        let link = open_link("stub://harvest", 115200).unwrap();
        assert_eq!(link.describe(), "stub://harvest");
    }

    #[cfg(not(feature = "serial-hw"))]
    #[test]
    fn device_paths_need_hardware_feature() {
        let err = open_link("/dev/ttyUSB0", 9600).err().unwrap();
        assert!(err.to_string().contains("serial-hw"));
    }
}
