//! Open serial connection plus its background workers.
//!
//! One `Connection` per open transport. Workers share a `LinkHandle` and
//! poll its shutdown flag; `close` raises the flag, joins every worker and
//! closes the link. The link is closed exactly once even when a worker hits
//! a write fault first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{anyhow, Result};

use super::link::SerialLink;

/// Shared access to an open link for the frame path and worker threads.
#[derive(Clone)]
pub(crate) struct LinkHandle {
    link: Arc<Mutex<Box<dyn SerialLink>>>,
    shutdown: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl LinkHandle {
    fn new(link: Box<dyn SerialLink>) -> Self {
        Self {
            link: Arc::new(Mutex::new(link)),
            shutdown: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut link = self
            .link
            .lock()
            .map_err(|_| anyhow!("serial link lock poisoned"))?;
        link.write_all(bytes)
    }

    pub(crate) fn read_available(&self, buf: &mut [u8]) -> Result<usize> {
        let mut link = self
            .link
            .lock()
            .map_err(|_| anyhow!("serial link lock poisoned"))?;
        link.read_available(buf)
    }

    pub(crate) fn should_stop(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop every worker and close the link. Later calls do nothing.
    pub(crate) fn shut_down(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut link = self
            .link
            .lock()
            .map_err(|_| anyhow!("serial link lock poisoned"))?;
        link.close()
    }
}

pub(crate) struct Connection {
    port_id: String,
    handle: LinkHandle,
    workers: Vec<(&'static str, JoinHandle<()>)>,
}

impl Connection {
    pub(crate) fn new(port_id: &str, link: Box<dyn SerialLink>) -> Self {
        Self {
            port_id: port_id.to_string(),
            handle: LinkHandle::new(link),
            workers: Vec::new(),
        }
    }

    pub(crate) fn port_id(&self) -> &str {
        &self.port_id
    }

    pub(crate) fn handle(&self) -> LinkHandle {
        self.handle.clone()
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.handle.is_closed()
    }

    pub(crate) fn spawn_worker<F>(&mut self, name: &'static str, work: F)
    where
        F: FnOnce(LinkHandle) + Send + 'static,
    {
        let handle = self.handle.clone();
        let join = std::thread::spawn(move || work(handle));
        self.workers.push((name, join));
    }

    /// Idempotent.
    pub(crate) fn close(&mut self) -> Result<()> {
        self.handle.shutdown.store(true, Ordering::SeqCst);
        for (name, join) in self.workers.drain(..) {
            join.join()
                .map_err(|_| anyhow!("{} thread panicked", name))?;
        }
        self.handle.shut_down()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("serial: closing {} failed: {}", self.port_id, err);
        }
    }
}
