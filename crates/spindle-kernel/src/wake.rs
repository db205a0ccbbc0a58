//! Cross-thread wake channel
//!
//! A doorbell socket pair plus a request queue. Foreign threads push a
//! [`WakeRequest`] and write one byte to the doorbell; the kernel's doorbell
//! task is woken by the selector, discards the bytes and drains the queue.
//! Byte count and request count need not match: the queue is the source of
//! truth, the bytes only wake the kernel thread.
//!
//! The signal handler writes to the same doorbell (see [`crate::signal`]),
//! using the signal number as the byte value.

use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use spindle_sdk::{KernelHandle, WakeRequest, WakeSink};

use crate::defaults::{DOORBELL_READ_CHUNK, WAKE_BYTE};

/// Thread-safe half shared with every [`KernelHandle`]
struct Bell {
    /// `None` once the kernel tore the channel down
    writer: Mutex<Option<UnixStream>>,
    requests: Sender<WakeRequest>,
}

impl WakeSink for Bell {
    fn push(&self, request: WakeRequest) {
        // Held across the send so a concurrent close cannot interleave
        let writer = self.writer.lock();
        if writer.is_none() {
            log::debug!("dropping wake for {} after teardown", request.task);
            return;
        }
        // Only fails when the receiving side is gone, i.e. after teardown
        let _ = self.requests.send(request);
    }

    fn ring(&self) {
        if let Some(writer) = self.writer.lock().as_ref() {
            // A full doorbell already guarantees a pending wake-up
            match (&*writer).write(&[WAKE_BYTE]) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => log::warn!("doorbell write failed: {}", e),
            }
        }
    }
}

/// Kernel-side end of the wake channel
pub(crate) struct Doorbell {
    reader: UnixStream,
    requests: Receiver<WakeRequest>,
    bell: Arc<Bell>,
}

impl Doorbell {
    /// Create the socket pair and the request queue
    pub(crate) fn open() -> io::Result<Self> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        let (tx, rx) = channel::unbounded();
        log::debug!(
            "doorbell opened (read fd {}, write fd {})",
            reader.as_raw_fd(),
            writer.as_raw_fd()
        );
        Ok(Self {
            reader,
            requests: rx,
            bell: Arc::new(Bell {
                writer: Mutex::new(Some(writer)),
                requests: tx,
            }),
        })
    }

    /// Descriptor the doorbell task waits on
    pub(crate) fn reader_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    /// Descriptor the signal handler writes to, while open
    pub(crate) fn writer_fd(&self) -> Option<RawFd> {
        self.bell.writer.lock().as_ref().map(|w| w.as_raw_fd())
    }

    /// A new thread-safe handle onto this channel
    pub(crate) fn handle(&self) -> KernelHandle {
        KernelHandle::new(self.bell.clone())
    }

    /// Read every pending doorbell byte and return the signal numbers among
    /// them, in arrival order
    pub(crate) fn drain_bytes(&self) -> io::Result<Vec<i32>> {
        let mut signals = Vec::new();
        let mut buf = [0u8; DOORBELL_READ_CHUNK];
        loop {
            match (&self.reader).read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    signals.extend(
                        buf[..n]
                            .iter()
                            .filter(|&&b| b != WAKE_BYTE)
                            .map(|&b| b as i32),
                    );
                    if n < buf.len() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(signals)
    }

    /// Take every queued request, in enqueue order
    pub(crate) fn take_requests(&self) -> Vec<WakeRequest> {
        self.requests.try_iter().collect()
    }

    /// Close the write end; later wakes from surviving handles are ignored
    pub(crate) fn close(&self) {
        if self.bell.writer.lock().take().is_some() {
            log::debug!("doorbell closed");
        }
    }
}

impl Drop for Doorbell {
    fn drop(&mut self) {
        self.close();
    }
}
