//! Capabilities injected into an engine at construction: where packets go
//! and where protocol log lines go.
//!
//! The engine exclusively owns its strategies; they never hold the engine.

use bytes::Bytes;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

/// Packet sink invoked whenever a flush emits a packet.
///
/// A failing `transmit` never aborts the flush: the engine records the
/// failure and the affected segments stay in the send window to be retried on
/// the normal retransmission schedule.
pub trait Output: Send {
    fn transmit(&mut self, packet: &[u8]) -> io::Result<()>;
}

impl<F> Output for F
where
    F: FnMut(&[u8]) -> io::Result<()> + Send,
{
    fn transmit(&mut self, packet: &[u8]) -> io::Result<()> {
        self(packet)
    }
}

/// In-memory output collecting packets for a caller to drain.
///
/// Clone a handle before giving one to the engine; both see the same queue.
#[derive(Debug, Clone, Default)]
pub struct PacketQueue {
    packets: Arc<Mutex<VecDeque<Bytes>>>,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every packet emitted so far, oldest first.
    pub fn drain(&self) -> Vec<Bytes> {
        match self.packets.lock() {
            Ok(mut q) => q.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.packets.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Output for PacketQueue {
    fn transmit(&mut self, packet: &[u8]) -> io::Result<()> {
        let mut q = self
            .packets
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "packet queue poisoned"))?;
        q.push_back(Bytes::copy_from_slice(packet));
        Ok(())
    }
}

/// Log categories, combinable into a mask.
pub mod log_mask {
    pub const OUTPUT: u32 = 1;
    pub const INPUT: u32 = 2;
    pub const SEND: u32 = 4;
    pub const RECV: u32 = 8;
    pub const IN_DATA: u32 = 16;
    pub const IN_ACK: u32 = 32;
    pub const IN_PROBE: u32 = 64;
    pub const IN_WINS: u32 = 128;
    pub const OUT_DATA: u32 = 256;
    pub const OUT_ACK: u32 = 512;
    pub const OUT_PROBE: u32 = 1024;
    pub const OUT_WINS: u32 = 2048;
    pub const ALL: u32 = 0xffff_ffff;
}

/// Receiver for protocol log lines of the categories enabled in the engine's
/// log mask.
pub trait LogSink: Send {
    fn log(&mut self, category: u32, line: &str);
}

impl<F> LogSink for F
where
    F: FnMut(u32, &str) + Send,
{
    fn log(&mut self, category: u32, line: &str) {
        self(category, line)
    }
}
