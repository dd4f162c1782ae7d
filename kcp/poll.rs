//! Poll-driven driver: one engine, one datagram channel, one wait.
//!
//! [`KcpPoller`] sleeps on channel readability for as long as the engine's
//! [`check`](kcp_core::KcpEngine::check) allows, drains whatever arrived,
//! updates the engine and hands back the next complete message.

use crate::buffer_pool::{acquire_datagram_buffer, release_datagram_buffer};
use crate::config::KcpConfig;
use crate::error::Result;
use crate::metrics::global_metrics;
use crate::transport::{Datagram, TransportOutput};

use bytes::{Bytes, BytesMut};
use kcp_core::protocol::{time_diff, ConvId, Timestamp};
use kcp_core::{clock, KcpEngine, KcpStats, LogSink, TransmitFailure};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// KCP session driven by explicit polling over a [`Datagram`] channel.
pub struct KcpPoller<T: Datagram> {
    engine: KcpEngine,
    transport: Arc<T>,
    config: KcpConfig,
    recv_buf: BytesMut,
}

impl<T: Datagram> KcpPoller<T> {
    /// Create a session for conversation `conv` over `transport`.
    pub fn new(conv: ConvId, transport: T, config: KcpConfig) -> Result<Self> {
        config.validate()?;

        let transport = Arc::new(transport);
        let output = TransportOutput::new(transport.clone());
        let engine = KcpEngine::new(conv, config.clone().into(), output);
        let recv_buf = acquire_datagram_buffer(config.recv_buffer_size);

        global_metrics().session_created();
        match (transport.local_addr(), transport.peer_addr()) {
            (Ok(local), Ok(peer)) => debug!(conv = %conv, %local, %peer, "KCP poller created"),
            _ => debug!(conv = %conv, "KCP poller created"),
        }

        Ok(Self {
            engine,
            transport,
            config,
            recv_buf,
        })
    }

    /// Forward the engine's protocol log lines for the categories in `mask`.
    pub fn with_log(mut self, sink: impl LogSink + 'static, mask: u32) -> Self {
        self.engine.set_log(sink, mask);
        self
    }

    pub fn engine(&self) -> &KcpEngine {
        &self.engine
    }

    /// Direct engine access for tuning (`set_mtu`, `set_window`, ...).
    pub fn engine_mut(&mut self) -> &mut KcpEngine {
        &mut self.engine
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn conv(&self) -> ConvId {
        self.engine.conv()
    }

    pub fn stats(&self) -> KcpStats {
        self.engine.stats()
    }

    /// Output failure of the most recent flush that had one.
    pub fn last_transmit_error(&self) -> Option<&TransmitFailure> {
        self.engine.last_transmit_error()
    }

    // ── Engine operations on the wall clock ────────────────────────────

    /// Queue a message and run an update; in no-delay mode the message is
    /// flushed right away even if no flush was due.
    pub fn send(&mut self, data: Bytes) -> Result<()> {
        self.engine.send(data)?;
        self.update();
        if self.engine.nodelay().nodelay {
            self.flush();
        }
        Ok(())
    }

    /// Next complete message, without waiting.
    pub fn recv(&mut self) -> Option<Bytes> {
        self.engine.recv()
    }

    /// Size of the next complete message, without consuming it.
    pub fn peek_size(&self) -> Option<usize> {
        self.engine.peek_size()
    }

    /// Feed a packet received outside the poller's own channel.
    pub fn input(&mut self, packet: Bytes) -> Result<()> {
        self.engine.input(packet)?;
        Ok(())
    }

    /// Run the engine's scheduler at the current time.
    ///
    /// Output failures are recorded on the engine, not returned.
    pub fn update(&mut self) {
        let now = clock::now_ms();
        if let Err(e) = self.engine.update(now) {
            trace!(conv = %self.engine.conv(), error = %e, "Update flush incomplete");
        }
    }

    /// Absolute time (on [`clock::now_ms`]) of the next required update.
    pub fn check(&self) -> Timestamp {
        self.engine.check(clock::now_ms())
    }

    /// Flush immediately, outside the schedule.
    pub fn flush(&mut self) {
        if let Err(e) = self.engine.flush() {
            trace!(conv = %self.engine.conv(), error = %e, "Flush incomplete");
        }
    }

    /// Unacknowledged or queued segments; back off sending while this is
    /// large.
    pub fn unacked_count(&self) -> usize {
        self.engine.unacked_count()
    }

    // ── Polling ────────────────────────────────────────────────────────

    /// Wait for the next complete message for at most `max_wait`
    /// (`None` falls back to the configured default; both `None` waits
    /// indefinitely).
    ///
    /// The engine is serviced the whole time: packets are ingested, acks and
    /// retransmissions go out on schedule. Returns `Ok(None)` when the wait
    /// elapsed without a message.
    pub async fn poll_read(&mut self, max_wait: Option<Duration>) -> Result<Option<Bytes>> {
        let max_wait = max_wait.or(self.config.default_max_wait);
        let deadline = max_wait.map(|wait| Instant::now() + wait);

        if self.engine.peek_size().is_some() {
            self.update();
            return Ok(self.engine.recv());
        }

        loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let sleep = self.next_sleep(remaining);

            if self.wait_readable(sleep).await? {
                self.drain()?;
            }
            self.update();

            if let Some(msg) = self.engine.recv() {
                return Ok(Some(msg));
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(None);
            }
        }
    }

    /// Time until the engine next needs servicing, bounded by `remaining`.
    ///
    /// An idle engine needs no wake-up of its own, so the whole remaining
    /// wait is used.
    fn next_sleep(&self, remaining: Option<Duration>) -> Option<Duration> {
        if self.engine.is_idle() {
            return remaining;
        }
        let now = clock::now_ms();
        let until_check = time_diff(self.engine.check(now), now).max(0) as u64;
        let until_check = Duration::from_millis(until_check);
        Some(match remaining {
            Some(remaining) => until_check.min(remaining),
            None => until_check,
        })
    }

    /// Wait until the channel is readable or `sleep` elapsed. Returns
    /// whether the channel became readable.
    async fn wait_readable(&self, sleep: Option<Duration>) -> Result<bool> {
        match sleep {
            None => {
                self.transport.readable().await?;
                Ok(true)
            }
            Some(sleep) => match tokio::time::timeout(sleep, self.transport.readable()).await {
                Ok(ready) => {
                    ready?;
                    Ok(true)
                }
                Err(_) => Ok(false),
            },
        }
    }

    /// Feed every immediately available datagram to the engine, up to the
    /// configured bound. Returns how many were read.
    fn drain(&mut self) -> Result<usize> {
        let conv = self.engine.conv();
        let mut drained = 0;

        while drained < self.config.max_drain_datagrams {
            let n = match self.transport.try_recv(&mut self.recv_buf) {
                Ok(n) => n,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                    break;
                }
                Err(e) => {
                    warn!(conv = %conv, error = %e, "Datagram receive failed");
                    return Err(e.into());
                }
            };
            drained += 1;

            let packet = Bytes::copy_from_slice(&self.recv_buf[..n]);
            if let Err(e) = self.engine.input(packet) {
                debug!(conv = %conv, bytes = n, error = %e, "Dropped malformed datagram");
            }
        }

        if drained > 0 {
            trace!(conv = %conv, datagrams = drained, "Drained channel");
        }
        Ok(drained)
    }
}

impl<T: Datagram> Drop for KcpPoller<T> {
    fn drop(&mut self) {
        global_metrics().session_closed(&self.engine.stats(), self.engine.is_dead_link());
        release_datagram_buffer(std::mem::take(&mut self.recv_buf));
        debug!(conv = %self.engine.conv(), "KCP poller closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// In-memory channel with a queue of datagrams waiting to be read.
    #[derive(Default)]
    struct Scripted {
        inbound: Mutex<VecDeque<io::Result<Vec<u8>>>>,
        outbound: Mutex<Vec<Vec<u8>>>,
    }

    impl Datagram for Scripted {
        type Addr = String;

        async fn readable(&self) -> io::Result<()> {
            if self.inbound.lock().unwrap().is_empty() {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        fn try_recv(&self, buf: &mut [u8]) -> io::Result<usize> {
            match self.inbound.lock().unwrap().pop_front() {
                Some(Ok(datagram)) => {
                    buf[..datagram.len()].copy_from_slice(&datagram);
                    Ok(datagram.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }

        fn try_send(&self, buf: &[u8]) -> io::Result<usize> {
            self.outbound.lock().unwrap().push(buf.to_vec());
            Ok(buf.len())
        }

        fn local_addr(&self) -> io::Result<String> {
            Ok("mem:local".to_string())
        }

        fn peer_addr(&self) -> io::Result<String> {
            Ok("mem:peer".to_string())
        }
    }

    fn segment_for(conv: ConvId, data: &[u8]) -> Vec<u8> {
        let queue = kcp_core::PacketQueue::new();
        let mut peer = KcpEngine::new(conv, kcp_core::KcpCoreConfig::default(), queue.clone());
        peer.send(Bytes::copy_from_slice(data)).unwrap();
        peer.update(0).unwrap();
        queue.drain().concat()
    }

    #[tokio::test]
    async fn poll_read_returns_none_after_max_wait() {
        let mut poller = KcpPoller::new(1, Scripted::default(), KcpConfig::default()).unwrap();
        let started = Instant::now();
        let msg = poller.poll_read(Some(Duration::from_millis(30))).await.unwrap();
        assert!(msg.is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn poll_read_drains_and_skips_garbage() {
        let transport = Scripted::default();
        {
            let mut inbound = transport.inbound.lock().unwrap();
            inbound.push_back(Ok(vec![0xde, 0xad]));
            inbound.push_back(Ok(segment_for(5, b"payload")));
        }
        let mut poller = KcpPoller::new(5, transport, KcpConfig::default()).unwrap();

        let msg = poller.poll_read(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(msg, Some(Bytes::from_static(b"payload")));
        assert_eq!(poller.stats().decode_errors, 1);
    }

    #[tokio::test]
    async fn socket_errors_propagate() {
        let transport = Scripted::default();
        transport
            .inbound
            .lock()
            .unwrap()
            .push_back(Err(io::ErrorKind::ConnectionRefused.into()));
        let mut poller = KcpPoller::new(6, transport, KcpConfig::default()).unwrap();

        let err = poller.poll_read(Some(Duration::from_secs(1))).await.unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn nodelay_send_flushes_immediately() {
        let config = KcpConfig::default().turbo_mode();
        let mut poller = KcpPoller::new(7, Scripted::default(), config).unwrap();
        poller.send(Bytes::from_static(b"now")).unwrap();
        assert_eq!(poller.transport().outbound.lock().unwrap().len(), 1);
        assert_eq!(poller.unacked_count(), 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = KcpConfig::default().mtu(10);
        assert!(KcpPoller::new(8, Scripted::default(), config).is_err());
    }
}
