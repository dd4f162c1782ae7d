//! The KCP state machine: input processing, the flush/update scheduler and
//! the public engine API.
//!
//! The engine never reads a clock and never touches a socket. Callers feed it
//! timestamps through [`KcpEngine::update`] and raw packets through
//! [`KcpEngine::input`]; it hands packets to its [`Output`] strategy.

use crate::config::{KcpCoreConfig, NodeDelayConfig};
use crate::error::{KcpCoreError, KcpCoreResult, TransmitFailure};
use crate::output::{log_mask, LogSink, Output};
use crate::protocol::*;
use crate::recv::{PushOutcome, ReceivePath};
use crate::send::{RetransmitPolicy, SendPath};
use crate::timing::{CongestionWindow, RttEstimator};

use bytes::{Bytes, BytesMut};
use std::fmt;
use std::io;
use tracing::{debug, trace, warn};

/// Remote-window probe state
#[derive(Debug, Default)]
struct ProbeState {
    flags: u32,
    wait: u32,
    ts: Timestamp,
}

/// Packs encoded segments into MTU-sized packets and hands them to the output.
struct PacketWriter<'a> {
    output: &'a mut (dyn Output + 'static),
    buf: BytesMut,
    mtu: usize,
    packets: u64,
    failed: u32,
    error: Option<io::Error>,
}

impl<'a> PacketWriter<'a> {
    fn new(output: &'a mut (dyn Output + 'static), mut buf: BytesMut, mtu: usize) -> Self {
        buf.clear();
        buf.reserve(mtu);
        Self {
            output,
            buf,
            mtu,
            packets: 0,
            failed: 0,
            error: None,
        }
    }

    fn push(&mut self, segment: &Segment) {
        if !self.buf.is_empty() && self.buf.len() + segment.size() > self.mtu {
            self.emit();
        }
        segment.encode(&mut self.buf);
    }

    fn emit(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        match self.output.transmit(&self.buf) {
            Ok(()) => self.packets += 1,
            Err(e) => {
                self.failed += 1;
                self.error.get_or_insert(e);
            }
        }
        self.buf.clear();
    }

    fn finish(mut self) -> (BytesMut, u64, u32, Option<io::Error>) {
        self.emit();
        (self.buf, self.packets, self.failed, self.error)
    }
}

fn emit_log(
    sink: &mut Option<Box<dyn LogSink>>,
    mask: u32,
    category: u32,
    args: fmt::Arguments<'_>,
) {
    if mask & category == 0 {
        return;
    }
    if let Some(sink) = sink.as_mut() {
        sink.log(category, &args.to_string());
    }
}

/// Pure synchronous KCP engine for one conversation.
///
/// Not internally synchronized: every mutator takes `&mut self`.
pub struct KcpEngine {
    conv: ConvId,
    mtu: u32,
    mss: u32,
    snd_wnd: u32,
    rmt_wnd: u32,
    nodelay: NodeDelayConfig,
    dead_link: u32,

    send: SendPath,
    recv: ReceivePath,
    rtt: RttEstimator,
    cwnd: CongestionWindow,
    probe: ProbeState,

    // Scheduler
    current: Timestamp,
    ts_flush: Timestamp,
    updated: bool,

    output: Box<dyn Output>,
    log: Option<Box<dyn LogSink>>,
    log_mask: u32,
    buffer: BytesMut,

    stats: KcpStats,
    dead: bool,
    last_transmit_error: Option<TransmitFailure>,
}

impl fmt::Debug for KcpEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KcpEngine")
            .field("conv", &self.conv)
            .field("mtu", &self.mtu)
            .field("snd_una", &self.send.snd_una())
            .field("snd_nxt", &self.send.snd_nxt())
            .field("rcv_nxt", &self.recv.rcv_nxt())
            .field("rto", &self.rtt.rto())
            .field("cwnd", &self.cwnd.cwnd())
            .finish_non_exhaustive()
    }
}

impl KcpEngine {
    /// Create an engine for conversation `conv` emitting packets to `output`.
    ///
    /// Out-of-range config values are clamped the way the setters would
    /// reject them; use [`KcpEngine::set_mtu`]/[`KcpEngine::set_window`] for
    /// checked changes.
    pub fn new(conv: ConvId, config: KcpCoreConfig, output: impl Output + 'static) -> Self {
        let mtu = config
            .mtu
            .clamp(constants::IKCP_MTU_MIN, constants::IKCP_MTU_MAX);
        let mss = mtu - constants::IKCP_OVERHEAD;
        let mut nodelay = config.nodelay;
        nodelay.interval = nodelay.effective_interval();
        let rcv_wnd = config
            .rcv_wnd
            .clamp(constants::IKCP_WND_RCV, u16::MAX as u32);

        debug!(conv = %conv, mtu, interval = nodelay.interval, "KCP engine created");

        Self {
            conv,
            mtu,
            mss,
            snd_wnd: config.snd_wnd.max(1),
            rmt_wnd: constants::IKCP_WND_RCV,
            dead_link: config.dead_link.max(1),

            send: SendPath::new(conv),
            recv: ReceivePath::new(rcv_wnd),
            rtt: RttEstimator::new(nodelay.min_rto()),
            cwnd: CongestionWindow::new(mss, !nodelay.no_congestion_control),
            probe: ProbeState::default(),
            nodelay,

            current: 0,
            ts_flush: 0,
            updated: false,

            output: Box::new(output),
            log: None,
            log_mask: 0,
            buffer: BytesMut::with_capacity(mtu as usize),

            stats: KcpStats::default(),
            dead: false,
            last_transmit_error: None,
        }
    }

    /// Attach a log sink receiving lines for the categories in `mask`
    /// (see [`log_mask`]).
    pub fn with_log(mut self, sink: impl LogSink + 'static, mask: u32) -> Self {
        self.set_log(sink, mask);
        self
    }

    pub fn set_log(&mut self, sink: impl LogSink + 'static, mask: u32) {
        self.log = Some(Box::new(sink));
        self.log_mask = mask;
    }

    pub fn set_log_mask(&mut self, mask: u32) {
        self.log_mask = mask;
    }

    /// Remove the log sink.
    pub fn clear_log(&mut self) {
        self.log = None;
    }

    fn write_log(&mut self, category: u32, args: fmt::Arguments<'_>) {
        emit_log(&mut self.log, self.log_mask, category, args);
    }

    // ── Application side ───────────────────────────────────────────────

    /// Queue a message for reliable delivery.
    ///
    /// Never blocks. Fails only when the message needs more than 255
    /// fragments at the current MTU; nothing is queued in that case.
    pub fn send(&mut self, data: Bytes) -> KcpCoreResult<()> {
        let len = data.len();
        let fragments = match self.send.submit(data, self.mss as usize) {
            Ok(n) => n,
            Err(e) => {
                debug!(conv = %self.conv, bytes = len, error = %e, "Message rejected");
                return Err(e);
            }
        };
        if fragments == 0 {
            return Ok(());
        }

        self.stats.bytes_sent += len as u64;
        self.write_log(
            log_mask::SEND,
            format_args!("send: {len} bytes in {fragments} fragment(s)"),
        );
        trace!(
            conv = %self.conv,
            bytes = len,
            fragments,
            "Data queued for sending"
        );
        Ok(())
    }

    /// Take the next complete message, or `None` if none is ready.
    pub fn recv(&mut self) -> Option<Bytes> {
        let (data, reopened) = self.recv.read()?;

        // The peer may be stalled on our zero window.
        if reopened {
            self.probe.flags |= constants::IKCP_ASK_TELL;
        }

        self.stats.bytes_received += data.len() as u64;
        self.write_log(log_mask::RECV, format_args!("recv: {} bytes", data.len()));
        trace!(conv = %self.conv, bytes = data.len(), "Data received");
        Some(data)
    }

    /// Size of the next complete message without consuming it.
    pub fn peek_size(&self) -> Option<usize> {
        self.recv.peek_size()
    }

    // ── Network side ───────────────────────────────────────────────────

    /// Process one raw packet from the channel.
    ///
    /// Every decodable segment is applied; malformed or foreign ones are
    /// dropped and the first such problem is returned after the whole packet
    /// has been processed. Duplicates and reordering are normal input.
    pub fn input(&mut self, data: Bytes) -> KcpCoreResult<()> {
        self.stats.packets_received += 1;
        self.write_log(log_mask::INPUT, format_args!("[RI] {} bytes", data.len()));

        if data.len() < SegmentHeader::SIZE {
            self.stats.decode_errors += 1;
            return Err(KcpCoreError::decode(format!(
                "packet of {} bytes is shorter than a header",
                data.len()
            )));
        }

        let prev_una = self.send.snd_una();
        let mut first_error: Option<KcpCoreError> = None;
        let mut max_ack: Option<SeqNum> = None;
        let mut buf = data;

        while let Some(decoded) = decode_next(&mut buf) {
            let segment = match decoded {
                Decoded::Segment(segment) => segment,
                Decoded::Truncated {
                    remaining,
                    declared,
                } => {
                    self.stats.decode_errors += 1;
                    debug!(conv = %self.conv, remaining, declared, "Truncated segment dropped");
                    first_error.get_or_insert_with(|| {
                        KcpCoreError::decode(format!(
                            "segment declares {declared} payload bytes, {remaining} bytes left"
                        ))
                    });
                    break;
                }
            };

            if segment.header.conv != self.conv {
                self.stats.decode_errors += 1;
                warn!(
                    conv = %self.conv,
                    packet_conv = %segment.header.conv,
                    "Conversation ID mismatch"
                );
                first_error.get_or_insert_with(|| {
                    KcpCoreError::decode(format!(
                        "conversation {} does not match {}",
                        segment.header.conv, self.conv
                    ))
                });
                continue;
            }

            let Some(cmd) = segment.header.command() else {
                self.stats.decode_errors += 1;
                warn!(conv = %self.conv, cmd = segment.header.cmd, "Unknown command");
                first_error.get_or_insert_with(|| {
                    KcpCoreError::decode(format!("unknown command {}", segment.header.cmd))
                });
                continue;
            };

            self.rmt_wnd = segment.header.wnd as u32;
            self.send.parse_una(segment.header.una);

            match cmd {
                Command::Ack => {
                    let sn = segment.sn();
                    let rtt = time_diff(self.current, segment.header.ts);
                    if rtt >= 0 {
                        self.rtt.sample(rtt as u32, self.nodelay.interval);
                    }
                    self.send.parse_ack(sn);

                    max_ack = match max_ack {
                        Some(max) if !seq_after(sn, max) => Some(max),
                        _ => Some(sn),
                    };
                    emit_log(
                        &mut self.log,
                        self.log_mask,
                        log_mask::IN_ACK,
                        format_args!("input ack: sn={sn} rtt={rtt} rto={}", self.rtt.rto()),
                    );
                }
                Command::Push => {
                    let sn = segment.sn();
                    let ts = segment.header.ts;
                    let outcome = self.recv.accept_push(segment);
                    emit_log(
                        &mut self.log,
                        self.log_mask,
                        log_mask::IN_DATA,
                        format_args!("input psh: sn={sn} ts={ts} {outcome:?}"),
                    );
                    if outcome == PushOutcome::OutOfWindow {
                        trace!(conv = %self.conv, sn, "Segment beyond receive window");
                    }
                }
                Command::WindowProbe => {
                    self.probe.flags |= constants::IKCP_ASK_TELL;
                    self.write_log(log_mask::IN_PROBE, format_args!("input probe"));
                }
                Command::WindowTell => {
                    let wnd = self.rmt_wnd;
                    self.write_log(log_mask::IN_WINS, format_args!("input wins: {wnd}"));
                }
            }
        }

        if let Some(max) = max_ack {
            self.send.parse_fastack(max);
        }

        if seq_after(self.send.snd_una(), prev_una) {
            self.cwnd.on_ack_progress(self.mss, self.rmt_wnd);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ── Scheduler ──────────────────────────────────────────────────────

    /// Advance the clock to `now` and flush if the interval elapsed or a
    /// retransmission is due.
    ///
    /// Call again at (or after) the time [`KcpEngine::check`] reports.
    pub fn update(&mut self, now: Timestamp) -> KcpCoreResult<()> {
        self.current = now;

        if !self.updated {
            self.updated = true;
            self.ts_flush = now;
        }

        let mut slap = time_diff(now, self.ts_flush);
        if !(-constants::IKCP_CLOCK_JUMP..constants::IKCP_CLOCK_JUMP).contains(&slap) {
            self.ts_flush = now;
            slap = 0;
        }

        if slap >= 0 {
            self.ts_flush = self.ts_flush.wrapping_add(self.nodelay.interval);
            if time_diff(now, self.ts_flush) >= 0 {
                self.ts_flush = now.wrapping_add(self.nodelay.interval);
            }
            return self.flush();
        }

        // A retransmission deadline can fall between flush ticks.
        if self
            .send
            .earliest_deadline(now)
            .is_some_and(|diff| diff <= 0)
        {
            return self.flush();
        }
        Ok(())
    }

    /// When [`KcpEngine::update`] must next be called, given the time `now`.
    ///
    /// Side-effect free. Never earlier than `now`.
    pub fn check(&self, now: Timestamp) -> Timestamp {
        if !self.updated {
            return now;
        }

        let mut ts_flush = self.ts_flush;
        let drift = time_diff(now, ts_flush);
        if !(-constants::IKCP_CLOCK_JUMP..constants::IKCP_CLOCK_JUMP).contains(&drift) {
            ts_flush = now;
        }
        if time_diff(now, ts_flush) >= 0 {
            return now;
        }

        let tm_flush = time_diff(ts_flush, now) as u32;
        let tm_packet = match self.send.earliest_deadline(now) {
            Some(diff) if diff <= 0 => return now,
            Some(diff) => diff as u32,
            None => i32::MAX as u32,
        };

        let minimal = tm_flush.min(tm_packet).min(self.nodelay.interval);
        now.wrapping_add(minimal)
    }

    /// Flush now at the last time given to [`KcpEngine::update`]: acks,
    /// window probes, newly admitted data and due retransmissions.
    ///
    /// Output failures do not stop the flush; the first is returned (and
    /// kept in [`KcpEngine::last_transmit_error`]) once everything else has
    /// been processed.
    pub fn flush(&mut self) -> KcpCoreResult<()> {
        let current = self.current;
        let wnd = self.recv.wnd_unused().min(u16::MAX as u32) as u16;
        let una = self.recv.rcv_nxt();

        self.update_probe(current);

        let limit = self.cwnd.limit(self.snd_wnd, self.rmt_wnd);
        self.send.promote(current, limit, self.rtt.rto());

        let resend = if self.nodelay.resend > 0 {
            self.nodelay.resend
        } else {
            u32::MAX
        };
        let policy = RetransmitPolicy {
            nodelay: self.nodelay.nodelay,
            resend,
            congestion_disabled: self.nodelay.no_congestion_control,
            dead_link: self.dead_link,
        };
        let plan = self.send.plan_transmit(current, &self.rtt, policy);

        let buffer = std::mem::take(&mut self.buffer);
        let mut writer = PacketWriter::new(&mut *self.output, buffer, self.mtu as usize);

        for (sn, ts) in self.recv.take_acks() {
            let mut segment = Segment::ack(self.conv, sn, ts);
            segment.header.wnd = wnd;
            segment.header.una = una;
            emit_log(
                &mut self.log,
                self.log_mask,
                log_mask::OUT_ACK,
                format_args!("output ack: sn={sn} ts={ts}"),
            );
            writer.push(&segment);
        }

        for (flag, cmd, category) in [
            (constants::IKCP_ASK_SEND, Command::WindowProbe, log_mask::OUT_PROBE),
            (constants::IKCP_ASK_TELL, Command::WindowTell, log_mask::OUT_WINS),
        ] {
            if self.probe.flags & flag != 0 {
                let mut segment = Segment::new(self.conv, cmd, Bytes::new());
                segment.header.wnd = wnd;
                segment.header.una = una;
                emit_log(
                    &mut self.log,
                    self.log_mask,
                    category,
                    format_args!("output {}: wnd={wnd}", cmd.as_str()),
                );
                writer.push(&segment);
            }
        }
        self.probe.flags = 0;

        for &idx in &plan.due {
            let segment = &mut self.send.window_mut()[idx];
            segment.header.ts = current;
            segment.header.wnd = wnd;
            segment.header.una = una;
            emit_log(
                &mut self.log,
                self.log_mask,
                log_mask::OUT_DATA,
                format_args!(
                    "output psh: sn={} ts={} xmit={} rto={}",
                    segment.sn(),
                    current,
                    segment.xmit,
                    segment.rto
                ),
            );
            writer.push(segment);
        }

        let (buffer, packets, failed, error) = writer.finish();
        self.buffer = buffer;

        self.stats.packets_sent += packets;
        self.stats.retransmissions += plan.timeouts as u64;
        self.stats.fast_retransmissions += plan.fast_resends as u64;
        if packets > 0 {
            self.write_log(log_mask::OUTPUT, format_args!("[RO] {packets} packet(s)"));
        }

        if plan.fast_resends > 0 {
            self.cwnd
                .on_fast_retransmit(self.send.inflight(), resend, self.mss);
        }
        if plan.lost() {
            trace!(conv = %self.conv, timeouts = plan.timeouts, "Retransmission timeout");
            self.cwnd.on_timeout(self.mss);
        }
        self.cwnd.ensure_floor(self.mss);

        if plan.dead_link && !self.dead {
            self.dead = true;
            warn!(conv = %self.conv, dead_link = self.dead_link, "Dead link detected");
        }

        match error {
            Some(e) => {
                let mut failure = TransmitFailure::from_io(&e);
                failure.failed_packets = failed;
                self.stats.transmit_failures += failed as u64;
                warn!(conv = %self.conv, error = %e, failed, "Output failed during flush");
                self.last_transmit_error = Some(failure.clone());
                Err(KcpCoreError::Transmit(failure))
            }
            None => Ok(()),
        }
    }

    fn update_probe(&mut self, current: Timestamp) {
        if self.rmt_wnd == 0 {
            if self.probe.wait == 0 {
                self.probe.wait = constants::IKCP_PROBE_INIT;
                self.probe.ts = current.wrapping_add(self.probe.wait);
            } else if time_diff(current, self.probe.ts) >= 0 {
                if self.probe.wait < constants::IKCP_PROBE_INIT {
                    self.probe.wait = constants::IKCP_PROBE_INIT;
                }
                self.probe.wait += self.probe.wait / 2;
                if self.probe.wait > constants::IKCP_PROBE_LIMIT {
                    self.probe.wait = constants::IKCP_PROBE_LIMIT;
                }
                self.probe.ts = current.wrapping_add(self.probe.wait);
                self.probe.flags |= constants::IKCP_ASK_SEND;
            }
        } else {
            self.probe.ts = 0;
            self.probe.wait = 0;
        }
    }

    // ── Configuration ──────────────────────────────────────────────────

    /// Change the MTU. Rejected values leave the engine unchanged.
    ///
    /// When the MTU shrinks, messages still waiting in the send queue are
    /// split again at the new size. Segments already in flight, and the
    /// remaining fragments of a message that has started sending, keep their
    /// size.
    pub fn set_mtu(&mut self, mtu: u32) -> KcpCoreResult<()> {
        if !(constants::IKCP_MTU_MIN..=constants::IKCP_MTU_MAX).contains(&mtu) {
            return Err(KcpCoreError::InvalidMtu { mtu });
        }
        let mss = mtu - constants::IKCP_OVERHEAD;
        if mss < self.mss {
            self.send.refragment(mss as usize);
        }
        self.mtu = mtu;
        self.mss = mss;
        self.buffer = BytesMut::with_capacity(mtu as usize);
        Ok(())
    }

    /// Set send and receive window sizes in segments.
    ///
    /// The receive window is raised to at least 128. Zero, or a receive
    /// window that does not fit the 16-bit header field, is rejected.
    pub fn set_window(&mut self, snd_wnd: u32, rcv_wnd: u32) -> KcpCoreResult<()> {
        if snd_wnd == 0 || rcv_wnd == 0 || rcv_wnd > u16::MAX as u32 {
            return Err(KcpCoreError::InvalidWindow {
                snd: snd_wnd,
                rcv: rcv_wnd,
            });
        }
        self.snd_wnd = snd_wnd;
        self.recv
            .set_rcv_wnd(rcv_wnd.max(constants::IKCP_WND_RCV));
        Ok(())
    }

    /// Tune latency behavior. `interval` is clamped to 10..=5000 ms; a
    /// `resend` of 0 disables fast retransmit.
    pub fn set_nodelay(&mut self, nodelay: bool, interval: u32, resend: u32, no_congestion_control: bool) {
        let config = NodeDelayConfig::custom(nodelay, interval, resend, no_congestion_control);
        self.apply_nodelay(config);
    }

    /// Same as [`KcpEngine::set_nodelay`] from a preset.
    pub fn apply_nodelay(&mut self, mut config: NodeDelayConfig) {
        config.interval = config.effective_interval();
        self.rtt.set_min_rto(config.min_rto());
        self.cwnd.set_enabled(!config.no_congestion_control);
        self.nodelay = config;
    }

    /// Transmissions of a single segment after which [`KcpEngine::is_dead_link`]
    /// reports true.
    pub fn set_dead_link(&mut self, dead_link: u32) {
        self.dead_link = dead_link.max(1);
    }

    // ── Queries ────────────────────────────────────────────────────────

    pub fn conv(&self) -> ConvId {
        self.conv
    }

    pub fn mtu(&self) -> u32 {
        self.mtu
    }

    pub fn mss(&self) -> u32 {
        self.mss
    }

    /// `(send window, receive window)`
    pub fn window(&self) -> (u32, u32) {
        (self.snd_wnd, self.recv.rcv_wnd())
    }

    pub fn interval(&self) -> u32 {
        self.nodelay.interval
    }

    pub fn nodelay(&self) -> &NodeDelayConfig {
        &self.nodelay
    }

    /// Segments queued or in flight; the caller's backpressure signal.
    pub fn unacked_count(&self) -> usize {
        self.send.queued() + self.send.in_window()
    }

    /// Nothing queued, in flight or owed to the peer: no flush would emit
    /// anything.
    pub fn is_idle(&self) -> bool {
        self.unacked_count() == 0 && self.recv.pending_acks() == 0 && self.probe.flags == 0
    }

    /// Segments currently in the in-flight window.
    pub fn inflight_count(&self) -> usize {
        self.send.in_window()
    }

    /// Everything below this sequence number has been acknowledged.
    pub fn snd_una(&self) -> SeqNum {
        self.send.snd_una()
    }

    pub fn rcv_nxt(&self) -> SeqNum {
        self.recv.rcv_nxt()
    }

    pub fn remote_window(&self) -> u32 {
        self.rmt_wnd
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd.cwnd()
    }

    pub fn rto(&self) -> u32 {
        self.rtt.rto()
    }

    pub fn pending_acks(&self) -> usize {
        self.recv.pending_acks()
    }

    /// Some segment has been transmitted the dead-link number of times.
    pub fn is_dead_link(&self) -> bool {
        self.dead
    }

    pub fn last_transmit_error(&self) -> Option<&TransmitFailure> {
        self.last_transmit_error.as_ref()
    }

    pub fn take_transmit_error(&mut self) -> Option<TransmitFailure> {
        self.last_transmit_error.take()
    }

    /// Counters plus a snapshot of the current timing and window state.
    pub fn stats(&self) -> KcpStats {
        KcpStats {
            rtt: self.rtt.srtt(),
            rtt_var: self.rtt.rttvar(),
            rto: self.rtt.rto(),
            snd_wnd: self.snd_wnd,
            rcv_wnd: self.recv.rcv_wnd(),
            rmt_wnd: self.rmt_wnd,
            cwnd: self.cwnd.cwnd(),
            snd_buf_size: self.send.in_window() as u32,
            rcv_buf_size: self.recv.buffered() as u32,
            ..self.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::PacketQueue;
    use std::sync::{Arc, Mutex};

    fn engine(conv: ConvId) -> (KcpEngine, PacketQueue) {
        let queue = PacketQueue::new();
        (KcpEngine::new(conv, KcpCoreConfig::default(), queue.clone()), queue)
    }

    #[test]
    fn check_before_first_update_is_now() {
        let (kcp, _) = engine(1);
        assert_eq!(kcp.check(1234), 1234);
    }

    #[test]
    fn check_is_never_in_the_past() {
        let (mut kcp, _) = engine(1);
        kcp.send(Bytes::from_static(b"data")).unwrap();
        let mut now = 1000;
        kcp.update(now).unwrap();
        for _ in 0..50 {
            let next = kcp.check(now);
            assert!(time_diff(next, now) >= 0);
            kcp.update(next).unwrap();
            assert!(time_diff(kcp.check(next), next) > 0, "check stuck at {next}");
            now = next;
        }
    }

    #[test]
    fn check_does_not_mutate() {
        let (mut kcp, _) = engine(1);
        kcp.update(0).unwrap();
        // far jump: check must not reset the schedule itself
        assert_eq!(kcp.check(50_000), 50_000);
        assert_eq!(kcp.check(50), 100);
    }

    #[test]
    fn update_respects_interval() {
        let (mut kcp, out) = engine(1);
        kcp.update(0).unwrap();
        kcp.send(Bytes::from_static(b"x")).unwrap();
        kcp.update(50).unwrap();
        assert!(out.is_empty(), "flushed before the interval elapsed");
        kcp.update(100).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn window_probe_gets_window_tell() {
        let (mut kcp, out) = engine(9);
        let mut probe = BytesMut::new();
        Segment::new(9, Command::WindowProbe, Bytes::new()).encode(&mut probe);
        kcp.input(probe.freeze()).unwrap();
        kcp.flush().unwrap();

        let packets = out.drain();
        assert_eq!(packets.len(), 1);
        let mut buf = packets[0].clone();
        let header = SegmentHeader::decode(&mut buf).unwrap();
        assert_eq!(header.command(), Some(Command::WindowTell));
        assert_eq!(header.wnd, 128);
    }

    #[test]
    fn zero_remote_window_starts_probing() {
        let (mut kcp, out) = engine(9);
        let mut tell = BytesMut::new();
        Segment::new(9, Command::WindowTell, Bytes::new()).encode(&mut tell);
        kcp.input(tell.freeze()).unwrap();
        assert_eq!(kcp.remote_window(), 0);

        kcp.send(Bytes::from_static(b"blocked")).unwrap();
        kcp.update(0).unwrap();
        assert_eq!(kcp.inflight_count(), 0);
        assert!(out.drain().is_empty());

        kcp.update(constants::IKCP_PROBE_INIT).unwrap();
        let packets = out.drain();
        assert_eq!(packets.len(), 1);
        let mut buf = packets[0].clone();
        let header = SegmentHeader::decode(&mut buf).unwrap();
        assert_eq!(header.command(), Some(Command::WindowProbe));
    }

    #[test]
    fn stale_ack_timestamps_are_tolerated() {
        let (mut kcp, _) = engine(4);
        kcp.update(0x7fff_0000).unwrap();

        for ts in [1, 2] {
            let mut ack = BytesMut::new();
            Segment::ack(4, 0, ts).encode(&mut ack);
            kcp.input(ack.freeze()).unwrap();
        }
        assert_eq!(kcp.rto(), constants::IKCP_RTO_MAX);
    }

    #[test]
    fn transmit_failure_is_recorded_and_retried() {
        let fail = Arc::new(Mutex::new(true));
        let sent = Arc::new(Mutex::new(0usize));
        let output = {
            let fail = fail.clone();
            let sent = sent.clone();
            move |_: &[u8]| {
                if *fail.lock().unwrap() {
                    Err(io::Error::new(io::ErrorKind::WouldBlock, "busy"))
                } else {
                    *sent.lock().unwrap() += 1;
                    Ok(())
                }
            }
        };
        let mut kcp = KcpEngine::new(3, KcpCoreConfig::default(), output);
        kcp.send(Bytes::from_static(b"retry me")).unwrap();

        let err = kcp.update(0).unwrap_err();
        assert!(matches!(err, KcpCoreError::Transmit(_)));
        assert_eq!(kcp.last_transmit_error().unwrap().kind, io::ErrorKind::WouldBlock);
        assert_eq!(kcp.inflight_count(), 1);

        *fail.lock().unwrap() = false;
        let mut now = 0;
        while *sent.lock().unwrap() == 0 && now < 10_000 {
            now = kcp.check(now);
            kcp.update(now).unwrap();
        }
        assert_eq!(*sent.lock().unwrap(), 1);
        assert_eq!(kcp.stats().retransmissions, 1);
    }

    #[test]
    fn setters_reject_invalid_values() {
        let (mut kcp, _) = engine(1);
        assert!(matches!(kcp.set_mtu(10), Err(KcpCoreError::InvalidMtu { mtu: 10 })));
        assert_eq!(kcp.mtu(), 1400);
        kcp.set_mtu(576).unwrap();
        assert_eq!(kcp.mss(), 552);

        assert!(kcp.set_window(0, 128).is_err());
        assert!(kcp.set_window(16, 100_000).is_err());
        assert_eq!(kcp.window(), (32, 128));
        kcp.set_window(64, 16).unwrap();
        assert_eq!(kcp.window(), (64, 128));

        kcp.set_nodelay(true, 1, 2, true);
        assert_eq!(kcp.interval(), 10);
        kcp.set_nodelay(false, 9000, 0, false);
        assert_eq!(kcp.interval(), 5000);
    }

    #[test]
    fn log_sink_sees_enabled_categories_only() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let lines = lines.clone();
            move |category: u32, line: &str| lines.lock().unwrap().push((category, line.to_string()))
        };
        let queue = PacketQueue::new();
        let mut kcp = KcpEngine::new(1, KcpCoreConfig::default(), queue)
            .with_log(sink, log_mask::SEND | log_mask::OUT_DATA);

        kcp.send(Bytes::from_static(b"hello")).unwrap();
        kcp.update(0).unwrap();

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].0, log_mask::SEND);
        assert!(lines[1].1.starts_with("output psh: sn=0"));
    }
}
