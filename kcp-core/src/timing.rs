//! RTT estimation, RTO computation and congestion window control.

use crate::protocol::constants;

/// Smoothed RTT state and the derived retransmission timeout.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    srtt: u32,
    rttvar: u32,
    rto: u32,
    min_rto: u32,
}

impl RttEstimator {
    pub fn new(min_rto: u32) -> Self {
        Self {
            srtt: 0,
            rttvar: 0,
            rto: constants::IKCP_RTO_DEF,
            min_rto,
        }
    }

    /// Fold in a fresh RTT sample.
    ///
    /// `interval` floors the variance term: acks can lag by up to one flush
    /// interval on the peer. Samples are capped at the RTO maximum, since the
    /// echoed timestamp is peer input.
    pub fn sample(&mut self, rtt: u32, interval: u32) {
        let rtt = rtt.min(constants::IKCP_RTO_MAX);
        if self.srtt == 0 {
            self.srtt = rtt;
            self.rttvar = rtt / 2;
        } else {
            let delta = rtt.abs_diff(self.srtt);
            self.rttvar = (3 * self.rttvar + delta) / 4;
            self.srtt = (7 * self.srtt + rtt) / 8;
            if self.srtt < 1 {
                self.srtt = 1;
            }
        }

        let rto = self
            .srtt
            .saturating_add(interval.max(self.rttvar.saturating_mul(4)));
        self.rto = rto.clamp(self.min_rto, constants::IKCP_RTO_MAX);
    }

    /// Next RTO for a segment whose retransmission timer just expired.
    ///
    /// Normal mode roughly doubles; no-delay mode grows by half. Never beyond
    /// the RTO maximum.
    pub fn backoff(&self, segment_rto: u32, nodelay: bool, congestion_disabled: bool) -> u32 {
        let next = if nodelay {
            let step = if congestion_disabled { self.rto } else { segment_rto };
            segment_rto.saturating_add(step / 2)
        } else {
            segment_rto.saturating_add(segment_rto.max(self.rto))
        };
        next.min(constants::IKCP_RTO_MAX)
    }

    pub fn rto(&self) -> u32 {
        self.rto
    }

    pub fn srtt(&self) -> u32 {
        self.srtt
    }

    pub fn rttvar(&self) -> u32 {
        self.rttvar
    }

    pub fn min_rto(&self) -> u32 {
        self.min_rto
    }

    pub fn set_min_rto(&mut self, min_rto: u32) {
        self.min_rto = min_rto;
        if self.rto < min_rto {
            self.rto = min_rto;
        }
    }
}

/// Congestion window in segments, with slow start and linear growth.
#[derive(Debug, Clone)]
pub struct CongestionWindow {
    cwnd: u32,
    ssthresh: u32,
    /// Byte accumulator for growth past the slow-start threshold
    incr: u32,
    enabled: bool,
}

impl CongestionWindow {
    pub fn new(mss: u32, enabled: bool) -> Self {
        Self {
            cwnd: 1,
            ssthresh: constants::IKCP_THRESH_INIT,
            incr: mss,
            enabled,
        }
    }

    /// Segments the send window may hold.
    pub fn limit(&self, snd_wnd: u32, rmt_wnd: u32) -> u32 {
        let wnd = snd_wnd.min(rmt_wnd);
        if self.enabled {
            wnd.min(self.cwnd)
        } else {
            wnd
        }
    }

    /// The cumulative ack advanced.
    pub fn on_ack_progress(&mut self, mss: u32, rmt_wnd: u32) {
        if self.cwnd >= rmt_wnd {
            return;
        }
        if self.cwnd < self.ssthresh {
            self.cwnd += 1;
            self.incr += mss;
        } else {
            if self.incr < mss {
                self.incr = mss;
            }
            self.incr += (mss * mss) / self.incr + (mss / 16);
            if (self.cwnd + 1) * mss <= self.incr {
                self.cwnd = if mss > 0 { self.incr.div_ceil(mss) } else { 1 };
            }
        }
        if self.cwnd > rmt_wnd {
            self.cwnd = rmt_wnd;
            self.incr = rmt_wnd * mss;
        }
    }

    /// A fast retransmit happened with `inflight` segments outstanding.
    pub fn on_fast_retransmit(&mut self, inflight: u32, resend: u32, mss: u32) {
        self.ssthresh = (inflight / 2).max(constants::IKCP_THRESH_MIN);
        self.cwnd = self.ssthresh + resend;
        self.incr = self.cwnd * mss;
    }

    /// A retransmission timer expired.
    pub fn on_timeout(&mut self, mss: u32) {
        self.ssthresh = (self.cwnd / 2).max(constants::IKCP_THRESH_MIN);
        self.cwnd = 1;
        self.incr = mss;
    }

    pub fn ensure_floor(&mut self, mss: u32) {
        if self.cwnd < 1 {
            self.cwnd = 1;
            self.incr = mss;
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }
}
