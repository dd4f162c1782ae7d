//! Send side: fragmentation, the unsent queue, and the in-flight window with
//! its retransmission bookkeeping.

use crate::error::{KcpCoreError, KcpCoreResult};
use crate::protocol::*;
use crate::timing::RttEstimator;

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;

/// Retransmission knobs read from the engine's delay configuration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetransmitPolicy {
    pub nodelay: bool,
    /// Fast-ack count that triggers a fast retransmit, `u32::MAX` when off
    pub resend: u32,
    pub congestion_disabled: bool,
    pub dead_link: u32,
}

/// What one pass over the send window decided.
#[derive(Debug, Default)]
pub(crate) struct TransmitPlan {
    /// Window positions to put on the wire, in sequence order
    pub due: Vec<usize>,
    pub timeouts: u32,
    pub fast_resends: u32,
    pub dead_link: bool,
}

impl TransmitPlan {
    pub fn lost(&self) -> bool {
        self.timeouts > 0
    }
}

#[derive(Debug)]
pub(crate) struct SendPath {
    conv: ConvId,
    queue: VecDeque<Segment>,
    /// Transmitted, unacknowledged segments ordered by sequence number
    window: VecDeque<Segment>,
    snd_una: SeqNum,
    snd_nxt: SeqNum,
    /// The last promoted fragment was not the end of its message
    partial_head: bool,
}

impl SendPath {
    pub fn new(conv: ConvId) -> Self {
        Self {
            conv,
            queue: VecDeque::new(),
            window: VecDeque::new(),
            snd_una: 0,
            snd_nxt: 0,
            partial_head: false,
        }
    }

    /// Split a message into fragments of at most `mss` bytes and queue them.
    ///
    /// Returns the number of fragments queued.
    pub fn submit(&mut self, data: Bytes, mss: usize) -> KcpCoreResult<usize> {
        if data.is_empty() {
            return Ok(0);
        }

        let count = data.len().div_ceil(mss);
        if count > constants::IKCP_MAX_FRAGMENTS {
            return Err(KcpCoreError::MessageTooLarge {
                len: data.len(),
                fragments: count,
            });
        }

        self.push_fragments(&data, count, mss);
        Ok(count)
    }

    fn push_fragments(&mut self, data: &Bytes, count: usize, mss: usize) {
        let mut offset = 0;
        for i in 0..count {
            let size = mss.min(data.len() - offset);
            let fragment = data.slice(offset..offset + size);
            // frg counts down to 0 on the last fragment
            self.queue
                .push_back(Segment::push(self.conv, (count - i - 1) as u8, fragment));
            offset += size;
        }
    }

    /// Split queued messages again for a smaller `mss`.
    ///
    /// The rest of a message whose first fragments are already in the window
    /// keeps its numbering, and so does a message that would need more than
    /// 255 fragments at the new size.
    pub fn refragment(&mut self, mss: usize) {
        let mut old = std::mem::take(&mut self.queue).into_iter();

        if self.partial_head {
            for segment in old.by_ref() {
                let last = segment.header.frg == 0;
                self.queue.push_back(segment);
                if last {
                    break;
                }
            }
        }

        let mut message: Vec<Segment> = Vec::new();
        for segment in old {
            let last = segment.header.frg == 0;
            message.push(segment);
            if !last {
                continue;
            }

            let len: usize = message.iter().map(|s| s.data.len()).sum();
            let count = len.div_ceil(mss);
            if message.iter().all(|s| s.data.len() <= mss) || count > constants::IKCP_MAX_FRAGMENTS {
                self.queue.extend(message.drain(..));
                continue;
            }

            let mut joined = BytesMut::with_capacity(len);
            for fragment in message.drain(..) {
                joined.extend_from_slice(&fragment.data);
            }
            self.push_fragments(&joined.freeze(), count, mss);
        }
        self.queue.extend(message);
    }

    /// Move queued segments into the window while it has room for `limit`
    /// segments in flight. Returns how many were promoted.
    pub fn promote(&mut self, now: Timestamp, limit: u32, rto: u32) -> usize {
        let mut promoted = 0;
        while seq_before(self.snd_nxt, self.snd_una.wrapping_add(limit)) {
            let Some(mut segment) = self.queue.pop_front() else {
                break;
            };
            segment.header.conv = self.conv;
            segment.header.cmd = Command::Push as u8;
            segment.header.ts = now;
            segment.header.sn = self.snd_nxt;
            segment.first_ts = now;
            segment.resendts = now.wrapping_add(rto);
            segment.rto = rto;
            segment.fastack = 0;
            segment.xmit = 0;

            self.partial_head = segment.header.frg != 0;
            self.window.push_back(segment);
            self.snd_nxt = self.snd_nxt.wrapping_add(1);
            promoted += 1;
        }
        promoted
    }

    /// Decide which window entries go on the wire at `now`, updating their
    /// transmit counters and deadlines.
    pub fn plan_transmit(
        &mut self,
        now: Timestamp,
        rtt: &RttEstimator,
        policy: RetransmitPolicy,
    ) -> TransmitPlan {
        let rtomin = if policy.nodelay { 0 } else { rtt.rto() >> 3 };
        let mut plan = TransmitPlan::default();

        for (idx, segment) in self.window.iter_mut().enumerate() {
            let mut needsend = false;

            if segment.xmit == 0 {
                needsend = true;
                segment.xmit = 1;
                segment.rto = rtt.rto();
                segment.resendts = now.wrapping_add(segment.rto).wrapping_add(rtomin);
            } else if time_diff(now, segment.resendts) >= 0 {
                needsend = true;
                segment.xmit += 1;
                segment.rto = rtt.backoff(segment.rto, policy.nodelay, policy.congestion_disabled);
                segment.resendts = now.wrapping_add(segment.rto);
                plan.timeouts += 1;
            } else if segment.fastack >= policy.resend
                && segment.xmit <= constants::IKCP_FASTACK_LIMIT
            {
                needsend = true;
                segment.xmit += 1;
                segment.fastack = 0;
                segment.resendts = now.wrapping_add(segment.rto);
                plan.fast_resends += 1;
            }

            if needsend {
                plan.due.push(idx);
                if segment.xmit >= policy.dead_link {
                    plan.dead_link = true;
                }
            }
        }

        plan
    }

    /// Drop every window entry below the peer's cumulative ack.
    pub fn parse_una(&mut self, una: SeqNum) {
        while let Some(segment) = self.window.front() {
            if seq_before(segment.sn(), una) {
                self.window.pop_front();
            } else {
                break;
            }
        }
        self.shrink();
    }

    /// Remove the entry a selective ack confirms, returning it.
    pub fn parse_ack(&mut self, sn: SeqNum) -> Option<Segment> {
        if seq_before(sn, self.snd_una) || !seq_before(sn, self.snd_nxt) {
            return None;
        }

        let removed = self
            .window
            .binary_search_by(|seg| time_diff(seg.sn(), sn).cmp(&0))
            .ok()
            .and_then(|pos| self.window.remove(pos));
        self.shrink();
        removed
    }

    /// Count one skip for every entry below the highest sequence number
    /// acknowledged in a packet.
    pub fn parse_fastack(&mut self, max_ack: SeqNum) {
        if seq_before(max_ack, self.snd_una) || !seq_before(max_ack, self.snd_nxt) {
            return;
        }

        for segment in &mut self.window {
            if seq_before(max_ack, segment.sn()) {
                break;
            } else if segment.sn() != max_ack {
                segment.fastack += 1;
            }
        }
    }

    fn shrink(&mut self) {
        self.snd_una = self
            .window
            .front()
            .map_or(self.snd_nxt, |segment| segment.sn());
    }

    /// Earliest retransmission deadline relative to `now`; `<= 0` means due.
    pub fn earliest_deadline(&self, now: Timestamp) -> Option<i32> {
        self.window
            .iter()
            .map(|segment| time_diff(segment.resendts, now))
            .min()
    }

    pub fn window_mut(&mut self) -> &mut VecDeque<Segment> {
        &mut self.window
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn in_window(&self) -> usize {
        self.window.len()
    }

    pub fn inflight(&self) -> u32 {
        self.snd_nxt.wrapping_sub(self.snd_una)
    }

    pub fn snd_una(&self) -> SeqNum {
        self.snd_una
    }

    pub fn snd_nxt(&self) -> SeqNum {
        self.snd_nxt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetransmitPolicy {
        RetransmitPolicy {
            nodelay: false,
            resend: 2,
            congestion_disabled: false,
            dead_link: constants::IKCP_DEADLINK,
        }
    }

    #[test]
    fn submit_fragments_count_down() {
        let mut send = SendPath::new(1);
        let n = send.submit(Bytes::from(vec![7u8; 25]), 10).unwrap();
        assert_eq!(n, 3);
        let frgs: Vec<u8> = send.queue.iter().map(|s| s.header.frg).collect();
        assert_eq!(frgs, vec![2, 1, 0]);
        let lens: Vec<usize> = send.queue.iter().map(|s| s.data.len()).collect();
        assert_eq!(lens, vec![10, 10, 5]);
    }

    #[test]
    fn submit_rejects_too_many_fragments() {
        let mut send = SendPath::new(1);
        assert!(send.submit(Bytes::from(vec![0u8; 255 * 4]), 4).is_ok());
        let err = send.submit(Bytes::from(vec![0u8; 255 * 4 + 1]), 4).unwrap_err();
        assert!(matches!(err, KcpCoreError::MessageTooLarge { fragments: 256, .. }));
    }

    #[test]
    fn refragment_keeps_a_started_message_intact() {
        let mut send = SendPath::new(1);
        send.submit(Bytes::from(vec![1u8; 25]), 10).unwrap();
        send.submit(Bytes::from(vec![2u8; 25]), 10).unwrap();
        send.submit(Bytes::from(vec![3u8; 4]), 10).unwrap();
        assert_eq!(send.promote(0, 1, 200), 1);

        send.refragment(5);

        let frgs: Vec<u8> = send.queue.iter().map(|s| s.header.frg).collect();
        assert_eq!(frgs, vec![1, 0, 4, 3, 2, 1, 0, 0]);
        let lens: Vec<usize> = send.queue.iter().map(|s| s.data.len()).collect();
        assert_eq!(lens, vec![10, 5, 5, 5, 5, 5, 5, 4]);
        assert!(send.queue.iter().skip(2).take(5).all(|s| s.data[..] == [2u8; 5]));
    }

    #[test]
    fn refragment_leaves_oversized_results_alone() {
        let mut send = SendPath::new(1);
        send.submit(Bytes::from(vec![0u8; 255 * 4]), 4).unwrap();
        send.refragment(2);
        assert_eq!(send.queued(), 255);
        assert!(send.queue.iter().all(|s| s.data.len() == 4));
    }

    #[test]
    fn promote_respects_limit() {
        let mut send = SendPath::new(1);
        for _ in 0..10 {
            send.submit(Bytes::from_static(b"x"), 100).unwrap();
        }
        assert_eq!(send.promote(0, 4, 200), 4);
        assert_eq!(send.in_window(), 4);
        assert_eq!(send.queued(), 6);
        assert_eq!(send.promote(0, 4, 200), 0);

        send.parse_una(2);
        assert_eq!(send.snd_una(), 2);
        assert_eq!(send.promote(0, 4, 200), 2);
        assert_eq!(send.in_window(), 4);
    }

    #[test]
    fn selective_ack_and_skip_counting() {
        let mut send = SendPath::new(1);
        for _ in 0..4 {
            send.submit(Bytes::from_static(b"x"), 100).unwrap();
        }
        send.promote(0, 32, 200);

        assert!(send.parse_ack(2).is_some());
        assert!(send.parse_ack(2).is_none());
        send.parse_fastack(2);
        let skips: Vec<(u32, u32)> = send.window.iter().map(|s| (s.sn(), s.fastack)).collect();
        assert_eq!(skips, vec![(0, 1), (1, 1), (3, 0)]);

        send.parse_ack(0);
        assert_eq!(send.snd_una(), 1);
    }

    #[test]
    fn timeout_and_fast_resend_planning() {
        let rtt = RttEstimator::new(constants::IKCP_RTO_MIN);
        let mut send = SendPath::new(1);
        for _ in 0..3 {
            send.submit(Bytes::from_static(b"x"), 100).unwrap();
        }
        send.promote(0, 32, rtt.rto());

        let first = send.plan_transmit(0, &rtt, policy());
        assert_eq!(first.due, vec![0, 1, 2]);

        // nothing due until the deadline
        assert!(send.plan_transmit(10, &rtt, policy()).due.is_empty());

        send.window[1].fastack = 2;
        let fast = send.plan_transmit(20, &rtt, policy());
        assert_eq!(fast.due, vec![1]);
        assert_eq!(fast.fast_resends, 1);
        assert!(!fast.lost());

        let deadline = send.window[0].resendts;
        let timeout = send.plan_transmit(deadline, &rtt, policy());
        assert!(timeout.due.contains(&0));
        assert!(timeout.lost());
        assert_eq!(send.window[0].rto, 400);
    }
}
