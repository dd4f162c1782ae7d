//! KCP wire format: segment header, commands, constants and sequence arithmetic

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// KCP protocol constants
pub mod constants {
    pub const IKCP_RTO_NDL: u32 = 30; // no delay min rto
    pub const IKCP_RTO_MIN: u32 = 100; // normal min rto
    pub const IKCP_RTO_DEF: u32 = 200; // default rto
    pub const IKCP_RTO_MAX: u32 = 60000; // max rto
    pub const IKCP_ASK_SEND: u32 = 1; // need to send WINDOW_PROBE
    pub const IKCP_ASK_TELL: u32 = 2; // need to send WINDOW_TELL
    pub const IKCP_WND_SND: u32 = 32; // default send window
    pub const IKCP_WND_RCV: u32 = 128; // default (and minimum) receive window
    pub const IKCP_MTU_DEF: u32 = 1400; // default mtu
    pub const IKCP_MTU_MIN: u32 = 50; // smallest accepted mtu
    pub const IKCP_MTU_MAX: u32 = 65535; // largest accepted mtu
    pub const IKCP_INTERVAL: u32 = 100; // default update interval
    pub const IKCP_INTERVAL_MIN: u32 = 10;
    pub const IKCP_INTERVAL_MAX: u32 = 5000;
    pub const IKCP_OVERHEAD: u32 = 24; // kcp header overhead
    pub const IKCP_DEADLINK: u32 = 20; // max dead link count
    pub const IKCP_THRESH_INIT: u32 = 2; // initial slow start threshold
    pub const IKCP_THRESH_MIN: u32 = 2; // min slow start threshold
    pub const IKCP_PROBE_INIT: u32 = 7000; // 7 secs to probe window size
    pub const IKCP_PROBE_LIMIT: u32 = 120000; // up to 120 secs to probe window
    pub const IKCP_FASTACK_LIMIT: u32 = 5; // max times to trigger fastack
    pub const IKCP_MAX_FRAGMENTS: usize = 255; // frg is a single byte
    pub const IKCP_CLOCK_JUMP: i32 = 10000; // schedule reset threshold
}

/// Conversation ID type
pub type ConvId = u32;

/// Sequence number type
pub type SeqNum = u32;

/// Timestamp type (milliseconds, wrapping)
pub type Timestamp = u32;

/// Segment command carried in the `cmd` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Data fragment
    Push = 81,
    /// Selective acknowledgment of one sequence number
    Ack = 82,
    /// Ask the peer for its receive window
    WindowProbe = 83,
    /// Tell the peer our receive window
    WindowTell = 84,
}

impl Command {
    pub fn from_u8(cmd: u8) -> Option<Self> {
        match cmd {
            81 => Some(Self::Push),
            82 => Some(Self::Ack),
            83 => Some(Self::WindowProbe),
            84 => Some(Self::WindowTell),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Push => "PUSH",
            Self::Ack => "ACK",
            Self::WindowProbe => "WASK",
            Self::WindowTell => "WINS",
        }
    }
}

/// KCP segment header, 24 bytes little-endian on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHeader {
    pub conv: ConvId,
    pub cmd: u8,
    pub frg: u8,
    pub wnd: u16,
    pub ts: Timestamp,
    pub sn: SeqNum,
    pub una: SeqNum,
    pub len: u32,
}

impl SegmentHeader {
    /// Size of KCP header in bytes
    pub const SIZE: usize = constants::IKCP_OVERHEAD as usize;

    pub fn new(conv: ConvId, cmd: Command) -> Self {
        Self {
            conv,
            cmd: cmd as u8,
            frg: 0,
            wnd: 0,
            ts: 0,
            sn: 0,
            una: 0,
            len: 0,
        }
    }

    /// Encode header into buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.conv);
        buf.put_u8(self.cmd);
        buf.put_u8(self.frg);
        buf.put_u16_le(self.wnd);
        buf.put_u32_le(self.ts);
        buf.put_u32_le(self.sn);
        buf.put_u32_le(self.una);
        buf.put_u32_le(self.len);
    }

    /// Decode header from the front of `buf`, advancing it.
    pub fn decode(buf: &mut Bytes) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }

        Some(Self {
            conv: buf.get_u32_le(),
            cmd: buf.get_u8(),
            frg: buf.get_u8(),
            wnd: buf.get_u16_le(),
            ts: buf.get_u32_le(),
            sn: buf.get_u32_le(),
            una: buf.get_u32_le(),
            len: buf.get_u32_le(),
        })
    }

    pub fn command(&self) -> Option<Command> {
        Command::from_u8(self.cmd)
    }

    /// Get command type as string for debugging
    pub fn cmd_str(&self) -> &'static str {
        self.command().map_or("UNKNOWN", Command::as_str)
    }
}

/// One protocol unit plus the sender-side retransmission bookkeeping.
#[derive(Debug, Clone)]
pub struct Segment {
    pub header: SegmentHeader,
    pub data: Bytes,

    /// Deadline after which the segment is retransmitted
    pub resendts: Timestamp,
    /// Timestamp of the first transmission
    pub first_ts: Timestamp,
    /// Current retransmission timeout for this segment
    pub rto: u32,
    /// Times a later sequence number was acknowledged ahead of this one
    pub fastack: u32,
    /// Transmit count
    pub xmit: u32,
}

impl Segment {
    pub fn new(conv: ConvId, cmd: Command, data: Bytes) -> Self {
        let mut header = SegmentHeader::new(conv, cmd);
        header.len = data.len() as u32;

        Self {
            header,
            data,
            resendts: 0,
            first_ts: 0,
            rto: constants::IKCP_RTO_DEF,
            fastack: 0,
            xmit: 0,
        }
    }

    /// Create PUSH segment carrying one fragment
    pub fn push(conv: ConvId, frg: u8, data: Bytes) -> Self {
        let mut seg = Self::new(conv, Command::Push, data);
        seg.header.frg = frg;
        seg
    }

    /// Create ACK segment echoing the timestamp of the acknowledged segment
    pub fn ack(conv: ConvId, sn: SeqNum, ts: Timestamp) -> Self {
        let mut seg = Self::new(conv, Command::Ack, Bytes::new());
        seg.header.sn = sn;
        seg.header.ts = ts;
        seg
    }

    /// Encode segment into buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        buf.extend_from_slice(&self.data);
    }

    /// Build a received segment from a decoded header and its payload.
    pub fn from_wire(header: SegmentHeader, data: Bytes) -> Self {
        Self {
            header,
            data,
            resendts: 0,
            first_ts: 0,
            rto: constants::IKCP_RTO_DEF,
            fastack: 0,
            xmit: 0,
        }
    }

    /// Get total encoded size
    pub fn size(&self) -> usize {
        SegmentHeader::SIZE + self.data.len()
    }

    pub fn sn(&self) -> SeqNum {
        self.header.sn
    }
}

/// Result of splitting the front segment off a raw packet.
#[derive(Debug)]
pub enum Decoded {
    /// A well-formed segment
    Segment(Segment),
    /// Fewer bytes than a header, or a payload running past the packet end.
    /// Nothing after this point can be framed.
    Truncated { remaining: usize, declared: usize },
}

/// Split the next segment off the front of `buf`.
///
/// Returns `None` once the buffer is exhausted.
pub fn decode_next(buf: &mut Bytes) -> Option<Decoded> {
    if buf.is_empty() {
        return None;
    }
    let remaining = buf.len();
    if remaining < SegmentHeader::SIZE {
        buf.clear();
        return Some(Decoded::Truncated {
            remaining,
            declared: 0,
        });
    }

    let mut cursor = buf.clone();
    let header = SegmentHeader::decode(&mut cursor)?;
    let declared = header.len as usize;
    if cursor.len() < declared {
        buf.clear();
        return Some(Decoded::Truncated {
            remaining,
            declared,
        });
    }

    let data = cursor.split_to(declared);
    *buf = cursor;
    Some(Decoded::Segment(Segment::from_wire(header, data)))
}

/// Statistics for one KCP engine
#[derive(Debug, Default, Clone, Copy)]
pub struct KcpStats {
    /// Total application bytes submitted
    pub bytes_sent: u64,
    /// Total application bytes delivered
    pub bytes_received: u64,
    /// Total packets handed to the output
    pub packets_sent: u64,
    /// Total packets fed into input
    pub packets_received: u64,
    /// Timeout retransmissions
    pub retransmissions: u64,
    /// Fast retransmissions
    pub fast_retransmissions: u64,
    /// Sub-segments dropped while decoding
    pub decode_errors: u64,
    /// Output failures
    pub transmit_failures: u64,
    /// Current smoothed RTT in milliseconds
    pub rtt: u32,
    /// RTT variance
    pub rtt_var: u32,
    /// Current RTO
    pub rto: u32,
    /// Send window size
    pub snd_wnd: u32,
    /// Receive window size
    pub rcv_wnd: u32,
    /// Remote advertised window
    pub rmt_wnd: u32,
    /// Congestion window size
    pub cwnd: u32,
    /// Segments in the send window
    pub snd_buf_size: u32,
    /// Segments in the receive buffer
    pub rcv_buf_size: u32,
}

/// Calculate time difference handling wrapping
#[inline]
pub fn time_diff(later: Timestamp, earlier: Timestamp) -> i32 {
    later.wrapping_sub(earlier) as i32
}

/// Check if a sequence number is before another (handling wrapping)
#[inline]
pub fn seq_before(seq1: SeqNum, seq2: SeqNum) -> bool {
    (seq1.wrapping_sub(seq2) as i32) < 0
}

/// Check if a sequence number is after another (handling wrapping)
#[inline]
pub fn seq_after(seq1: SeqNum, seq2: SeqNum) -> bool {
    (seq1.wrapping_sub(seq2) as i32) > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> SegmentHeader {
        SegmentHeader {
            conv: 0x0102_0304,
            cmd: Command::Push as u8,
            frg: 3,
            wnd: 0x0506,
            ts: 0x0708_090a,
            sn: 0x0b0c_0d0e,
            una: 0x0f10_1112,
            len: 2,
        }
    }

    #[test]
    fn header_layout_is_little_endian() {
        let mut buf = BytesMut::new();
        sample_header().encode(&mut buf);
        assert_eq!(buf.len(), SegmentHeader::SIZE);
        assert_eq!(&buf[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(buf[4], 81);
        assert_eq!(buf[5], 3);
        assert_eq!(&buf[6..8], &[0x06, 0x05]);
        assert_eq!(&buf[20..24], &[2, 0, 0, 0]);
    }

    #[test]
    fn decode_walks_packed_segments() {
        let mut buf = BytesMut::new();
        let mut first = Segment::push(7, 1, Bytes::from_static(b"ab"));
        first.header.sn = 10;
        first.encode(&mut buf);
        Segment::ack(7, 4, 99).encode(&mut buf);

        let mut packet = buf.freeze();
        let Some(Decoded::Segment(a)) = decode_next(&mut packet) else {
            panic!("expected first segment");
        };
        assert_eq!(a.sn(), 10);
        assert_eq!(a.header.frg, 1);
        assert_eq!(&a.data[..], b"ab");

        let Some(Decoded::Segment(b)) = decode_next(&mut packet) else {
            panic!("expected second segment");
        };
        assert_eq!(b.header.command(), Some(Command::Ack));
        assert_eq!(b.header.ts, 99);
        assert!(decode_next(&mut packet).is_none());
    }

    #[test]
    fn decode_reports_overlong_payload() {
        let mut header = sample_header();
        header.len = 100;
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        buf.extend_from_slice(b"short");

        let mut packet = buf.freeze();
        match decode_next(&mut packet) {
            Some(Decoded::Truncated { declared, .. }) => assert_eq!(declared, 100),
            other => panic!("unexpected {other:?}"),
        }
        assert!(packet.is_empty());
    }

    #[test]
    fn decode_reports_short_tail() {
        let mut packet = Bytes::from_static(&[1, 2, 3]);
        assert!(matches!(
            decode_next(&mut packet),
            Some(Decoded::Truncated { remaining: 3, .. })
        ));
    }

    #[test]
    fn sequence_comparison_wraps() {
        assert!(seq_before(u32::MAX, 0));
        assert!(seq_after(1, u32::MAX));
        assert_eq!(time_diff(5, u32::MAX - 4), 10);
    }
}
