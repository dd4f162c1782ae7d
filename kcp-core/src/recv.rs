//! Receive side: out-of-order buffer, in-order queue, reassembly and the
//! pending acknowledgment list.

use crate::protocol::*;

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;

/// How an incoming PUSH segment was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    /// New data, buffered (and possibly promoted)
    Accepted,
    /// Already delivered or already buffered; acknowledged again
    Duplicate,
    /// Beyond the receive window; dropped without an ack
    OutOfWindow,
}

#[derive(Debug)]
pub(crate) struct ReceivePath {
    /// Segments ahead of `rcv_nxt`, ordered by sequence number
    buffer: VecDeque<Segment>,
    /// Contiguous, in-order segments ready for reassembly
    queue: VecDeque<Segment>,
    rcv_nxt: SeqNum,
    rcv_wnd: u32,
    acks: Vec<(SeqNum, Timestamp)>,
}

impl ReceivePath {
    pub fn new(rcv_wnd: u32) -> Self {
        Self {
            buffer: VecDeque::new(),
            queue: VecDeque::new(),
            rcv_nxt: 0,
            rcv_wnd,
            acks: Vec::new(),
        }
    }

    pub fn accept_push(&mut self, segment: Segment) -> PushOutcome {
        let sn = segment.sn();
        if !seq_before(sn, self.rcv_nxt.wrapping_add(self.rcv_wnd)) {
            return PushOutcome::OutOfWindow;
        }

        // Duplicates are acknowledged too so the sender can prune them.
        self.acks.push((sn, segment.header.ts));

        if seq_before(sn, self.rcv_nxt) {
            return PushOutcome::Duplicate;
        }

        let mut insert_at = self.buffer.len();
        for (i, buffered) in self.buffer.iter().enumerate().rev() {
            if buffered.sn() == sn {
                return PushOutcome::Duplicate;
            }
            if seq_before(sn, buffered.sn()) {
                insert_at = i;
            } else {
                break;
            }
        }
        self.buffer.insert(insert_at, segment);
        self.promote();
        PushOutcome::Accepted
    }

    /// Move contiguous segments from the buffer into the queue.
    ///
    /// Stops at the receive window unless the queue does not yet hold a
    /// complete message, so a message with more fragments than the window
    /// still completes.
    fn promote(&mut self) {
        while let Some(segment) = self.buffer.front() {
            if segment.sn() != self.rcv_nxt {
                break;
            }
            if self.queue.len() >= self.rcv_wnd as usize && self.peek_size().is_some() {
                break;
            }
            if let Some(segment) = self.buffer.pop_front() {
                self.queue.push_back(segment);
                self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            }
        }
    }

    /// Size of the message at the head of the queue, if all of its fragments
    /// are present.
    pub fn peek_size(&self) -> Option<usize> {
        let head = self.queue.front()?;
        if head.header.frg == 0 {
            return Some(head.data.len());
        }
        if self.queue.len() < head.header.frg as usize + 1 {
            return None;
        }

        let mut length = 0;
        for segment in &self.queue {
            length += segment.data.len();
            if segment.header.frg == 0 {
                break;
            }
        }
        Some(length)
    }

    /// Remove and reassemble the head message.
    ///
    /// The flag is true when the read reopened a receive window that was
    /// full, meaning the peer should be told.
    pub fn read(&mut self) -> Option<(Bytes, bool)> {
        let size = self.peek_size()?;
        let was_full = self.queue.len() >= self.rcv_wnd as usize;

        let single = self.queue.front().is_some_and(|head| head.header.frg == 0);
        let data = if single {
            self.queue.pop_front().map(|segment| segment.data)?
        } else {
            let mut data = BytesMut::with_capacity(size);
            while let Some(segment) = self.queue.pop_front() {
                data.extend_from_slice(&segment.data);
                if segment.header.frg == 0 {
                    break;
                }
            }
            data.freeze()
        };

        self.promote();
        let reopened = was_full && self.queue.len() < self.rcv_wnd as usize;
        Some((data, reopened))
    }

    pub fn take_acks(&mut self) -> Vec<(SeqNum, Timestamp)> {
        std::mem::take(&mut self.acks)
    }

    pub fn pending_acks(&self) -> usize {
        self.acks.len()
    }

    /// Free receive-queue slots advertised to the peer.
    ///
    /// A full queue that holds only part of one message still advertises
    /// room for the rest of that message.
    pub fn wnd_unused(&self) -> u32 {
        let queued = self.queue.len() as u32;
        if queued < self.rcv_wnd {
            return self.rcv_wnd - queued;
        }
        match self.queue.front() {
            Some(head) if self.peek_size().is_none() => {
                (head.header.frg as u32 + 1).saturating_sub(queued)
            }
            _ => 0,
        }
    }

    pub fn rcv_nxt(&self) -> SeqNum {
        self.rcv_nxt
    }

    pub fn rcv_wnd(&self) -> u32 {
        self.rcv_wnd
    }

    pub fn set_rcv_wnd(&mut self, rcv_wnd: u32) {
        self.rcv_wnd = rcv_wnd;
        self.promote();
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}
