//! Lock-free pool of receive buffers for pollers

use bytes::BytesMut;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::LazyLock;

/// Bounded lock-free pool of equally sized buffers using crossbeam-queue
pub struct BufferPool {
    pool: crossbeam_queue::ArrayQueue<BytesMut>,
    buffer_size: usize,
    hits: AtomicUsize,
}

impl BufferPool {
    /// Create a pool holding up to `max_size` buffers of `buffer_size` bytes
    pub fn new(max_size: usize, buffer_size: usize) -> Self {
        Self {
            pool: crossbeam_queue::ArrayQueue::new(max_size),
            buffer_size,
            hits: AtomicUsize::new(0),
        }
    }

    /// Take a zero-filled buffer of exactly `len` bytes.
    ///
    /// Reuses a pooled buffer when `len` fits the pool's buffer size.
    pub fn acquire(&self, len: usize) -> BytesMut {
        let mut buf = if len <= self.buffer_size {
            match self.pool.pop() {
                Some(buf) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    buf
                }
                None => BytesMut::with_capacity(self.buffer_size),
            }
        } else {
            BytesMut::with_capacity(len)
        };
        buf.clear();
        buf.resize(len, 0);
        buf
    }

    /// Give a buffer back. Buffers of the wrong size or beyond the pool's
    /// capacity are dropped.
    pub fn release(&self, mut buf: BytesMut) {
        if buf.capacity() >= self.buffer_size && buf.capacity() <= self.buffer_size * 2 {
            buf.clear();
            let _ = self.pool.push(buf);
        }
    }

    /// Pool statistics (hits, current_size)
    pub fn stats(&self) -> (usize, usize) {
        (self.hits.load(Ordering::Relaxed), self.pool.len())
    }
}

// Receive buffers are sized for the largest datagram a poller accepts; the
// default 8192 covers every MTU up to the common jumbo-frame limit.
static DATAGRAM_POOL: LazyLock<BufferPool> = LazyLock::new(|| BufferPool::new(256, 8192));
static JUMBO_POOL: LazyLock<BufferPool> = LazyLock::new(|| BufferPool::new(16, 65536));

/// Take a zero-filled receive buffer of `len` bytes from the global pools
pub fn acquire_datagram_buffer(len: usize) -> BytesMut {
    if len <= 8192 {
        DATAGRAM_POOL.acquire(len)
    } else {
        JUMBO_POOL.acquire(len)
    }
}

/// Return a receive buffer to the global pools
pub fn release_datagram_buffer(buf: BytesMut) {
    if buf.capacity() <= 16384 {
        DATAGRAM_POOL.release(buf);
    } else {
        JUMBO_POOL.release(buf);
    }
}

/// Global pool statistics for monitoring
pub fn buffer_pool_stats() -> Vec<(&'static str, usize, usize)> {
    let (datagram_hits, datagram_size) = DATAGRAM_POOL.stats();
    let (jumbo_hits, jumbo_size) = JUMBO_POOL.stats();
    vec![
        ("datagram", datagram_hits, datagram_size),
        ("jumbo", jumbo_hits, jumbo_size),
    ]
}
