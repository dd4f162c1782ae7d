//! Monotonic millisecond clock in the engine's 32-bit wrapping time base.

use std::sync::LazyLock;
use std::time::Instant;

static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Milliseconds since the first call in this process, truncated to 32 bits.
///
/// Monotonic; wraps after ~49.7 days, which the engine's wrapping
/// comparisons tolerate.
pub fn now_ms() -> u32 {
    (EPOCH.elapsed().as_millis() & 0xffff_ffff) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_does_not_go_backwards() {
        let a = now_ms();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = now_ms();
        assert!(crate::protocol::time_diff(b, a) >= 2);
    }
}
