//! Configuration types for KCP.
//!
//! [`KcpConfig`] extends the core [`NodeDelayConfig`] with the poll
//! adapter's socket settings (receive buffer size, drain bound, default
//! wait).

use crate::error::{KcpError, Result};
use kcp_core::protocol::constants;
use std::time::Duration;

// Re-export from kcp-core so users see a single NodeDelayConfig type.
pub use kcp_core::config::NodeDelayConfig;

// ── KcpConfig ───────────────────────────────────────────────────────────

/// Full KCP configuration: protocol settings plus adapter settings.
#[derive(Debug, Clone)]
pub struct KcpConfig {
    // Protocol settings (forwarded to the kcp-core engine)
    pub mtu: u32,
    pub snd_wnd: u32,
    pub rcv_wnd: u32,
    pub nodelay: NodeDelayConfig,
    pub dead_link: u32,

    // Adapter settings (used only by the poller)
    /// Size of the buffer each datagram is received into
    pub recv_buffer_size: usize,
    /// Datagrams drained per readiness wake-up before the engine is updated
    pub max_drain_datagrams: usize,
    /// Wait bound used by `poll_read` when the caller passes none;
    /// `None` waits indefinitely
    pub default_max_wait: Option<Duration>,
}

impl Default for KcpConfig {
    fn default() -> Self {
        Self {
            mtu: constants::IKCP_MTU_DEF,
            snd_wnd: constants::IKCP_WND_SND,
            rcv_wnd: constants::IKCP_WND_RCV,
            nodelay: NodeDelayConfig::normal(),
            dead_link: constants::IKCP_DEADLINK,
            recv_buffer_size: 8192,
            max_drain_datagrams: 1024,
            default_max_wait: None,
        }
    }
}

/// Extracts the protocol-only fields that `KcpEngine` reads.
impl From<KcpConfig> for kcp_core::KcpCoreConfig {
    fn from(c: KcpConfig) -> Self {
        Self {
            mtu: c.mtu,
            snd_wnd: c.snd_wnd,
            rcv_wnd: c.rcv_wnd,
            nodelay: c.nodelay,
            dead_link: c.dead_link,
        }
    }
}

// ── Builder methods ─────────────────────────────────────────────────────

impl KcpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Protocol tuning --

    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn send_window(mut self, wnd: u32) -> Self {
        self.snd_wnd = wnd;
        self
    }

    pub fn recv_window(mut self, wnd: u32) -> Self {
        self.rcv_wnd = wnd;
        self
    }

    pub fn window_size(mut self, snd_wnd: u32, rcv_wnd: u32) -> Self {
        self.snd_wnd = snd_wnd;
        self.rcv_wnd = rcv_wnd;
        self
    }

    pub fn normal_mode(mut self) -> Self {
        self.nodelay = NodeDelayConfig::normal();
        self
    }

    pub fn fast_mode(mut self) -> Self {
        self.nodelay = NodeDelayConfig::fast();
        self
    }

    pub fn turbo_mode(mut self) -> Self {
        self.nodelay = NodeDelayConfig::turbo();
        self
    }

    pub fn nodelay_config(mut self, config: NodeDelayConfig) -> Self {
        self.nodelay = config;
        self
    }

    pub fn dead_link(mut self, transmissions: u32) -> Self {
        self.dead_link = transmissions;
        self
    }

    // -- Adapter tuning --

    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    pub fn max_drain_datagrams(mut self, count: usize) -> Self {
        self.max_drain_datagrams = count;
        self
    }

    pub fn default_max_wait(mut self, wait: Option<Duration>) -> Self {
        self.default_max_wait = wait;
        self
    }

    // -- Validation --

    pub fn validate(&self) -> Result<()> {
        if !(constants::IKCP_MTU_MIN..=constants::IKCP_MTU_MAX).contains(&self.mtu) {
            return Err(KcpError::config(format!(
                "MTU must be between {} and {}",
                constants::IKCP_MTU_MIN,
                constants::IKCP_MTU_MAX
            )));
        }
        if self.snd_wnd == 0 || self.rcv_wnd == 0 {
            return Err(KcpError::config("Window sizes must be greater than 0"));
        }
        if self.rcv_wnd > u16::MAX as u32 {
            return Err(KcpError::config("Receive window must fit in 16 bits"));
        }
        if self.nodelay.interval == 0 {
            return Err(KcpError::config("Update interval must be greater than 0"));
        }
        if self.dead_link == 0 {
            return Err(KcpError::config("Dead link threshold must be greater than 0"));
        }
        if self.recv_buffer_size < self.mtu as usize {
            return Err(KcpError::config("Receive buffer must hold at least one MTU"));
        }
        if self.max_drain_datagrams == 0 {
            return Err(KcpError::config("Drain bound must be greater than 0"));
        }
        Ok(())
    }
}

// ── Presets ──────────────────────────────────────────────────────────────

impl KcpConfig {
    /// No-delay on, 100 ms interval, no fast resend, congestion control
    /// off: tuned for interactive request/response traffic.
    pub fn interactive() -> Self {
        Self::default().nodelay_config(NodeDelayConfig::custom(true, 100, 0, true))
    }

    pub fn gaming() -> Self {
        Self::default()
            .nodelay_config(NodeDelayConfig::custom(true, 10, 2, true))
            .window_size(64, 128)
            .mtu(1200)
            .default_max_wait(Some(Duration::from_millis(50)))
    }

    pub fn realtime() -> Self {
        Self::default()
            .fast_mode()
            .window_size(64, 128)
            .mtu(1200)
            .default_max_wait(Some(Duration::from_millis(100)))
    }

    pub fn bulk() -> Self {
        Self::default()
            .normal_mode()
            .window_size(256, 256)
            .mtu(1400)
            .recv_buffer_size(16384)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        for config in [
            KcpConfig::default(),
            KcpConfig::interactive(),
            KcpConfig::gaming(),
            KcpConfig::realtime(),
            KcpConfig::bulk(),
        ] {
            config.validate().unwrap();
        }
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(KcpConfig::new().mtu(20).validate().is_err());
        assert!(KcpConfig::new().window_size(0, 128).validate().is_err());
        assert!(KcpConfig::new().recv_window(70_000).validate().is_err());
        assert!(KcpConfig::new().recv_buffer_size(100).validate().is_err());
        assert!(KcpConfig::new().max_drain_datagrams(0).validate().is_err());
        assert!(KcpConfig::new()
            .nodelay_config(NodeDelayConfig::custom(false, 0, 0, false))
            .validate()
            .is_err());
    }

    #[test]
    fn core_config_keeps_protocol_fields() {
        let core: kcp_core::KcpCoreConfig = KcpConfig::gaming().dead_link(7).into();
        assert_eq!(core.mtu, 1200);
        assert_eq!(core.snd_wnd, 64);
        assert_eq!(core.dead_link, 7);
        assert!(core.nodelay.no_congestion_control);
    }
}
