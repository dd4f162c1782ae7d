//! Configuration types for the KCP core protocol engine

use crate::protocol::constants;

/// Node delay configuration for different performance modes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDelayConfig {
    /// Enable no-delay mode (lower minimum RTO, gentler backoff)
    pub nodelay: bool,
    /// Internal update interval in milliseconds
    pub interval: u32,
    /// Fast resend threshold, 0 disables fast retransmit
    pub resend: u32,
    /// Disable congestion control
    pub no_congestion_control: bool,
}

impl Default for NodeDelayConfig {
    fn default() -> Self {
        Self::normal()
    }
}

impl NodeDelayConfig {
    /// Normal mode - conservative, congestion controlled
    pub fn normal() -> Self {
        Self {
            nodelay: false,
            interval: constants::IKCP_INTERVAL,
            resend: 0,
            no_congestion_control: false,
        }
    }

    /// Fast mode - optimized for low latency
    pub fn fast() -> Self {
        Self {
            nodelay: true,
            interval: 20,
            resend: 2,
            no_congestion_control: false,
        }
    }

    /// Turbo mode - maximum responsiveness, no congestion control
    pub fn turbo() -> Self {
        Self {
            nodelay: true,
            interval: 10,
            resend: 2,
            no_congestion_control: true,
        }
    }

    /// Custom configuration
    pub fn custom(nodelay: bool, interval: u32, resend: u32, no_congestion_control: bool) -> Self {
        Self {
            nodelay,
            interval,
            resend,
            no_congestion_control,
        }
    }

    /// Interval as the engine will use it.
    pub fn effective_interval(&self) -> u32 {
        self.interval
            .clamp(constants::IKCP_INTERVAL_MIN, constants::IKCP_INTERVAL_MAX)
    }

    /// Minimum RTO implied by the delay mode.
    pub fn min_rto(&self) -> u32 {
        if self.nodelay {
            constants::IKCP_RTO_NDL
        } else {
            constants::IKCP_RTO_MIN
        }
    }
}

/// Protocol-only configuration for the KCP engine.
///
/// Contains only the fields the engine reads, no transport or I/O settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KcpCoreConfig {
    /// Maximum transmission unit
    pub mtu: u32,
    /// Send window size
    pub snd_wnd: u32,
    /// Receive window size
    pub rcv_wnd: u32,
    /// Node delay configuration
    pub nodelay: NodeDelayConfig,
    /// Transmissions of one segment after which the link counts as dead
    pub dead_link: u32,
}

impl Default for KcpCoreConfig {
    fn default() -> Self {
        Self {
            mtu: constants::IKCP_MTU_DEF,
            snd_wnd: constants::IKCP_WND_SND,
            rcv_wnd: constants::IKCP_WND_RCV,
            nodelay: NodeDelayConfig::normal(),
            dead_link: constants::IKCP_DEADLINK,
        }
    }
}
