//! Process-wide counters aggregated from KCP sessions

use kcp_core::KcpStats;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Global performance metrics collector
#[derive(Debug, Default)]
pub struct GlobalMetrics {
    /// Total sessions created
    pub sessions_created: AtomicU64,
    /// Sessions currently alive
    pub active_sessions: AtomicUsize,
    /// Total application bytes submitted across all sessions
    pub total_bytes_sent: AtomicU64,
    /// Total application bytes delivered across all sessions
    pub total_bytes_received: AtomicU64,
    /// Total packets sent
    pub total_packets_sent: AtomicU64,
    /// Total packets received
    pub total_packets_received: AtomicU64,
    /// Total timeout and fast retransmissions
    pub total_retransmissions: AtomicU64,
    /// Total datagrams dropped as malformed
    pub total_decode_errors: AtomicU64,
    /// Sessions that hit the dead-link threshold
    pub dead_links: AtomicU64,
}

impl GlobalMetrics {
    /// Record a new session
    pub fn session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session teardown with its final stats
    pub fn session_closed(&self, stats: &KcpStats, dead_link: bool) {
        self.update_from_stats(stats);
        if dead_link {
            self.dead_links.fetch_add(1, Ordering::Relaxed);
        }
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    /// Accumulate a session's counters
    pub fn update_from_stats(&self, stats: &KcpStats) {
        self.total_bytes_sent
            .fetch_add(stats.bytes_sent, Ordering::Relaxed);
        self.total_bytes_received
            .fetch_add(stats.bytes_received, Ordering::Relaxed);
        self.total_packets_sent
            .fetch_add(stats.packets_sent, Ordering::Relaxed);
        self.total_packets_received
            .fetch_add(stats.packets_received, Ordering::Relaxed);
        self.total_retransmissions.fetch_add(
            stats.retransmissions + stats.fast_retransmissions,
            Ordering::Relaxed,
        );
        self.total_decode_errors
            .fetch_add(stats.decode_errors, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            total_bytes_sent: self.total_bytes_sent.load(Ordering::Relaxed),
            total_bytes_received: self.total_bytes_received.load(Ordering::Relaxed),
            total_packets_sent: self.total_packets_sent.load(Ordering::Relaxed),
            total_packets_received: self.total_packets_received.load(Ordering::Relaxed),
            total_retransmissions: self.total_retransmissions.load(Ordering::Relaxed),
            total_decode_errors: self.total_decode_errors.load(Ordering::Relaxed),
            dead_links: self.dead_links.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub sessions_created: u64,
    pub active_sessions: usize,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    pub total_packets_sent: u64,
    pub total_packets_received: u64,
    pub total_retransmissions: u64,
    pub total_decode_errors: u64,
    pub dead_links: u64,
}

impl MetricsSnapshot {
    /// Retransmitted share of sent packets
    pub fn retransmission_rate(&self) -> f64 {
        if self.total_packets_sent == 0 {
            0.0
        } else {
            self.total_retransmissions as f64 / self.total_packets_sent as f64
        }
    }

    /// Calculate total throughput in bytes per second
    pub fn throughput_bps(&self, duration: Duration) -> f64 {
        let total_bytes = self.total_bytes_sent + self.total_bytes_received;
        total_bytes as f64 / duration.as_secs_f64()
    }
}

/// Global metrics instance
pub static GLOBAL_METRICS: std::sync::LazyLock<GlobalMetrics> =
    std::sync::LazyLock::new(GlobalMetrics::default);

/// Get global metrics
pub fn global_metrics() -> &'static GlobalMetrics {
    &GLOBAL_METRICS
}

/// Format metrics for human-readable display
pub fn format_metrics(snapshot: &MetricsSnapshot) -> String {
    format!(
        "KCP Metrics:\n\
         Sessions: {} created, {} active, {} dead links\n\
         Traffic: {} bytes sent, {} bytes received\n\
         Packets: {} sent, {} received, {} malformed\n\
         Retransmissions: {} ({:.2}% of sent)",
        snapshot.sessions_created,
        snapshot.active_sessions,
        snapshot.dead_links,
        snapshot.total_bytes_sent,
        snapshot.total_bytes_received,
        snapshot.total_packets_sent,
        snapshot.total_packets_received,
        snapshot.total_decode_errors,
        snapshot.total_retransmissions,
        snapshot.retransmission_rate() * 100.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lifecycle() {
        let metrics = GlobalMetrics::default();

        metrics.session_created();
        assert_eq!(metrics.active_sessions.load(Ordering::Relaxed), 1);

        let stats = KcpStats {
            bytes_sent: 100,
            packets_sent: 4,
            retransmissions: 1,
            fast_retransmissions: 1,
            ..KcpStats::default()
        };
        metrics.session_closed(&stats, true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_sessions, 0);
        assert_eq!(snapshot.total_bytes_sent, 100);
        assert_eq!(snapshot.total_retransmissions, 2);
        assert_eq!(snapshot.dead_links, 1);
        assert!((snapshot.retransmission_rate() - 0.5).abs() < f64::EPSILON);
        assert!(format_metrics(&snapshot).contains("1 dead links"));
    }
}
