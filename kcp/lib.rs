//! # KCP Poll: reliable ARQ over datagrams, driven by one wait
//!
//! A poll-driven KCP (Fast and Reliable ARQ Protocol) session: a pure
//! synchronous engine plus a driver that sleeps on socket readability for
//! exactly as long as the engine allows.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────┐
//! │  kcp-poll  (this crate)               │
//! │                                       │
//! │  KcpPoller                ← driver    │
//! │  transport                ← Datagram  │
//! │  config / error / metrics             │
//! ├───────────────────────────────────────┤
//! │  kcp-core  (dependency)               │
//! │                                       │
//! │  KcpEngine   ← pure sync state machine│
//! │  protocol    ← wire types & constants │
//! └───────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kcp_poll::{KcpConfig, KcpPoller, UdpTransport};
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = UdpTransport::connect("0.0.0.0:0", "127.0.0.1:8080").await?;
//!     let mut session = KcpPoller::new(0x11223344, transport, KcpConfig::realtime())?;
//!
//!     session.send(Bytes::from_static(b"Hello, KCP!"))?;
//!     if let Some(reply) = session.poll_read(Some(Duration::from_secs(1))).await? {
//!         println!("Received: {:?}", reply);
//!     }
//!
//!     Ok(())
//! }
//! ```

// ── Layer 1: Core protocol (re-exported from kcp-core) ─────────────────

/// Core protocol types, constants, and wire format.
pub use kcp_core::protocol;

/// Direct access to the standalone `kcp-core` crate.
pub use kcp_core;

pub use kcp_core::{log_mask, KcpEngine, KcpStats, LogSink};

// ── Layer 2: Transport & buffers ────────────────────────────────────────

pub mod buffer_pool;
pub mod transport;
pub use transport::{Addr, Datagram, TransportOutput};
#[cfg(feature = "tokio")]
pub use transport::UdpTransport;

// ── Layer 3: Configuration, errors, metrics ─────────────────────────────

pub mod config;
pub mod error;
pub mod metrics;
pub use config::{KcpConfig, NodeDelayConfig};
pub use error::{KcpError, Result};

// ── Layer 4: Poll-driven session ────────────────────────────────────────

#[cfg(feature = "tokio")]
pub mod poll;
#[cfg(feature = "tokio")]
pub use poll::KcpPoller;

// ── Version info ────────────────────────────────────────────────────────

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
