//! Pure synchronous KCP protocol engine.
//!
//! This crate implements the KCP ARQ protocol with no runtime, no async and
//! no I/O. The caller supplies the clock (`update(now)`), feeds received
//! packets (`input`) and receives outgoing packets through an [`Output`].
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │  kcp-core                          │
//! │                                    │
//! │  protocol  ← wire format, codec    │
//! │  send      ← fragments, window     │
//! │  recv      ← reorder, reassembly   │
//! │  timing    ← RTT/RTO, cwnd         │
//! │  engine    ← input/flush/update    │
//! │  output    ← packet + log sinks    │
//! │  clock     ← monotonic ms          │
//! └────────────────────────────────────┘
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod output;
pub mod protocol;
mod recv;
mod send;
pub mod timing;

pub use config::{KcpCoreConfig, NodeDelayConfig};
pub use engine::KcpEngine;
pub use error::{KcpCoreError, KcpCoreResult, TransmitFailure};
pub use output::{log_mask, LogSink, Output, PacketQueue};
pub use protocol::*;
