//! Error types for the poll-driven adapter.
//!
//! [`KcpError`] extends [`kcp_core::KcpCoreError`] with the I/O and
//! configuration failures of the socket layer.

use kcp_core::{KcpCoreError, TransmitFailure};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, KcpError>;

// ── Error types ─────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum KcpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Buffer error: {message}")]
    Buffer { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Transmit error: {failure}")]
    Transmit { failure: TransmitFailure },
}

// ── Bridge: kcp-core errors → KcpError ──────────────────────────────────

impl From<KcpCoreError> for KcpError {
    fn from(e: KcpCoreError) -> Self {
        match e {
            KcpCoreError::MessageTooLarge { .. } => Self::buffer(e.to_string()),
            KcpCoreError::Decode { message } => Self::Protocol { message },
            KcpCoreError::InvalidMtu { .. } | KcpCoreError::InvalidWindow { .. } => {
                Self::config(e.to_string())
            }
            KcpCoreError::Transmit(failure) => Self::Transmit { failure },
        }
    }
}

// ── Constructors ────────────────────────────────────────────────────────

impl KcpError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol { message: message.into() }
    }

    pub fn buffer(message: impl Into<String>) -> Self {
        Self::Buffer { message: message.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }
}

// ── Predicates ──────────────────────────────────────────────────────────

impl KcpError {
    /// The session is still usable after this error.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
            ),
            Self::Protocol { .. } | Self::Buffer { .. } | Self::Transmit { .. } => true,
            Self::Config { .. } => false,
        }
    }

    /// The socket reports that the peer is gone or the channel is closed.
    pub fn is_closed(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}
