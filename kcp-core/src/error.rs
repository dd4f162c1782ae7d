//! Error types for the KCP core protocol engine

use std::fmt;
use std::io;

/// Result type for KCP core operations
pub type KcpCoreResult<T> = std::result::Result<T, KcpCoreError>;

/// Error types produced by the KCP protocol engine.
///
/// None of these leave the engine in an unusable state.
#[derive(Debug)]
pub enum KcpCoreError {
    /// A message would need more than 255 fragments
    MessageTooLarge { len: usize, fragments: usize },
    /// A sub-segment of an incoming packet was malformed or foreign
    Decode { message: String },
    /// MTU rejected, engine unchanged
    InvalidMtu { mtu: u32 },
    /// Window sizes rejected, engine unchanged
    InvalidWindow { snd: u32, rcv: u32 },
    /// The output strategy failed while flushing
    Transmit(TransmitFailure),
}

/// An output failure recorded during a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmitFailure {
    pub kind: io::ErrorKind,
    pub message: String,
    /// Packets the failing flush could not hand off
    pub failed_packets: u32,
}

impl TransmitFailure {
    pub fn from_io(err: &io::Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            failed_packets: 1,
        }
    }
}

impl fmt::Display for TransmitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} packet(s) not sent)",
            self.message, self.failed_packets
        )
    }
}

impl KcpCoreError {
    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        KcpCoreError::Decode {
            message: message.into(),
        }
    }

    /// Errors here never require tearing the engine down.
    pub fn is_fatal(&self) -> bool {
        false
    }
}

impl fmt::Display for KcpCoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KcpCoreError::MessageTooLarge { len, fragments } => write!(
                f,
                "Message too large: {len} bytes needs {fragments} fragments"
            ),
            KcpCoreError::Decode { message } => write!(f, "Decode error: {message}"),
            KcpCoreError::InvalidMtu { mtu } => write!(f, "Invalid MTU: {mtu}"),
            KcpCoreError::InvalidWindow { snd, rcv } => {
                write!(f, "Invalid window: send {snd}, receive {rcv}")
            }
            KcpCoreError::Transmit(failure) => write!(f, "Transmit failure: {failure}"),
        }
    }
}

impl std::error::Error for KcpCoreError {}
