//! Protocol error types

use thiserror::Error;

/// Errors raised while encoding or decoding channel frames
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame carried no message type byte
    #[error("Empty frame: no message type byte")]
    Empty,

    /// Message type byte is not one of the known control messages
    #[error("Unknown control message type: {0:#04x}")]
    UnknownMessageType(u8),

    /// Payload could not be (de)serialized
    #[error("Payload error: {0}")]
    Payload(#[from] postcard::Error),

    /// Device identifier is empty or longer than the wire limit
    #[error("Invalid device id: {len} bytes (must be 1..={max})")]
    InvalidDeviceId { len: usize, max: usize },

    /// Transfer type name not recognized
    #[error("Unknown transfer type: {0}")]
    UnknownTransferType(String),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
