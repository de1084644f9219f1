//! Transport error types.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Transport-layer errors.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failed to serialize or deserialize a message payload.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Payload exceeds the maximum allowed size.
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Received bytes that are not a binary protocol frame.
    #[error("non-binary frame (missing protocol magic)")]
    NonBinaryFrame,

    /// Frame checksum did not match its payload.
    #[error("checksum mismatch: expected {expected:?}, got {actual:?}")]
    ChecksumMismatch { expected: [u8; 4], actual: [u8; 4] },

    /// Command name is not valid ASCII or exceeds the field width.
    #[error("invalid command name: {0}")]
    InvalidCommand(String),

    /// Operation requires an attached channel but none is present.
    #[error("not connected")]
    NotConnected,

    /// The dialer has already been used; each dialer dials once.
    #[error("already dialing")]
    AlreadyDialing,

    /// Outbound TCP connection timed out.
    #[error("connection timeout to {addr}")]
    ConnectTimeout { addr: SocketAddr },

    /// A live connection from the same normalized address already exists.
    #[error("duplicate connection from {host}")]
    DuplicateAddress { host: String },
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, Error>;
