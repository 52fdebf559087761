//! Error handling module
//!
//! Defines the error types used across the proxy.

use std::io;

use thiserror::Error;

/// Main error type for the uogate proxy
#[derive(Error, Debug)]
pub enum UogateError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Network-specific errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timeout")]
    Timeout,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("No session for this login")]
    SessionNotFound,

    #[error("Write buffer full")]
    WriteBufferFull,

    #[error("Read error: {0}")]
    ReadError(String),

    #[error("Write error: {0}")]
    WriteError(String),
}

/// Protocol-specific errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unknown packet id: {0:#04x}")]
    UnknownPacket(u8),

    #[error("Invalid packet length for {id:#04x}: expected {expected}, got {actual}")]
    InvalidLength {
        id: u8,
        expected: usize,
        actual: usize,
    },

    #[error("Packet too large: {size} bytes (max: {max})")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Malformed packet: {0}")]
    Malformed(String),

    #[error("Unexpected packet in state {state}: id {id:#04x}")]
    UnexpectedPacket { state: &'static str, id: u8 },

    #[error("Invalid handshake")]
    InvalidHandshake,

    #[error("Walk sequence mismatch: queued {queued}, server sent {received}")]
    WalkDesync { queued: u8, received: u8 },
}

/// Result type alias for uogate operations
pub type Result<T> = std::result::Result<T, UogateError>;
