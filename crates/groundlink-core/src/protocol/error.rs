//! Protocol errors

use thiserror::Error;

/// Errors that can occur while opening or closing a serial connection.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("timeout must be a positive number of seconds")]
    InvalidTimeout,

    #[error("port {port} unavailable: {reason}")]
    PortUnavailable { port: String, reason: String },

    #[error("hardware handshake failed: {0}")]
    Handshake(String),
}

/// Errors that can occur while sending a command through an open session.
///
/// A response timeout is not a `SessionError`: it is reported as a soft
/// [`Outcome::Timeout`](super::Outcome) so the caller can decide to retry.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no open serial connection")]
    NotOpen,

    #[error("I/O fault: {0}")]
    Io(String),
}

/// Errors that can occur while encoding commands or decoding responses.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("invalid command argument: {0}")]
    InvalidArgument(String),

    #[error("malformed response: expected {expected} bytes, got {actual}")]
    Malformed { expected: usize, actual: usize },

    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("no response within deadline")]
    Timeout,

    #[error("device rejected command with status {0:#04x}")]
    Rejected(u8),
}
