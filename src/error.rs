//! Error types for the bulletin board client.
//!
//! `DecodeError` covers everything that can go wrong while reading a
//! response; `ClientError` is the top-level error surfaced by `main`.

use crate::config::ConfigError;
use crate::protocol::request::RequestError;
use std::io;

/// Response decoding errors.
///
/// Every variant is terminal for the decode that produced it.
#[derive(Debug)]
pub enum DecodeError {
    /// Status line missing, without digits, or out of range.
    MalformedStatus(String),
    /// Filename field missing, empty, or naming something outside the
    /// working directory.
    InvalidFilename(String),
    /// Filename longer than the filesystem allows.
    FilenameTooLong(usize),
    /// Length field missing or not a non-negative decimal integer.
    InvalidLength(String),
    /// Stream ended before the declared number of payload bytes arrived.
    TruncatedPayload {
        name: String,
        declared: u64,
        written: u64,
    },
    /// The sink could not be opened, or a write failed or was short.
    SinkWriteError { name: String, source: io::Error },
    /// A chunk would overflow the frame buffer.
    CapacityExceeded { needed: usize, capacity: usize },
    /// No data arrived within the read timeout.
    Timeout,
    /// Reading from the connection failed.
    ConnectionError(io::Error),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::MalformedStatus(msg) => write!(f, "Malformed status: {}", msg),
            DecodeError::InvalidFilename(msg) => write!(f, "Invalid filename: {}", msg),
            DecodeError::FilenameTooLong(max) => {
                write!(f, "Filename exceeds maximum length of {} bytes", max)
            }
            DecodeError::InvalidLength(msg) => write!(f, "Invalid length: {}", msg),
            DecodeError::TruncatedPayload {
                name,
                declared,
                written,
            } => write!(
                f,
                "Stream ended after {} of {} bytes of '{}'",
                written, declared, name
            ),
            DecodeError::SinkWriteError { name, source } => {
                write!(f, "Failed to write '{}': {}", name, source)
            }
            DecodeError::CapacityExceeded { needed, capacity } => write!(
                f,
                "Frame buffer overflow: {} bytes needed, capacity {}",
                needed, capacity
            ),
            DecodeError::Timeout => write!(f, "Timed out waiting for response data"),
            DecodeError::ConnectionError(e) => write!(f, "Connection read failed: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::SinkWriteError { source, .. } => Some(source),
            DecodeError::ConnectionError(e) => Some(e),
            _ => None,
        }
    }
}

/// Top-level client errors.
#[derive(Debug)]
pub enum ClientError {
    Config(ConfigError),
    Request(RequestError),
    /// Could not connect to any resolved address.
    Connect(String, io::Error),
    /// Sending the request or shutting down the write side failed.
    Send(io::Error),
    Decode(DecodeError),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Config(e) => write!(f, "{}", e),
            ClientError::Request(e) => write!(f, "{}", e),
            ClientError::Connect(target, e) => {
                write!(f, "Could not connect to {}: {}", target, e)
            }
            ClientError::Send(e) => write!(f, "Failed to send request: {}", e),
            ClientError::Decode(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Config(e) => Some(e),
            ClientError::Request(e) => Some(e),
            ClientError::Connect(_, e) | ClientError::Send(e) => Some(e),
            ClientError::Decode(e) => Some(e),
        }
    }
}

impl From<ConfigError> for ClientError {
    fn from(e: ConfigError) -> Self {
        ClientError::Config(e)
    }
}

impl From<RequestError> for ClientError {
    fn from(e: RequestError) -> Self {
        ClientError::Request(e)
    }
}

impl From<DecodeError> for ClientError {
    fn from(e: DecodeError) -> Self {
        ClientError::Decode(e)
    }
}
