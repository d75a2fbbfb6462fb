//! Error types for framelink

use thiserror::Error;

/// Errors produced by framelink connections, servers, and codecs.
#[derive(Debug, Error)]
pub enum FramelinkError {
    /// Underlying transport I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Host/port resolution produced no usable endpoint
    #[error("failed to resolve {0}")]
    Resolve(String),

    /// A frame header failed validation; the framing is unrecoverable
    /// on a stream and the connection must close
    #[error("invalid frame header")]
    InvalidHeader,

    /// Message encoding or decoding failed
    #[error("codec error: {0}")]
    Codec(String),

    /// A frame body exceeded the serializer's configured bound
    #[error("message of {size} bytes exceeds maximum of {max}")]
    MessageTooLarge { size: usize, max: usize },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FramelinkError>;
