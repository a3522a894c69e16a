// SBMS - Battery telemetry decoding and exposition
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for SBMS
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias for SBMS operations
pub type Result<T> = std::result::Result<T, SbmsError>;

/// Main error type for SBMS operations
#[derive(Error, Debug)]
pub enum SbmsError {
    /// A record could not be decoded
    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),

    /// The input stream ended or failed
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// The metrics registry rejected a collector
    #[error("Registry error: {0}")]
    Registry(#[from] prometheus::Error),
}

impl SbmsError {
    /// Whether this error ended the input stream
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

/// Errors while decoding a single record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Record size differs from the fixed frame length
    #[error("Invalid record length: expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

/// Terminal conditions of the input stream
#[derive(Error, Debug)]
pub enum StreamError {
    /// Clean end of input
    #[error("Stream closed")]
    Closed,

    /// Underlying read failure
    #[error("Read failed: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SbmsError::Decode(DecodeError::Length {
            expected: 59,
            actual: 12,
        });
        let msg = format!("{}", err);
        assert!(msg.contains("length"));
        assert!(msg.contains("59"));
        assert!(msg.contains("12"));
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err: SbmsError = StreamError::from(io_err).into();
        assert!(err.is_stream());
        assert!(matches!(err, SbmsError::Stream(StreamError::Io(_))));

        let err: SbmsError = DecodeError::Length {
            expected: 59,
            actual: 0,
        }
        .into();
        assert!(!err.is_stream());
    }
}
