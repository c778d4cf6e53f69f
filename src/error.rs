//! Error types for Gertboard SPI DAQ operations.
//!
//! This module provides a comprehensive error type that covers all possible
//! failure modes when driving the SPI converter chips.

use thiserror::Error;

use crate::board::Direction;

/// Result type alias for Gertboard driver operations.
pub type Result<T> = std::result::Result<T, GertError>;

/// Errors that can occur when working with the SPI converter chips.
#[derive(Error, Debug)]
pub enum GertError {
    /// A streaming command is already running on this direction
    #[error("Analog {direction} is busy (streaming command running)")]
    Busy { direction: Direction },

    /// Streaming command rejected by one of the four validation stages
    #[error("Invalid command (stage {stage}): {message}")]
    InvalidCommand { stage: u32, message: String },

    /// Trigger fired in the wrong state or with the wrong trigger number
    #[error("Invalid trigger on analog {direction}: {message}")]
    InvalidTrigger { direction: Direction, message: String },

    /// Invalid channel number
    #[error("Invalid channel {channel}: direction has {max} channels")]
    InvalidChannel { channel: u32, max: u32 },

    /// Raw frame does not match the active chip's frame length
    #[error("Frame length mismatch: expected {expected} bytes, got {actual}")]
    FrameLengthMismatch { expected: usize, actual: usize },

    /// Buffer overflow during acquisition
    #[error("Buffer overflow: data acquisition too slow")]
    BufferOverflow,

    /// Buffer underrun during output
    #[error("Buffer underrun: data output too slow")]
    BufferUnderrun,

    /// SPI exchange failed
    #[error("SPI transfer failed: {message}")]
    TransferFailed { message: String },

    /// Hardware error reported by the chip
    #[error("Hardware error: {message}")]
    HardwareError { message: String },

    /// Invalid configuration or parameter
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// I/O error from the operating system
    #[error("I/O error: {0}")]
    StdIoError(#[from] std::io::Error),
}

impl GertError {
    /// Check if the direction is busy.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    /// Check if this is a command validation rejection.
    pub fn is_invalid_command(&self) -> bool {
        matches!(self, Self::InvalidCommand { .. })
    }

    /// The validation stage that rejected the command, if any.
    pub fn validation_stage(&self) -> Option<u32> {
        match self {
            Self::InvalidCommand { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GertError::InvalidChannel { channel: 4, max: 2 };
        assert!(err.to_string().contains('4'));
        assert!(err.to_string().contains('2'));
    }

    #[test]
    fn test_validation_stage() {
        let err = GertError::InvalidCommand {
            stage: 3,
            message: "stop count must be at least 1".into(),
        };
        assert!(err.is_invalid_command());
        assert_eq!(err.validation_stage(), Some(3));
        assert!(!err.is_busy());
    }
}
