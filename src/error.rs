//! Error types for the capture core and the frame parser

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("slot count {0} must be a power of two and at least 2")]
    InvalidSlotCount(usize),

    #[error("read timeout must be non-zero")]
    ZeroTimeout,

    /// A record serialized past the transmit buffer. Points at a decoder or
    /// capacity bug, never a normal runtime condition.
    #[error("record frame of {len} bytes exceeds the {max} byte transmit buffer")]
    FrameTooLarge { len: usize, max: usize },

    #[error("destination buffer holds {available} bytes, frame needs {needed}")]
    BufferTooSmall { needed: usize, available: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("trailer says {found} bytes but the frame body is {expected}")]
    TrailerMismatch { expected: usize, found: usize },

    #[error("csi length {0} exceeds the record capacity")]
    CsiTooLong(usize),

    #[error("payload length {0} exceeds the record capacity")]
    PayloadTooLong(usize),
}
