use thiserror::Error;

/// Failure modes for handle-table operations (C3).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HandleError {
    #[error("handle is invalid (id 0)")]
    Invalid,
    #[error("handle does not refer to a live resource")]
    Stale,
}

/// Failure modes for buffer content updates.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    #[error(transparent)]
    Handle(#[from] HandleError),
    #[error("update [{offset}, {offset}+{size}) out of bounds for buffer of size {buffer_size}")]
    OutOfBounds {
        offset: usize,
        size: usize,
        buffer_size: usize,
    },
}

/// Failures while walking a command packet stream (C4).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown command packet type tag {0}")]
    UnknownTag(u16),
    #[error("packet header claims size {size}, but only {remaining} bytes remain in the buffer")]
    TruncatedPacket { size: usize, remaining: usize },
    #[error("packet size {0} is not a multiple of 4")]
    Misaligned(usize),
    #[error("draw-family packet issued outside of a pass")]
    DrawOutsidePass,
    #[error("BeginPass issued while already inside a pass")]
    NestedBeginPass,
}

/// Failures returned from `Device::submit`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
