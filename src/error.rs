use std::io;

use thiserror::Error;

use crate::gpmf::FourCC;
use crate::timeunit::Timeunit;

#[derive(Debug, Error)]
pub enum Error {
    /// Passthrough for IO errors (open/read).
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A record header or payload does not fit inside its enclosing buffer.
    #[error("gpmf format error in {fourcc} at offset {offset}: {message}")]
    Format {
        fourcc: FourCC,
        offset: usize,
        message: String,
    },

    /// The interpreter has no decode function for this identifier.
    #[error("no interpreter registered for {fourcc}")]
    UnknownField { fourcc: FourCC },

    /// A compound value has more components than the scale vector can cover.
    #[error("scale for {fourcc} has {scale_len} divisors but values have {arity} components")]
    ScaleMismatch {
        fourcc: FourCC,
        arity: usize,
        scale_len: usize,
    },

    /// An integer did not map onto a closed enumeration.
    #[error("{fourcc} value {value} is not a known enumeration member")]
    UnmappedEnum { fourcc: FourCC, value: i64 },

    /// A device-clock date string could not be parsed.
    #[error("{fourcc} timestamp {text:?} could not be parsed")]
    Timestamp { fourcc: FourCC, text: String },

    /// Internal ordering bug, e.g. timing queried for a stream that was never seen.
    #[error("defect: {0}")]
    Defect(String),

    /// Strict store query outside the stored time range.
    #[error("no entry at {requested:?} (store spans {min:?}..={max:?})")]
    NotFound {
        requested: Timeunit,
        min: Timeunit,
        max: Timeunit,
    },

    /// The store has no entries at all.
    #[error("store is empty")]
    EmptyStore,

    /// Packet timing needs video-frame metadata that the caller did not provide.
    #[error("no device-clock anchor and no video stream metadata to time {stream}")]
    MissingVideoMetadata { stream: FourCC },
}

impl Error {
    pub(crate) fn format(fourcc: FourCC, offset: usize, message: impl Into<String>) -> Self {
        Error::Format {
            fourcc,
            offset,
            message: message.into(),
        }
    }
}
