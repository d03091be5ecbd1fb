use std::io;

use thiserror::Error;

/// Setup and run-time failures of a [`Monitor`][crate::monitor::Monitor].
///
/// Everything here is fatal for the operation that returned it: `open` leaves
/// no counter behind, and `run` has already disabled the counters.
#[derive(Debug, Error)]
pub enum Error {
    /// The descriptors or options can not be turned into valid counters.
    #[error("invalid counter configuration: {0}")]
    Config(#[from] ConfigError),

    /// A kernel call failed while setting up counters or ring buffers.
    #[error("failed to {op} on cpu {cpu}: {source}")]
    Resource {
        op: &'static str,
        cpu: u32,
        #[source]
        source: io::Error,
    },

    /// The kernel handed out an identifier that is already registered.
    #[error("format id {id} was assigned twice")]
    DuplicateId { id: u64 },

    /// The readiness wait failed for a reason other than a signal.
    #[error("failed to wait for counter readiness: {0}")]
    Wait(#[source] io::Error),
}

impl Error {
    pub(crate) fn resource(op: &'static str, cpu: u32) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Resource { op, cpu, source }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no counter descriptors given")]
    NoDescriptors,

    #[error("sample fields {0:#x} can not be decoded")]
    UnsupportedSampleFields(u64),

    #[error("read format bits {0:#x} are not supported")]
    UnsupportedReadFormat(u64),

    #[error("sampled counter values need `PERF_FORMAT_ID` to be attributed")]
    ValuesWithoutId,

    #[error("descriptor {index} is a group sibling and can not be pinned or exclusive")]
    SiblingScheduling { index: usize },

    #[error("ring buffer of 2^{0} pages is too large")]
    RingBufferSize(u8),
}

/// A frame that could not be decoded.
///
/// Reported per frame to [`Handler::on_error`][crate::monitor::Handler::on_error],
/// the dispatcher keeps draining after it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame of {len} bytes is shorter than a record header")]
    ShortHeader { len: usize },

    #[error("frame declares {declared} bytes but {actual} were given")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("frame needs {need} more bytes at offset {offset}")]
    Truncated { offset: usize, need: usize },

    #[error("no counter registered for format id {0}")]
    UnknownId(u64),

    #[error("sample fields {0:#x} can not be decoded")]
    UnsupportedFields(u64),

    #[error("mandatory sample fields {0:#x} are missing")]
    MissingFields(u64),

    #[error("ring buffer framing lost at position {position}, skipped {skipped} bytes")]
    Corrupted { position: u64, skipped: u64 },
}
