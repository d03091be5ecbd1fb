//! Kernel record decoding.
//!
//! Only `PERF_RECORD_SAMPLE` is decoded field by field, every other record
//! kind is skipped by its header length and surfaced as [`Record::Other`].

use std::sync::Arc;

use crate::count::registry::Registry;
use crate::error::DecodeError;
use crate::ffi::bindings as b;

mod read;
mod sample;

pub use read::*;
pub use sample::*;

/// One frame read from a ring buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Record {
    /// A `PERF_RECORD_SAMPLE` frame.
    Sample(SampleRecord),

    /// Any other record kind, skipped unread.
    Other {
        /// `PERF_RECORD_*` kind of the frame.
        kind: u32,
        /// Header misc bits.
        misc: u16,
        /// Total frame length in bytes.
        len: u16,
    },
}

impl Record {
    /// Whether the kernel dropped records before this frame.
    pub fn is_lost(&self) -> bool {
        matches!(
            self,
            Self::Other {
                kind: b::PERF_RECORD_LOST | b::PERF_RECORD_LOST_SAMPLES,
                ..
            }
        )
    }
}

/// A decoded frame delivered to the consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sample {
    /// CPU whose ring buffer carried the frame.
    pub cpu: u32,
    /// The kernel reported lost records on this CPU since the previous sample.
    pub overflow: bool,
    pub record: Record,
}

/// Turns raw frames into [`Record`]s.
///
/// The layout of a sample depends on the counter that produced it, which is
/// found through the leading `PERF_SAMPLE_IDENTIFIER` in the registry.
#[derive(Clone, Debug)]
pub struct Parser {
    registry: Arc<Registry>,
}

impl Parser {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Decodes one frame, which must span exactly the length its header declares.
    pub fn parse(&self, frame: &[u8]) -> Result<Record, DecodeError> {
        let mut cursor = Cursor::new(frame);
        let (kind, misc, len) = match frame.len() {
            n if n < crate::sample::rb::HEADER_LEN => {
                return Err(DecodeError::ShortHeader { len: n });
            }
            _ => (cursor.u32()?, cursor.u16()?, cursor.u16()?),
        };
        if len as usize != frame.len() {
            return Err(DecodeError::LengthMismatch {
                declared: len as _,
                actual: frame.len(),
            });
        }

        if kind != b::PERF_RECORD_SAMPLE {
            log::trace!("skipping record of kind {} ({} bytes)", kind, len);
            return Ok(Record::Other { kind, misc, len });
        }

        // `PERF_SAMPLE_IDENTIFIER` always sits right after the header:
        // https://github.com/torvalds/linux/blob/v6.13/tools/perf/Documentation/perf.data-file-format.txt#L466
        let identifier = cursor.clone().u64()?;
        let descriptor = self
            .registry
            .get(identifier)
            .ok_or(DecodeError::UnknownId(identifier))?;

        let record = SampleRecord::parse(
            &mut cursor,
            misc,
            descriptor.sample_type(),
            descriptor.read_format(),
        )?;

        if cursor.offset() != frame.len() {
            return Err(DecodeError::LengthMismatch {
                declared: len as _,
                actual: cursor.offset(),
            });
        }

        Ok(Record::Sample(record))
    }
}

/// Bounds-checked reader over one frame, native endian.
#[derive(Clone)]
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let have = self.buf.len().saturating_sub(self.offset);
        if have < N {
            return Err(DecodeError::Truncated {
                offset: self.offset,
                need: N - have,
            });
        }
        let mut array = [0; N];
        array.copy_from_slice(&self.buf[self.offset..self.offset + N]);
        self.offset += N;
        Ok(array)
    }

    pub fn u16(&mut self) -> Result<u16, DecodeError> {
        self.take().map(u16::from_ne_bytes)
    }

    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        self.take().map(u32::from_ne_bytes)
    }

    pub fn u64(&mut self) -> Result<u64, DecodeError> {
        self.take().map(u64::from_ne_bytes)
    }
}
