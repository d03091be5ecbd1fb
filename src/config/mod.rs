use std::borrow::Borrow;
use std::io;

use crate::error::ConfigError;
use crate::event::Event;
use crate::ffi::bindings as b;

pub(crate) mod attr;
#[cfg(test)]
mod test;

/// Sample fields every counter is opened with, whatever was requested.
///
/// The decoder needs the leading identifier to find the originating counter,
/// and the rest to tell where and when a sample was taken.
pub const MANDATORY_SAMPLE_FIELDS: u64 = b::PERF_SAMPLE_CPU as u64
    | b::PERF_SAMPLE_STREAM_ID as u64
    | b::PERF_SAMPLE_IDENTIFIER as u64
    | b::PERF_SAMPLE_TIME as u64;

/// Sample fields the decoder understands.
pub const SUPPORTED_SAMPLE_FIELDS: u64 = b::PERF_SAMPLE_IP as u64
    | b::PERF_SAMPLE_TID as u64
    | b::PERF_SAMPLE_TIME as u64
    | b::PERF_SAMPLE_ADDR as u64
    | b::PERF_SAMPLE_READ as u64
    | b::PERF_SAMPLE_ID as u64
    | b::PERF_SAMPLE_CPU as u64
    | b::PERF_SAMPLE_PERIOD as u64
    | b::PERF_SAMPLE_STREAM_ID as u64
    | b::PERF_SAMPLE_IDENTIFIER as u64;

pub const SUPPORTED_READ_FORMAT: u64 = b::PERF_FORMAT_TOTAL_TIME_ENABLED as u64
    | b::PERF_FORMAT_TOTAL_TIME_RUNNING as u64
    | b::PERF_FORMAT_ID as u64
    | b::PERF_FORMAT_GROUP as u64
    | b::PERF_FORMAT_LOST as u64;

/// Monitor-wide options.
#[derive(Clone, Debug)]
pub struct Opts {
    /// Each CPU's ring buffer has 2^`pages_exp` data pages, plus one control page.
    pub pages_exp: u8,

    /// Extra `PERF_FLAG_*` bits passed to every `perf_event_open` call.
    ///
    /// `PERF_FLAG_FD_CLOEXEC` is always set.
    pub flags: u64,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            pages_exp: 3,
            flags: 0,
        }
    }
}

impl Opts {
    pub(crate) fn mmap_len(&self, page_size: usize) -> Result<usize, ConfigError> {
        2_usize
            .checked_pow(self.pages_exp as u32)
            .and_then(|n| n.checked_add(1))
            .and_then(|n| n.checked_mul(page_size))
            .ok_or(ConfigError::RingBufferSize(self.pages_exp))
    }
}

/// Options of one counter descriptor.
#[derive(Clone, Debug, Default)]
pub struct DescriptorOpts {
    /// Controls when to generate a sample record.
    pub sample_on: SampleOn,

    /// Optional fields of the sample record.
    ///
    /// [`MANDATORY_SAMPLE_FIELDS`] are added when the counter is opened.
    pub sample_format: SampleFormat,

    /// Layout of the counter values carried by samples.
    pub stat_format: StatFormat,

    /// Start counting as soon as the counter is opened.
    ///
    /// Counters are normally left disabled until the monitor runs.
    pub enable: bool,

    /// Keep the counter on the PMU, only valid for group leaders.
    pub pin_on_pmu: bool,

    /// The group must be the only one on the PMU while scheduled,
    /// only valid for group leaders.
    pub only_group: bool,

    /// New child tasks inherit the counter.
    pub inherit: bool,

    /// Controls when the dispatcher is woken up.
    pub wake_up: WakeUpOn,
}

/// Controls when to generate a sample record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SampleOn {
    /// Sample on frequency (Hz).
    ///
    /// The kernel will adjust the sampling period to try and achieve the desired rate.
    Freq(u64),

    /// Sample on every N event counts.
    Count(u64),
}

impl Default for SampleOn {
    fn default() -> Self {
        Self::Freq(0)
    }
}

impl SampleOn {
    /// Whether the counter generates samples at all.
    pub fn is_sampling(&self) -> bool {
        match self {
            Self::Freq(n) | Self::Count(n) => *n > 0,
        }
    }
}

/// Controls when the ring buffer wakes up the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WakeUpOn {
    /// After this many bytes are written.
    Bytes(u32),

    /// After this many samples are written.
    Samples(u32),
}

impl Default for WakeUpOn {
    fn default() -> Self {
        Self::Samples(1)
    }
}

#[derive(Clone, Debug, Default)]
pub struct SampleFormat {
    // PERF_SAMPLE_IP
    pub code_addr: bool,
    // PERF_SAMPLE_TID
    pub task: bool,
    // PERF_SAMPLE_TIME
    pub time: bool,
    // PERF_SAMPLE_ADDR
    pub data_addr: bool,
    // PERF_SAMPLE_ID
    pub id: bool,
    // PERF_SAMPLE_STREAM_ID
    pub stream_id: bool,
    // PERF_SAMPLE_CPU
    pub cpu: bool,
    // PERF_SAMPLE_PERIOD
    pub period: bool,
    // PERF_SAMPLE_READ
    pub stat: bool,
}

impl SampleFormat {
    pub(crate) fn as_sample_type(&self) -> u64 {
        let mut val = 0;
        macro_rules! when {
            ($field:ident, $flag:ident) => {
                if self.$field {
                    val |= b::$flag as u64;
                }
            };
        }
        when!(code_addr, PERF_SAMPLE_IP);
        when!(task, PERF_SAMPLE_TID);
        when!(time, PERF_SAMPLE_TIME);
        when!(data_addr, PERF_SAMPLE_ADDR);
        when!(id, PERF_SAMPLE_ID);
        when!(stream_id, PERF_SAMPLE_STREAM_ID);
        when!(cpu, PERF_SAMPLE_CPU);
        when!(period, PERF_SAMPLE_PERIOD);
        when!(stat, PERF_SAMPLE_READ);
        val
    }
}

#[derive(Clone, Debug, Default)]
pub struct StatFormat {
    // PERF_FORMAT_ID
    pub id: bool,
    // PERF_FORMAT_TOTAL_TIME_ENABLED
    pub time_enabled: bool,
    // PERF_FORMAT_TOTAL_TIME_RUNNING
    pub time_running: bool,
    // PERF_FORMAT_LOST
    pub lost_records: bool,
    // PERF_FORMAT_GROUP
    pub siblings: bool,
}

impl StatFormat {
    pub(crate) fn as_read_format(&self) -> u64 {
        let mut val = 0;
        macro_rules! when {
            ($field:ident, $flag:ident) => {
                if self.$field {
                    val |= b::$flag as u64;
                }
            };
        }
        when!(id, PERF_FORMAT_ID);
        when!(time_enabled, PERF_FORMAT_TOTAL_TIME_ENABLED);
        when!(time_running, PERF_FORMAT_TOTAL_TIME_RUNNING);
        when!(lost_records, PERF_FORMAT_LOST);
        when!(siblings, PERF_FORMAT_GROUP);
        val
    }
}

/// Immutable configuration of one performance event.
///
/// The first descriptor handed to [`Monitor::open`][crate::monitor::Monitor::open]
/// becomes the group leader on every CPU, the others its siblings.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CounterDescriptor {
    ty: u32,
    config: u64,
    sample_type: u64,
    read_format: u64,
    sample_on: SampleOn,
    wake_up: WakeUpOn,
    disabled: bool,
    pinned: bool,
    exclusive: bool,
    inherit: bool,
}

impl CounterDescriptor {
    pub fn new(
        event: impl TryInto<Event, Error = io::Error>,
        opts: impl Borrow<DescriptorOpts>,
    ) -> io::Result<Self> {
        let Event(event_cfg) = event.try_into()?;
        let opts = opts.borrow();

        Ok(Self {
            ty: event_cfg.ty,
            config: event_cfg.config,
            sample_type: opts.sample_format.as_sample_type(),
            read_format: opts.stat_format.as_read_format(),
            sample_on: opts.sample_on,
            wake_up: opts.wake_up,
            disabled: !opts.enable,
            pinned: opts.pin_on_pmu,
            exclusive: opts.only_group,
            inherit: opts.inherit,
        })
    }

    /// Builds a descriptor from raw `PERF_SAMPLE_*` and `PERF_FORMAT_*` masks.
    pub fn from_raw_parts(
        ty: u32,
        config: u64,
        sample_type: u64,
        read_format: u64,
        opts: impl Borrow<DescriptorOpts>,
    ) -> Self {
        let opts = opts.borrow();
        Self {
            ty,
            config,
            sample_type,
            read_format,
            sample_on: opts.sample_on,
            wake_up: opts.wake_up,
            disabled: !opts.enable,
            pinned: opts.pin_on_pmu,
            exclusive: opts.only_group,
            inherit: opts.inherit,
        }
    }

    pub fn ty(&self) -> u32 {
        self.ty
    }

    pub fn config(&self) -> u64 {
        self.config
    }

    pub fn sample_type(&self) -> u64 {
        self.sample_type
    }

    pub fn read_format(&self) -> u64 {
        self.read_format
    }

    pub fn sample_on(&self) -> SampleOn {
        self.sample_on
    }

    pub fn wake_up(&self) -> WakeUpOn {
        self.wake_up
    }

    pub fn disabled(&self) -> bool {
        self.disabled
    }

    pub fn pinned(&self) -> bool {
        self.pinned
    }

    pub fn exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn inherit(&self) -> bool {
        self.inherit
    }

    /// Size of the `perf_event_attr` this descriptor is opened with.
    pub fn size(&self) -> u32 {
        b::PERF_ATTR_SIZE_VER5 as _
    }

    /// Returns a copy with [`MANDATORY_SAMPLE_FIELDS`] added.
    pub fn with_mandatory_fields(&self) -> Self {
        Self {
            sample_type: self.sample_type | MANDATORY_SAMPLE_FIELDS,
            ..self.clone()
        }
    }

    pub(crate) fn validate(&self, index: usize) -> Result<(), ConfigError> {
        let unknown = self.sample_type & !SUPPORTED_SAMPLE_FIELDS;
        if unknown > 0 {
            return Err(ConfigError::UnsupportedSampleFields(unknown));
        }
        let unknown = self.read_format & !SUPPORTED_READ_FORMAT;
        if unknown > 0 {
            return Err(ConfigError::UnsupportedReadFormat(unknown));
        }
        let read = self.sample_type & b::PERF_SAMPLE_READ as u64 > 0;
        if read && self.read_format & b::PERF_FORMAT_ID as u64 == 0 {
            return Err(ConfigError::ValuesWithoutId);
        }
        // Only a group leader can be exclusive or pinned:
        // https://github.com/torvalds/linux/blob/v6.13/kernel/events/core.c#L12982
        if index > 0 && (self.pinned || self.exclusive) {
            return Err(ConfigError::SiblingScheduling { index });
        }
        Ok(())
    }
}
