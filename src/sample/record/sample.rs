use super::{CounterValue, Cursor, Values};
use crate::config::{CounterDescriptor, MANDATORY_SAMPLE_FIELDS, SUPPORTED_SAMPLE_FIELDS};
use crate::count::registry::Registry;
use crate::error::DecodeError;
use crate::ffi::bindings as b;

/// Process and thread the sample was taken in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Task {
    pub pid: u32,
    pub tid: u32,
}

/// A decoded `PERF_RECORD_SAMPLE`.
///
/// Optional fields are present when enabled via
/// [`SampleFormat`][crate::config::SampleFormat], the others are always
/// recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SampleRecord {
    /// Header misc bits.
    pub misc: u16,

    /// Format id of the counter that generated the sample.
    pub identifier: u64,
    /// Code address (instruction pointer).
    pub code_addr: Option<u64>,
    pub task: Option<Task>,
    /// Timestamp of the sample.
    pub time: u64,
    /// Data address.
    ///
    /// This is usually the address of a tracepoint, breakpoint, or software event;
    /// otherwise the value is 0.
    pub data_addr: Option<u64>,
    /// Same as [`identifier`][Self::identifier], at its legacy position.
    pub id: Option<u64>,
    /// Format id of the group leader when the counter is inherited,
    /// the counter's own otherwise.
    pub stream_id: u64,
    /// CPU the sample was taken on.
    pub cpu: u32,
    /// Sampling period.
    pub period: Option<u64>,
    /// Counter values.
    pub values: Option<Values>,
}

impl SampleRecord {
    // https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L957
    // struct {
    //     struct perf_event_header header;
    //     { u64 id;        } && PERF_SAMPLE_IDENTIFIER
    //     { u64 ip;        } && PERF_SAMPLE_IP
    //     { u32 pid, tid;  } && PERF_SAMPLE_TID
    //     { u64 time;      } && PERF_SAMPLE_TIME
    //     { u64 addr;      } && PERF_SAMPLE_ADDR
    //     { u64 id;        } && PERF_SAMPLE_ID
    //     { u64 stream_id; } && PERF_SAMPLE_STREAM_ID
    //     { u32 cpu, res;  } && PERF_SAMPLE_CPU
    //     { u64 period;    } && PERF_SAMPLE_PERIOD
    //     { struct read_format values; } && PERF_SAMPLE_READ
    //     ...
    // };
    pub(crate) fn parse(
        cursor: &mut Cursor<'_>,
        misc: u16,
        sample_type: u64,
        read_format: u64,
    ) -> Result<Self, DecodeError> {
        let unsupported = sample_type & !SUPPORTED_SAMPLE_FIELDS;
        if unsupported > 0 {
            return Err(DecodeError::UnsupportedFields(unsupported));
        }
        let missing = MANDATORY_SAMPLE_FIELDS & !sample_type;
        if missing > 0 {
            return Err(DecodeError::MissingFields(missing));
        }

        macro_rules! when {
            ($flag:ident, $read:expr) => {
                if sample_type & b::$flag as u64 > 0 {
                    Some($read)
                } else {
                    None
                }
            };
        }

        let identifier = cursor.u64()?;
        let code_addr = when!(PERF_SAMPLE_IP, cursor.u64()?);
        let task = when!(
            PERF_SAMPLE_TID,
            Task {
                pid: cursor.u32()?,
                tid: cursor.u32()?,
            }
        );
        let time = cursor.u64()?;
        let data_addr = when!(PERF_SAMPLE_ADDR, cursor.u64()?);
        let id = when!(PERF_SAMPLE_ID, cursor.u64()?);
        let stream_id = cursor.u64()?;
        let cpu = cursor.u32()?;
        let _reserved = cursor.u32()?;
        let period = when!(PERF_SAMPLE_PERIOD, cursor.u64()?);
        let values = when!(PERF_SAMPLE_READ, Values::parse(cursor, read_format)?);

        Ok(Self {
            misc,
            identifier,
            code_addr,
            task,
            time,
            data_addr,
            id,
            stream_id,
            cpu,
            period,
            values,
        })
    }

    /// The instruction pointer points to the actual instruction that
    /// triggered the event.
    pub fn exact_ip(&self) -> bool {
        self.misc & b::PERF_RECORD_MISC_EXACT_IP as u16 > 0
    }

    /// `PERF_RECORD_MISC_CPUMODE_*` the sample was taken in.
    pub fn cpu_mode(&self) -> u16 {
        self.misc & b::PERF_RECORD_MISC_CPUMODE_MASK as u16
    }

    /// Counter values carried by the sample, or nothing without `PERF_SAMPLE_READ`.
    pub fn counters(&self) -> &[CounterValue] {
        self.values.as_ref().map_or(&[], |v| v.counters.as_slice())
    }

    /// Pairs every counter value with the descriptor it was read from.
    ///
    /// Values of a group come in no particular order, resolving them through
    /// their format ids is the only reliable way to tell them apart.
    pub fn attribute<'a>(
        &'a self,
        registry: &'a Registry,
    ) -> impl Iterator<Item = (&'a CounterValue, Option<&'a CounterDescriptor>)> + 'a {
        self.counters()
            .iter()
            .map(move |value| (value, registry.get(value.format_id)))
    }
}
