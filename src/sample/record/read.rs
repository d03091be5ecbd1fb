use super::Cursor;
use crate::error::DecodeError;
use crate::ffi::bindings as b;

/// One counter value carried by a sample.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CounterValue {
    pub value: u64,
    /// Identifier of the counter the value belongs to, see
    /// [`Registry::get`][crate::count::registry::Registry::get].
    pub format_id: u64,
    /// Records lost by this counter, with `PERF_FORMAT_LOST`.
    pub lost_records: Option<u64>,
}

impl CounterValue {
    /// Count since `prev`, tolerating a 64-bit wraparound in between.
    pub fn delta(&self, prev: u64) -> u64 {
        self.value.wrapping_sub(prev)
    }
}

/// Counter values of a `PERF_SAMPLE_READ` sample.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Values {
    pub time_enabled: Option<u64>,
    pub time_running: Option<u64>,
    /// One entry per counter of the group, in no particular order.
    pub counters: Vec<CounterValue>,
}

impl Values {
    // https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L344
    // struct read_format {
    //     {
    //         u64 value;
    //         { u64 time_enabled; } && PERF_FORMAT_TOTAL_TIME_ENABLED
    //         { u64 time_running; } && PERF_FORMAT_TOTAL_TIME_RUNNING
    //         { u64 id;           } && PERF_FORMAT_ID
    //         { u64 lost;         } && PERF_FORMAT_LOST
    //     } && !PERF_FORMAT_GROUP
    //     {
    //         u64 nr;
    //         { u64 time_enabled; } && PERF_FORMAT_TOTAL_TIME_ENABLED
    //         { u64 time_running; } && PERF_FORMAT_TOTAL_TIME_RUNNING
    //         {
    //             u64 value;
    //             { u64 id;   } && PERF_FORMAT_ID
    //             { u64 lost; } && PERF_FORMAT_LOST
    //         } cntr[nr];
    //     } && PERF_FORMAT_GROUP
    // };
    pub(crate) fn parse(cursor: &mut Cursor<'_>, read_format: u64) -> Result<Self, DecodeError> {
        macro_rules! when {
            ($flag:ident) => {
                if read_format & b::$flag as u64 > 0 {
                    Some(cursor.u64()?)
                } else {
                    None
                }
            };
        }

        // Values can not be attributed without ids, `Monitor::open` rejects that.
        if read_format & b::PERF_FORMAT_ID as u64 == 0 {
            return Err(DecodeError::UnsupportedFields(b::PERF_SAMPLE_READ as u64));
        }

        if read_format & b::PERF_FORMAT_GROUP as u64 == 0 {
            let value = cursor.u64()?;
            let time_enabled = when!(PERF_FORMAT_TOTAL_TIME_ENABLED);
            let time_running = when!(PERF_FORMAT_TOTAL_TIME_RUNNING);
            let format_id = cursor.u64()?;
            let lost_records = when!(PERF_FORMAT_LOST);

            return Ok(Self {
                time_enabled,
                time_running,
                counters: vec![CounterValue {
                    value,
                    format_id,
                    lost_records,
                }],
            });
        }

        let nr = cursor.u64()?;
        let time_enabled = when!(PERF_FORMAT_TOTAL_TIME_ENABLED);
        let time_running = when!(PERF_FORMAT_TOTAL_TIME_RUNNING);

        // A bogus `nr` must not turn into a huge allocation, the cursor
        // fails on the first missing entry anyway.
        let mut counters = Vec::with_capacity(nr.min(64) as _);
        for _ in 0..nr {
            let value = cursor.u64()?;
            let format_id = cursor.u64()?;
            let lost_records = when!(PERF_FORMAT_LOST);
            counters.push(CounterValue {
                value,
                format_id,
                lost_records,
            });
        }

        Ok(Self {
            time_enabled,
            time_running,
            counters,
        })
    }
}
