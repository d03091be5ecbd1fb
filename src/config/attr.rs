use super::{CounterDescriptor, SampleOn, WakeUpOn};
use crate::ffi::{bindings as b, Attr};

pub(crate) fn from(desc: &CounterDescriptor) -> Attr {
    let mut attr = Attr {
        size: b::PERF_ATTR_SIZE_VER5 as _,
        ..Default::default()
    };

    // event config:

    attr.type_ = desc.ty;
    attr.config = desc.config;

    // count config:

    attr.set_disabled(desc.disabled as _);
    attr.set_inherit(desc.inherit as _);
    attr.set_pinned(desc.pinned as _);
    attr.set_exclusive(desc.exclusive as _);

    attr.read_format = desc.read_format;

    // sample config:

    match desc.sample_on {
        SampleOn::Freq(val) => {
            attr.set_freq(1);
            attr.__bindgen_anon_1.sample_freq = val;
        }
        SampleOn::Count(val) => {
            attr.__bindgen_anon_1.sample_period = val;
        }
    }
    attr.sample_type = desc.sample_type;

    match desc.wake_up {
        WakeUpOn::Bytes(n) => {
            attr.set_watermark(1);
            attr.__bindgen_anon_2.wakeup_watermark = n;
        }
        WakeUpOn::Samples(n) => {
            attr.__bindgen_anon_2.wakeup_events = n;
        }
    }

    attr
}
