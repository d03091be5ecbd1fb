use super::{attr, CounterDescriptor, DescriptorOpts, Opts, SampleOn, WakeUpOn};
use super::{MANDATORY_SAMPLE_FIELDS, SUPPORTED_SAMPLE_FIELDS};
use crate::error::ConfigError;
use crate::event::hw::{Hardware, Op, OpResult, Type};
use crate::ffi::bindings as b;

fn raw(sample_type: u64, read_format: u64, opts: &DescriptorOpts) -> CounterDescriptor {
    CounterDescriptor::from_raw_parts(b::PERF_TYPE_RAW, 0x1234, sample_type, read_format, opts)
}

#[test]
fn test_descriptor_from_opts() {
    let mut opts = DescriptorOpts::default();
    opts.sample_on = SampleOn::Freq(10_000);
    opts.sample_format.task = true;
    opts.sample_format.stat = true;
    opts.stat_format.id = true;
    opts.stat_format.siblings = true;
    opts.pin_on_pmu = true;

    let desc = CounterDescriptor::new(Hardware::Instr, &opts).unwrap();
    assert_eq!(desc.ty(), b::PERF_TYPE_HARDWARE);
    assert_eq!(desc.config(), b::PERF_COUNT_HW_INSTRUCTIONS as u64);
    assert_eq!(desc.sample_type(), b::PERF_SAMPLE_TID as u64 | b::PERF_SAMPLE_READ as u64);
    assert_eq!(desc.read_format(), b::PERF_FORMAT_ID as u64 | b::PERF_FORMAT_GROUP as u64);
    assert_eq!(desc.sample_on(), SampleOn::Freq(10_000));
    assert_eq!(desc.wake_up(), WakeUpOn::Samples(1));
    assert!(desc.disabled());
    assert!(desc.pinned());
    assert!(!desc.exclusive());
    assert_eq!(desc.size(), 112);
    assert_eq!(desc.validate(0), Ok(()));
}

#[test]
fn test_with_mandatory_fields() {
    let desc = raw(b::PERF_SAMPLE_IP as u64, 0, &Default::default());
    let augmented = desc.with_mandatory_fields();

    assert_eq!(augmented.sample_type(), b::PERF_SAMPLE_IP as u64 | MANDATORY_SAMPLE_FIELDS);
    assert_eq!(augmented.config(), desc.config());
    // The source descriptor is left untouched.
    assert_eq!(desc.sample_type(), b::PERF_SAMPLE_IP as u64);
    assert_eq!(augmented.with_mandatory_fields(), augmented);
}

#[test]
fn test_validate_unsupported_sample_fields() {
    let sample_type = b::PERF_SAMPLE_CALLCHAIN as u64 | b::PERF_SAMPLE_IP as u64;
    let desc = raw(sample_type, 0, &Default::default());
    assert_eq!(
        desc.validate(0),
        Err(ConfigError::UnsupportedSampleFields(b::PERF_SAMPLE_CALLCHAIN as u64))
    );
    assert_eq!(SUPPORTED_SAMPLE_FIELDS & MANDATORY_SAMPLE_FIELDS, MANDATORY_SAMPLE_FIELDS);
}

#[test]
fn test_validate_unsupported_read_format() {
    let desc = raw(0, 1 << 5, &Default::default());
    assert_eq!(
        desc.validate(0),
        Err(ConfigError::UnsupportedReadFormat(1 << 5))
    );
}

#[test]
fn test_validate_values_without_id() {
    let read_format = b::PERF_FORMAT_GROUP as u64;
    let desc = raw(b::PERF_SAMPLE_READ as u64, read_format, &Default::default());
    assert_eq!(desc.validate(0), Err(ConfigError::ValuesWithoutId));

    // Ids are only needed when values are sampled.
    let desc = raw(0, b::PERF_FORMAT_GROUP as u64, &Default::default());
    assert_eq!(desc.validate(0), Ok(()));
}

#[test]
fn test_validate_sibling_scheduling() {
    let opts = DescriptorOpts {
        only_group: true,
        ..Default::default()
    };
    let desc = raw(0, 0, &opts);
    assert_eq!(desc.validate(0), Ok(()));
    assert_eq!(
        desc.validate(2),
        Err(ConfigError::SiblingScheduling { index: 2 })
    );
}

#[test]
fn test_mmap_len() {
    let opts = Opts::default();
    assert_eq!(opts.mmap_len(4096), Ok(9 * 4096));

    let opts = Opts {
        pages_exp: 0,
        ..Default::default()
    };
    assert_eq!(opts.mmap_len(4096), Ok(2 * 4096));

    let opts = Opts {
        pages_exp: 80,
        ..Default::default()
    };
    assert_eq!(opts.mmap_len(4096), Err(ConfigError::RingBufferSize(80)));
}

#[test]
fn test_attr_sampling_on_freq() {
    let mut opts = DescriptorOpts::default();
    opts.sample_on = SampleOn::Freq(10_000);
    opts.inherit = true;
    opts.wake_up = WakeUpOn::Bytes(4096);

    let event = Hardware::Cache(Type::Ll, Op::Read, OpResult::Miss);
    let desc = CounterDescriptor::new(event, &opts)
        .unwrap()
        .with_mandatory_fields();
    let attr = attr::from(&desc);

    assert_eq!(attr.size, b::PERF_ATTR_SIZE_VER5 as u32);
    assert_eq!(attr.type_, b::PERF_TYPE_HW_CACHE);
    assert_eq!(attr.config, 0x10002);
    assert_eq!(unsafe { attr.__bindgen_anon_1.sample_freq }, 10_000);
    assert_eq!(attr.sample_type, MANDATORY_SAMPLE_FIELDS);
    assert_eq!(unsafe { attr.__bindgen_anon_2.wakeup_watermark }, 4096);

    assert_eq!(attr.disabled(), 1);
    assert_eq!(attr.inherit(), 1);
    assert_eq!(attr.freq(), 1);
    assert_eq!(attr.watermark(), 1);
    assert_eq!(attr.pinned(), 0);
    assert_eq!(attr.exclusive(), 0);
}

#[test]
fn test_attr_sampling_on_count() {
    let opts = DescriptorOpts {
        sample_on: SampleOn::Count(5000),
        enable: true,
        pin_on_pmu: true,
        only_group: true,
        ..Default::default()
    };
    let desc = raw(b::PERF_SAMPLE_TID as u64, b::PERF_FORMAT_ID as u64, &opts);
    let attr = attr::from(&desc);

    assert_eq!(attr.type_, b::PERF_TYPE_RAW);
    assert_eq!(attr.config, 0x1234);
    assert_eq!(unsafe { attr.__bindgen_anon_1.sample_period }, 5000);
    assert_eq!(attr.read_format, b::PERF_FORMAT_ID as u64);
    assert_eq!(unsafe { attr.__bindgen_anon_2.wakeup_events }, 1);

    assert_eq!(attr.disabled(), 0);
    assert_eq!(attr.freq(), 0);
    assert_eq!(attr.watermark(), 0);
    assert_eq!(attr.pinned(), 1);
    assert_eq!(attr.exclusive(), 1);
}
